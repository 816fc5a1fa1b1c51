//! Accumulated state of one streaming vulnerability fetch.
//!
//! A [`Job`] wraps the receiving half of a fetch and copies whatever the
//! source has produced so far into its own buffers each time it is drained.
//! Draining never waits: anything not yet sent is picked up by a later call.

use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;
use tracing::warn;

use crate::traits::{FetchError, FetchStream};

/// Point-in-time copy of a job's results.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot<V> {
    /// Records in the order the source produced them
    pub records: Vec<V>,

    /// Fetch-level errors in the order the source produced them
    pub errors: Vec<FetchError>,

    /// Whether the source has signaled that nothing more will arrive
    pub done: bool,
}

/// One in-flight or finished fetch.
///
/// `drain` takes `&mut self`, so callers sharing a job must serialize access
/// (the registry keeps each job behind its own mutex).
#[derive(Debug)]
pub struct Job<V> {
    stream: FetchStream<V>,
    collected: Vec<V>,
    collected_errors: Vec<FetchError>,
    done: bool,
    created_at: Instant,
    last_accessed: Instant,
}

impl<V> Job<V> {
    pub fn new(stream: FetchStream<V>) -> Self {
        let now = Instant::now();
        Self {
            stream,
            collected: Vec::new(),
            collected_errors: Vec::new(),
            done: false,
            created_at: now,
            last_accessed: now,
        }
    }

    /// Moves every record and error currently buffered in the stream into the
    /// job, then marks it done if completion was signaled. Returns how many
    /// errors this call collected; they are the tail of the error buffer.
    ///
    /// The completion check happens before the channels are emptied. Anything
    /// the source sent ahead of its completion signal is therefore collected
    /// in the same call that flips `done`.
    pub fn drain(&mut self) -> usize {
        if self.done {
            return 0;
        }

        let finished = match self.stream.done.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                warn!("Vulnerability source went away without signaling completion");
                true
            }
        };

        while let Ok(record) = self.stream.records.try_recv() {
            self.collected.push(record);
        }
        let known_errors = self.collected_errors.len();
        while let Ok(error) = self.stream.errors.try_recv() {
            self.collected_errors.push(error);
        }

        if finished {
            self.done = true;
        }
        self.collected_errors.len() - known_errors
    }

    pub fn errors(&self) -> &[FetchError] {
        &self.collected_errors
    }

    pub fn snapshot(&self) -> JobSnapshot<V>
    where
        V: Clone,
    {
        JobSnapshot {
            records: self.collected.clone(),
            errors: self.collected_errors.clone(),
            done: self.done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    /// Records a successful retrieval at `now`.
    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
    }

    /// A job may only be discarded once it is finished and has gone unread
    /// for at least `threshold`.
    pub(crate) fn is_evictable(&self, now: Instant, threshold: Duration) -> bool {
        self.done && now.saturating_duration_since(self.last_accessed) >= threshold
    }
}
