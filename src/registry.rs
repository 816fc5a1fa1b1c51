//! Concurrent registry of pollable vulnerability jobs.
//!
//! The [`JobRegistry`] hands out an opaque identifier for every registered
//! fetch and lets any number of callers poll it by that identifier:
//! - Lookups take a shared lock on the map; only registration and eviction
//!   take it exclusively
//! - Each job sits behind its own mutex, so two polls of the same job never
//!   drain it at the same time while polls of different jobs never contend
//! - An optional background sweep discards finished jobs nobody has polled
//!   for a while

use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::job::{Job, JobSnapshot};
use crate::traits::{FetchError, FetchStream};

/// How many fresh identifiers to draw before giving up on registration.
const MAX_ID_ATTEMPTS: usize = 8;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Options
// ============================================================================

/// Construction-time settings for a [`JobRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRegistryOptions {
    /// Length of generated request identifiers
    pub identifier_length: usize,

    /// How long a finished job may go unpolled before it is discarded.
    ///
    /// `None` or zero disables eviction entirely.
    pub idle_eviction_threshold: Option<Duration>,

    /// Period of the background eviction sweep
    pub sweep_interval: Duration,
}

impl Default for JobRegistryOptions {
    fn default() -> Self {
        Self {
            identifier_length: 32,
            idle_eviction_threshold: Some(Duration::from_secs(600)), // 10 minutes
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl JobRegistryOptions {
    /// Effective eviction threshold, if eviction is enabled.
    pub fn eviction_threshold(&self) -> Option<Duration> {
        self.idle_eviction_threshold.filter(|t| !t.is_zero())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by registry operations.
///
/// Problems the source reports mid-fetch are not errors here; they are part
/// of a job's results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// No usable identifier could be produced
    #[error("Failed to register job: {0}")]
    Registration(String),

    /// The identifier was never registered or its job has been evicted
    #[error("No such job: {0}")]
    NotFound(String),
}

// ============================================================================
// Identifier generation
// ============================================================================

/// Source of request identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produces an identifier of `length` characters.
    fn generate(&self, length: usize) -> String;
}

/// Random alphanumeric identifiers from the thread-local RNG.
///
/// At the default length of 32 there are 62^32 possible values, so a
/// collision between live jobs is not a practical concern.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self, length: usize) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}

// ============================================================================
// Registry
// ============================================================================

type SharedJob<V> = Arc<Mutex<Job<V>>>;

/// Map from request identifier to job.
pub struct JobRegistry<V> {
    jobs: RwLock<HashMap<String, SharedJob<V>>>,
    options: JobRegistryOptions,
    ids: Box<dyn IdGenerator>,
}

impl<V> JobRegistry<V>
where
    V: Clone + Send + 'static,
{
    pub fn new(options: JobRegistryOptions) -> Self {
        Self::with_id_generator(options, RandomIdGenerator)
    }

    pub fn with_id_generator(options: JobRegistryOptions, ids: impl IdGenerator + 'static) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            options,
            ids: Box::new(ids),
        }
    }

    pub fn options(&self) -> &JobRegistryOptions {
        &self.options
    }

    /// Takes ownership of an already started fetch and returns the identifier
    /// it can be polled under.
    ///
    /// The job is drained once before it becomes visible, so anything the
    /// source produced synchronously is available to the first poll.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Registration`] if the configured identifier length
    /// is zero or no unused identifier could be drawn.
    pub async fn register(&self, stream: FetchStream<V>) -> Result<String, JobError> {
        if self.options.identifier_length == 0 {
            return Err(JobError::Registration(
                "identifier length must be greater than zero".to_string(),
            ));
        }

        let mut job = Job::new(stream);
        let fresh_errors = job.drain();

        let mut jobs = self.jobs.write().await;
        let id = self.unused_id(&jobs)?;
        log_fresh_errors(&id, job.errors(), fresh_errors);
        jobs.insert(id.clone(), Arc::new(Mutex::new(job)));

        info!(request_id = %id, live_jobs = jobs.len(), "Registered vulnerability job");
        Ok(id)
    }

    fn unused_id(&self, jobs: &HashMap<String, SharedJob<V>>) -> Result<String, JobError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.generate(self.options.identifier_length);
            if !id.is_empty() && !jobs.contains_key(&id) {
                return Ok(id);
            }
        }

        Err(JobError::Registration(format!(
            "no unused identifier after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    /// Collects whatever the job's source has produced since the last poll
    /// and returns everything gathered so far.
    ///
    /// Never waits on the source. Waits on another poll of the same job only
    /// for as long as that poll takes to copy out its buffers.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if `id` is unknown or was evicted.
    pub async fn retrieve(&self, id: &str) -> Result<JobSnapshot<V>, JobError> {
        let job = self
            .jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let mut job = job.lock().await;
        let fresh_errors = job.drain();
        log_fresh_errors(id, job.errors(), fresh_errors);
        job.touch(Instant::now());
        let snapshot = job.snapshot();

        debug!(
            request_id = %id,
            records = snapshot.records.len(),
            errors = snapshot.errors.len(),
            done = snapshot.done,
            "Retrieved vulnerability job"
        );
        Ok(snapshot)
    }

    /// Discards finished jobs that have been idle for at least the eviction
    /// threshold. Returns how many were removed.
    ///
    /// Jobs are drained first so a fetch that completed while nobody was
    /// polling can still be recognized as finished. Jobs locked by an
    /// in-progress poll are left for the next sweep.
    pub async fn sweep(&self) -> usize {
        let Some(threshold) = self.options.eviction_threshold() else {
            return 0;
        };

        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();

        jobs.retain(|id, job| match job.try_lock() {
            Ok(mut job) => {
                let fresh_errors = job.drain();
                log_fresh_errors(id, job.errors(), fresh_errors);
                if job.is_evictable(now, threshold) {
                    info!(request_id = %id, "Evicting idle vulnerability job");
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });

        before - jobs.len()
    }

    /// Starts the periodic eviction sweep.
    ///
    /// Returns `None` when eviction is disabled. The task only holds a weak
    /// reference and stops on its own once the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<SweeperHandle> {
        self.options.eviction_threshold()?;

        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.options.sweep_interval.max(MIN_SWEEP_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(registry) = registry.upgrade() else {
                    debug!("Job registry dropped, stopping sweeper");
                    break;
                };

                let evicted = registry.sweep().await;
                if evicted > 0 {
                    debug!(evicted, "Job sweep completed");
                }
            }
        });

        info!(interval_secs = period.as_secs(), "Started job eviction sweeper");
        Some(SweeperHandle { handle })
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

/// Each fetch error is logged once, by whichever drain collected it.
fn log_fresh_errors(request_id: &str, errors: &[FetchError], fresh: usize) {
    for error in &errors[errors.len() - fresh..] {
        warn!(request_id = %request_id, error = %error, "Vulnerability fetch reported an error");
    }
}

/// Handle to the background sweep. Dropping it stops the sweep.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn shutdown(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
