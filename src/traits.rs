use crate::model::{Platform, Vulnerability};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Problems a vulnerability source hits while fetching.
///
/// Mid-stream these are collected next to the records rather than aborting
/// the fetch, so they need to be cheap to clone into snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Upstream request failed: {0}")]
    Upstream(String),
    #[error("Failed to decode upstream response: {0}")]
    Decode(String),
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Receiving half of a started fetch.
///
/// Records and errors arrive on independent channels; `done` fires once the
/// source will produce nothing further.
#[derive(Debug)]
pub struct FetchStream<V> {
    pub(crate) records: mpsc::UnboundedReceiver<V>,
    pub(crate) errors: mpsc::UnboundedReceiver<FetchError>,
    pub(crate) done: oneshot::Receiver<()>,
}

/// Producing half of a fetch, held by the source while it works.
#[derive(Debug)]
pub struct FetchSender<V> {
    records: mpsc::UnboundedSender<V>,
    errors: mpsc::UnboundedSender<FetchError>,
    done: oneshot::Sender<()>,
}

impl<V> FetchStream<V> {
    /// Creates a connected sender/stream pair.
    pub fn channel() -> (FetchSender<V>, FetchStream<V>) {
        let (records_tx, records_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        (
            FetchSender {
                records: records_tx,
                errors: errors_tx,
                done: done_tx,
            },
            FetchStream {
                records: records_rx,
                errors: errors_rx,
                done: done_rx,
            },
        )
    }
}

impl<V> FetchSender<V> {
    /// Returns `false` once nobody is listening anymore.
    pub fn send_record(&self, record: V) -> bool {
        self.records.send(record).is_ok()
    }

    /// Returns `false` once nobody is listening anymore.
    pub fn send_error(&self, error: FetchError) -> bool {
        self.errors.send(error).is_ok()
    }

    /// Signals completion. Consumes the sender so it can only happen once.
    pub fn finish(self) {
        let _ = self.done.send(());
    }
}

/// A database or scanner that can stream vulnerabilities for a platform.
#[async_trait]
pub trait VulnerabilitySource: Send + Sync {
    /// Returns the source name used in logs (e.g., "clair").
    fn name(&self) -> &str;

    /// Starts fetching vulnerabilities for `platform`.
    ///
    /// The fetch must already be producing when this returns; the caller only
    /// polls the returned stream.
    async fn vulnerabilities(
        &self,
        platform: &Platform,
    ) -> Result<FetchStream<Vulnerability>, FetchError>;
}
