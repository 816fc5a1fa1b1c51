use crate::job::JobSnapshot;
use crate::model::{Platform, Vulnerability};
use crate::registry::{JobError, JobRegistry};
use crate::traits::{FetchError, VulnerabilitySource};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Failed to start vulnerability fetch: {0}")]
    Source(#[from] FetchError),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Starts vulnerability fetches and polls them through a shared registry.
#[derive(Clone)]
pub struct VulnerabilityService {
    source: Arc<dyn VulnerabilitySource>,
    jobs: Arc<JobRegistry<Vulnerability>>,
}

impl VulnerabilityService {
    pub fn new(
        source: Arc<dyn VulnerabilitySource>,
        jobs: Arc<JobRegistry<Vulnerability>>,
    ) -> Self {
        Self { source, jobs }
    }

    pub fn jobs(&self) -> &Arc<JobRegistry<Vulnerability>> {
        &self.jobs
    }

    /// Kicks off a fetch for `platform` and returns its request id along with
    /// whatever was available straight away.
    #[instrument(skip(self), fields(source = %self.source.name()))]
    pub async fn start(
        &self,
        platform: &Platform,
    ) -> Result<(String, JobSnapshot<Vulnerability>), ServiceError> {
        let stream = self.source.vulnerabilities(platform).await?;
        let request_id = self.jobs.register(stream).await?;

        info!(request_id = %request_id, namespace = platform.namespace(), "Started vulnerability fetch");

        let snapshot = self.jobs.retrieve(&request_id).await?;
        Ok((request_id, snapshot))
    }

    #[instrument(skip(self))]
    pub async fn poll(&self, request_id: &str) -> Result<JobSnapshot<Vulnerability>, ServiceError> {
        Ok(self.jobs.retrieve(request_id).await?)
    }
}
