pub mod config;
pub mod job;
pub mod logging;
pub mod model;
pub mod registry;
pub mod server;
pub mod service;
pub mod traits;

// Re-export common types for convenience
pub use job::{Job, JobSnapshot};
pub use model::*;
pub use registry::{
    IdGenerator, JobError, JobRegistry, JobRegistryOptions, RandomIdGenerator, SweeperHandle,
};
pub use service::{ServiceError, VulnerabilityService};
pub use traits::*;
