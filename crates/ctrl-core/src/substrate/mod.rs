use std::collections::BTreeMap;

use async_trait::async_trait;
use ctrl_model::{JobEvent, JobSpec};
use tokio::sync::mpsc;

use crate::error::SubstrateError;

/// One item of a job watch stream.
pub type WatchItem = Result<JobEvent, SubstrateError>;

/// Receiving end of a job watch. The stream ends when the sender is dropped.
pub type JobWatch = mpsc::Receiver<WatchItem>;

/// External system that runs one job per test unit.
///
/// Implementations own the actual execution. The controller only creates jobs, deletes
/// them in bulk by label, and lets the relay observe their lifecycle.
#[async_trait]
pub trait JobSubstrate: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Submit a job. Returns once the job has been accepted.
    async fn create_job(&self, spec: JobSpec) -> Result<(), SubstrateError>;

    /// Delete every job in `namespace` whose labels carry every pair of `selector`.
    ///
    /// Values match verbatim. An empty selector is rejected rather than matching every
    /// job. Returns the number of jobs removed.
    async fn delete_jobs_by_label(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<usize, SubstrateError>;

    /// Start watching job lifecycle events in `namespace`.
    async fn watch(&self, namespace: &str) -> Result<JobWatch, SubstrateError>;
}
