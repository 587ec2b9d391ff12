use std::{sync::Arc, time::Duration};

use ctrl_model::{ExecutionResult, JobLabels, JobSpec, JobTemplate, TestUnit};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{
    completion::ActivityRegistry, error::CoreError, substrate::JobSubstrate,
};

/// Limits applied to every dispatched unit.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Upper bound on the wait for a unit's completion, measured from job creation.
    pub start_to_close: Duration,
    /// Fail a unit whose job has not heartbeated within this window. Off when `None`.
    pub heartbeat_timeout: Option<Duration>,
    pub job: JobTemplate,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(60 * 60),
            heartbeat_timeout: None,
            job: JobTemplate::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.start_to_close.is_zero() {
            return Err(CoreError::InvalidArgument(
                "start_to_close must be positive".into(),
            ));
        }
        if self.heartbeat_timeout.is_some_and(|d| d.is_zero()) {
            return Err(CoreError::InvalidArgument(
                "heartbeat_timeout must be positive when set".into(),
            ));
        }
        if self.job.namespace.trim().is_empty() {
            return Err(CoreError::InvalidArgument("job namespace is empty".into()));
        }
        if self.job.image.trim().is_empty() {
            return Err(CoreError::InvalidArgument("job image is empty".into()));
        }
        Ok(())
    }
}

/// Cooperative termination signal for one dispatched unit.
///
/// Terminating is idempotent and has no effect once the unit has resolved.
#[derive(Debug, Clone, Default)]
pub struct RunnerHandle {
    token: CancellationToken,
}

impl RunnerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.token.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token the runner observes.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Runs one test unit as one external job and waits for its outcome.
#[derive(Clone)]
pub struct TestRunner {
    substrate: Arc<dyn JobSubstrate>,
    completions: ActivityRegistry,
    cfg: Arc<RunnerConfig>,
}

impl TestRunner {
    pub fn new(
        substrate: Arc<dyn JobSubstrate>,
        completions: ActivityRegistry,
        cfg: RunnerConfig,
    ) -> Self {
        Self {
            substrate,
            completions,
            cfg: Arc::new(cfg),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.cfg
    }

    /// Create the unit's job and resolve to exactly one result.
    ///
    /// - completion reported through the registry wins over everything else;
    /// - `terminate` resolves to TERMINATED;
    /// - job creation errors and timeouts resolve to FAILURE.
    #[instrument(
        level = "debug",
        skip_all,
        fields(env = %unit.environment_id, unit = %unit.id, run = %run_id)
    )]
    pub async fn run(
        &self,
        unit: &TestUnit,
        run_id: &str,
        terminate: CancellationToken,
    ) -> ExecutionResult {
        if terminate.is_cancelled() {
            debug!(target: "ctrl.core.runner", "terminated before dispatch");
            return ExecutionResult::terminated(unit.id.clone());
        }

        let activity_id = uuid::Uuid::new_v4().to_string();
        let labels = JobLabels {
            activity_id: activity_id.clone(),
            environment_id: unit.environment_id.clone(),
            test_unit_id: unit.id.clone(),
            run_id: run_id.to_string(),
        };
        let pending = self.completions.register(run_id, activity_id.as_str());
        let key = pending.key.clone();
        let mut completion = pending.completion;
        let mut heartbeats = pending.heartbeats;

        let spec = JobSpec::for_unit(unit, &labels, &self.cfg.job);
        trace!(target: "ctrl.core.runner", job = %spec.name, activity = %activity_id, "create job");
        if let Err(e) = self.substrate.create_job(spec).await {
            self.completions.cancel(&key);
            warn!(target: "ctrl.core.runner", substrate = self.substrate.name(), error = %e, "job creation failed");
            return ExecutionResult::failure(unit.id.clone(), e.to_string());
        }

        let started = Instant::now();
        let close_deadline = started + self.cfg.start_to_close;
        let mut heartbeat_deadline = self.cfg.heartbeat_timeout.map(|d| started + d);
        let mut heartbeats_open = true;

        let result = loop {
            tokio::select! {
                biased;

                res = &mut completion => {
                    break match res {
                        Ok(mut r) => {
                            r.id = unit.id.clone();
                            r
                        }
                        Err(_) => ExecutionResult::failure(unit.id.clone(), "completion channel closed"),
                    };
                }
                _ = terminate.cancelled() => {
                    debug!(target: "ctrl.core.runner", "termination requested");
                    break ExecutionResult::terminated(unit.id.clone());
                }
                changed = heartbeats.changed(), if heartbeats_open => {
                    match changed {
                        Ok(()) => {
                            trace!(target: "ctrl.core.runner", "heartbeat");
                            heartbeat_deadline = self.cfg.heartbeat_timeout.map(|d| Instant::now() + d);
                        }
                        Err(_) => heartbeats_open = false,
                    }
                }
                _ = sleep_until(heartbeat_deadline.unwrap_or(close_deadline)), if heartbeat_deadline.is_some() => {
                    warn!(target: "ctrl.core.runner", "no heartbeat within window");
                    break ExecutionResult::failure(unit.id.clone(), "heartbeat timeout");
                }
                _ = sleep_until(close_deadline) => {
                    warn!(target: "ctrl.core.runner", timeout = ?self.cfg.start_to_close, "unit did not complete in time");
                    break ExecutionResult::failure(unit.id.clone(), "timed out");
                }
            }
        };

        self.completions.cancel(&key);
        debug!(target: "ctrl.core.runner", status = result.status.as_str(), "unit resolved");
        result
    }

    /// Resolve a unit without dispatching it.
    pub fn skip(&self, unit: &TestUnit) -> ExecutionResult {
        ExecutionResult::skipped(unit.id.clone())
    }
}
