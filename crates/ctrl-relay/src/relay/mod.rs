use std::sync::Arc;

use ctrl_core::{CompletionChannel, JobSubstrate, SubstrateError};
use ctrl_model::{ExecutionResult, ExecutionStatus, JobEvent, JobEventKind};
use taskvisor::{BackoffPolicy, JitterPolicy, RestartPolicy, TaskError, TaskFn, TaskRef, TaskSpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{config::RelayConfig, errors::RelayError};

/// What a job event means for its activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    Heartbeat,
    Complete {
        status: ExecutionStatus,
        message: Option<String>,
    },
}

/// Map one job event to a completion-channel call.
///
/// A finished status wins over the event kind, so an `add` replayed for an already
/// finished job after a watch restart still completes it.
pub fn classify(event: &JobEvent) -> RelayAction {
    match event.kind {
        JobEventKind::Delete => RelayAction::Complete {
            status: ExecutionStatus::Terminated,
            message: None,
        },
        JobEventKind::Error => RelayAction::Complete {
            status: ExecutionStatus::Failure,
            message: Some(
                event
                    .message
                    .clone()
                    .unwrap_or_else(|| "job reported an error".to_string()),
            ),
        },
        JobEventKind::Add | JobEventKind::Change if event.status.succeeded => {
            RelayAction::Complete {
                status: ExecutionStatus::Success,
                message: None,
            }
        }
        JobEventKind::Add | JobEventKind::Change if event.status.failed => RelayAction::Complete {
            status: ExecutionStatus::Failure,
            message: Some(
                event
                    .message
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
            ),
        },
        JobEventKind::Add | JobEventKind::Change => RelayAction::Heartbeat,
    }
}

/// Outcome of [`CompletionRelay::handle_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Heartbeat,
    Completed(ExecutionStatus),
    /// The addressed activity was no longer registered.
    NotFound,
    /// The job does not carry our labels.
    Foreign,
    /// Delivery failed for another reason; the event is lost.
    Dropped,
}

/// Name of the supervised relay task.
pub const RELAY_TASK: &str = "ctrl-relay-watch";

/// Watches the substrate and reports job outcomes into the completion channel.
pub struct CompletionRelay {
    substrate: Arc<dyn JobSubstrate>,
    completions: Arc<dyn CompletionChannel>,
    cfg: RelayConfig,
}

impl CompletionRelay {
    pub fn new(
        substrate: Arc<dyn JobSubstrate>,
        completions: Arc<dyn CompletionChannel>,
        cfg: RelayConfig,
    ) -> Result<Self, RelayError> {
        cfg.validate()?;
        Ok(Self {
            substrate,
            completions,
            cfg,
        })
    }

    /// Supervised task spec running watch sessions back to back.
    ///
    /// A session that fails or ends is retried after `restart_delay`; one bad stream never
    /// stops observation of the other jobs.
    pub fn task_spec(self: Arc<Self>) -> TaskSpec {
        let delay = self.cfg.restart_delay;
        let backoff = BackoffPolicy {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        };

        let relay = self;
        let task: TaskRef = TaskFn::arc(RELAY_TASK, move |ctx: CancellationToken| {
            let relay = Arc::clone(&relay);

            async move {
                if ctx.is_cancelled() {
                    return Err(TaskError::Canceled);
                }
                match relay.watch_once(&ctx).await {
                    Ok(()) => {
                        debug!("relay stopped");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, delay = ?delay, "job watch lost; restarting");
                        Err(TaskError::Fail {
                            reason: e.to_string(),
                        })
                    }
                }
            }
        });
        TaskSpec::new(task, RestartPolicy::OnFailure, backoff, None)
    }

    /// One watch session: relay events until `cancel` fires (`Ok`) or the stream fails
    /// or ends (`Err`).
    #[instrument(level = "info", skip_all, fields(namespace = %self.cfg.namespace, substrate = self.substrate.name()))]
    pub async fn watch_once(&self, cancel: &CancellationToken) -> Result<(), RelayError> {
        let mut events = self.substrate.watch(&self.cfg.namespace).await?;
        info!("job watch started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                item = events.recv() => match item {
                    Some(Ok(event)) => {
                        self.handle_event(&event).await;
                    }
                    Some(Err(e)) => return Err(RelayError::Watch(e)),
                    None => {
                        return Err(RelayError::Watch(SubstrateError::Watch(
                            "stream ended".into(),
                        )));
                    }
                }
            }
        }
    }

    /// Translate and deliver one event. Never fails: every outcome is logged.
    pub async fn handle_event(&self, event: &JobEvent) -> Handled {
        match self.deliver(event).await {
            Ok(RelayAction::Heartbeat) => Handled::Heartbeat,
            Ok(RelayAction::Complete { status, .. }) => Handled::Completed(status),
            Err(RelayError::Labels(e)) => {
                debug!(job = %event.name, reason = %e, "skipping job without our labels");
                Handled::Foreign
            }
            Err(RelayError::Delivery(e)) if e.is_not_found() => {
                warn!(job = %event.name, kind = ?event.kind, error = %e, "activity no longer tracked");
                Handled::NotFound
            }
            Err(e) => {
                error!(job = %event.name, kind = ?event.kind, error = %e, "event dropped");
                Handled::Dropped
            }
        }
    }

    async fn deliver(&self, event: &JobEvent) -> Result<RelayAction, RelayError> {
        let labels = event.job_labels()?;
        let action = classify(event);

        match &action {
            RelayAction::Heartbeat => {
                trace!(job = %event.name, activity = %labels.activity_id, "heartbeat");
                self.completions
                    .heartbeat(&labels.run_id, &labels.activity_id)
                    .await?;
            }
            RelayAction::Complete { status, message } => {
                let result = ExecutionResult {
                    id: labels.test_unit_id.clone(),
                    status: *status,
                    message: message.clone(),
                };
                self.completions
                    .complete(&labels.run_id, &labels.activity_id, result)
                    .await?;
                debug!(
                    job = %event.name,
                    activity = %labels.activity_id,
                    status = status.as_str(),
                    "activity completed"
                );
            }
        }
        Ok(action)
    }
}
