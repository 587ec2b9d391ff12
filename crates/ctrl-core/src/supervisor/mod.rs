use std::{collections::HashMap, sync::Arc};

use ctrl_model::{Environment, EnvironmentId, ExecutionResult, RunId};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument};

use crate::{
    controller::{ControllerConfig, ControllerDeps, ControllerHandle, ControllerStatus, EnvironmentController},
    error::CoreError,
};

/// How a message reached its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A new run was started with the message as its first one.
    Started { run_id: RunId },
    /// The message was applied to the live run.
    Updated { run_id: RunId },
}

impl Delivery {
    pub fn run_id(&self) -> &str {
        match self {
            Delivery::Started { run_id } | Delivery::Updated { run_id } => run_id,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Delivery::Started { .. })
    }
}

/// Final record of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub environment_id: EnvironmentId,
    pub run_id: RunId,
    pub results: Vec<ExecutionResult>,
    /// Set when the run aborted instead of completing.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentStatus {
    Running(ControllerStatus),
    Finished(Arc<RunSummary>),
}

type Outcome = Option<Arc<RunSummary>>;

enum Slot {
    Running {
        handle: ControllerHandle,
        done: watch::Receiver<Outcome>,
    },
    Finished(Arc<RunSummary>),
}

/// Start-or-update front for environment controllers, one live run per environment id.
#[derive(Clone)]
pub struct EnvironmentControllers {
    cfg: ControllerConfig,
    deps: ControllerDeps,
    slots: Arc<Mutex<HashMap<EnvironmentId, Slot>>>,
}

impl EnvironmentControllers {
    pub fn new(cfg: ControllerConfig, deps: ControllerDeps) -> Self {
        Self {
            cfg,
            deps,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deliver `env` to its live run, or start a new run with `env` as the first message.
    ///
    /// A run that finishes while the message is in flight is replaced by a fresh one.
    #[instrument(level = "debug", skip_all, fields(env = %env.id))]
    pub async fn start_or_update(&self, env: Environment) -> Result<Delivery, CoreError> {
        env.validate()?;
        let env = env.normalized();
        let mut slots = self.slots.lock().await;

        if let Some(Slot::Running { handle, .. }) = slots.get(&env.id) {
            let handle = handle.clone();
            match handle.update(env.clone()).await {
                Ok(()) => {
                    return Ok(Delivery::Updated {
                        run_id: handle.run_id().to_string(),
                    });
                }
                Err(CoreError::ChannelClosed(_)) => {
                    debug!(run = %handle.run_id(), "run finished before update; starting a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let run_id = self.launch(&mut slots, env)?;
        Ok(Delivery::Started { run_id })
    }

    /// Start a run, failing if one is already live for the environment.
    pub async fn start(&self, env: Environment) -> Result<RunId, CoreError> {
        env.validate()?;
        let env = env.normalized();
        let mut slots = self.slots.lock().await;

        if let Some(Slot::Running { handle, .. }) = slots.get(&env.id) {
            if !handle.is_closed() {
                return Err(CoreError::AlreadyRunning(env.id));
            }
        }
        self.launch(&mut slots, env)
    }

    fn launch(
        &self,
        slots: &mut HashMap<EnvironmentId, Slot>,
        env: Environment,
    ) -> Result<RunId, CoreError> {
        let env_id = env.id.clone();
        let (ctrl, handle) = EnvironmentController::new(env, self.cfg.clone(), self.deps.clone())?;
        let run_id = handle.run_id().to_string();
        let (done_tx, done_rx) = watch::channel(None);

        slots.insert(
            env_id.clone(),
            Slot::Running {
                handle,
                done: done_rx,
            },
        );

        let reap = Arc::clone(&self.slots);
        let reap_run = run_id.clone();
        tokio::spawn(async move {
            let outcome = ctrl.run().await;
            let summary = Arc::new(match outcome {
                Ok(results) => RunSummary {
                    environment_id: env_id.clone(),
                    run_id: reap_run.clone(),
                    results,
                    error: None,
                },
                Err(e) => RunSummary {
                    environment_id: env_id.clone(),
                    run_id: reap_run.clone(),
                    results: Vec::new(),
                    error: Some(e.to_string()),
                },
            });
            let _ = done_tx.send(Some(Arc::clone(&summary)));

            let mut slots = reap.lock().await;
            let current = matches!(
                slots.get(&env_id),
                Some(Slot::Running { handle, .. }) if handle.run_id() == reap_run
            );
            if current {
                slots.insert(env_id, Slot::Finished(summary));
            }
        });

        info!(run = %run_id, "environment run launched");
        Ok(run_id)
    }

    /// Live snapshot of a running environment, or the summary of its last finished run.
    pub async fn status(&self, env_id: &str) -> Option<EnvironmentStatus> {
        let (handle, mut done) = {
            let slots = self.slots.lock().await;
            match slots.get(env_id)? {
                Slot::Finished(summary) => {
                    return Some(EnvironmentStatus::Finished(Arc::clone(summary)));
                }
                Slot::Running { handle, done } => (handle.clone(), done.clone()),
            }
        };

        match handle.status().await {
            Ok(status) => Some(EnvironmentStatus::Running(status)),
            // The run ended between lookup and query; its summary is about to be published.
            Err(_) => {
                let outcome = done.wait_for(Option::is_some).await.ok()?.clone();
                outcome.map(EnvironmentStatus::Finished)
            }
        }
    }

    /// Wait for the current run of `env_id` to finish.
    pub async fn wait(&self, env_id: &str) -> Option<Arc<RunSummary>> {
        let mut done = {
            let slots = self.slots.lock().await;
            match slots.get(env_id)? {
                Slot::Finished(summary) => return Some(Arc::clone(summary)),
                Slot::Running { done, .. } => done.clone(),
            }
        };
        let outcome = done.wait_for(Option::is_some).await.ok()?.clone();
        outcome
    }

    /// Results of the last finished run.
    pub async fn results(&self, env_id: &str) -> Option<Vec<ExecutionResult>> {
        match self.slots.lock().await.get(env_id)? {
            Slot::Finished(summary) => Some(summary.results.clone()),
            Slot::Running { .. } => None,
        }
    }

    /// Environment ids with a live run.
    pub async fn running(&self) -> Vec<EnvironmentId> {
        self.slots
            .lock()
            .await
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Running { handle, .. } if !handle.is_closed() => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}
