//! Event loop around [`SchedulerState`] for one environment run.
//!
//! Every mutation goes through one ordered channel: environment messages from the
//! [`ControllerHandle`], results from runner tasks, skip results and status queries.
//! Parallelism is confined to the dispatched runners.
use std::{collections::HashMap, sync::Arc, time::Instant};

use ctrl_model::{Environment, EnvironmentId, ExecutionResult, JobLabels, RunId, TestUnitId};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    completion::ActivityRegistry,
    error::CoreError,
    runner::{RunnerConfig, RunnerHandle, TestRunner},
    semaphore::{Acquire, BoundedSemaphore, SemaphorePermit},
    state::{Effect, EventLog, Phase, Route, SchedulerEvent, SchedulerState},
    substrate::JobSubstrate,
};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Capacity of the controller's inbound channel.
    pub event_buffer: usize,
    /// Bulk-delete the environment's jobs on entering PAUSED.
    pub terminate_jobs_on_pause: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            event_buffer: 1024,
            terminate_jobs_on_pause: true,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.event_buffer == 0 {
            return Err(CoreError::InvalidArgument(
                "event_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Collaborators shared by every controller.
#[derive(Clone)]
pub struct ControllerDeps {
    pub substrate: Arc<dyn JobSubstrate>,
    pub completions: ActivityRegistry,
    pub runner: RunnerConfig,
}

/// Point-in-time view of a running controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub environment_id: EnvironmentId,
    pub run_id: RunId,
    pub phase: Phase,
    pub max_parallelism: u32,
    pub total_expected: usize,
    pub paused_count: usize,
    pub waiting: usize,
    pub live: usize,
    pub results: Vec<ExecutionResult>,
}

enum ControlMsg {
    Update {
        env: Environment,
        ack: Option<oneshot::Sender<()>>,
    },
    Result {
        ticket: Option<u64>,
        result: ExecutionResult,
    },
    Status(oneshot::Sender<ControllerStatus>),
}

/// Sending side of a controller.
#[derive(Clone)]
pub struct ControllerHandle {
    env_id: EnvironmentId,
    run_id: RunId,
    tx: mpsc::Sender<ControlMsg>,
}

impl ControllerHandle {
    pub fn environment_id(&self) -> &str {
        &self.env_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Deliver an `UpdateEnvironment` message.
    ///
    /// Returns once the controller has applied it. Fails with [`CoreError::ChannelClosed`]
    /// if the run finished before the message was applied.
    pub async fn update(&self, env: Environment) -> Result<(), CoreError> {
        env.validate()?;
        if env.id != self.env_id {
            return Err(CoreError::InvalidArgument(format!(
                "message for '{}' sent to controller of '{}'",
                env.id, self.env_id
            )));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(ControlMsg::Update {
                env: env.normalized(),
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| self.closed())?;
        ack_rx.await.map_err(|_| self.closed())
    }

    pub async fn status(&self) -> Result<ControllerStatus, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(ControlMsg::Status(tx))
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn closed(&self) -> CoreError {
        CoreError::ChannelClosed(self.env_id.clone())
    }
}

/// Single-threaded scheduler for one environment run.
pub struct EnvironmentController {
    env_id: EnvironmentId,
    run_id: RunId,
    cfg: ControllerConfig,
    namespace: String,

    state: SchedulerState,
    log: EventLog,

    semaphore: BoundedSemaphore,
    pending: Option<Acquire>,
    runner: TestRunner,
    substrate: Arc<dyn JobSubstrate>,

    live: HashMap<u64, (TestUnitId, RunnerHandle)>,
    next_ticket: u64,

    rx: mpsc::Receiver<ControlMsg>,
    tx: mpsc::Sender<ControlMsg>,
}

impl EnvironmentController {
    /// Build a controller whose first message is `initial`.
    pub fn new(
        initial: Environment,
        cfg: ControllerConfig,
        deps: ControllerDeps,
    ) -> Result<(Self, ControllerHandle), CoreError> {
        cfg.validate()?;
        deps.runner.validate()?;
        initial.validate()?;
        let initial = initial.normalized();

        let env_id = initial.id.clone();
        let run_id = uuid::Uuid::new_v4().to_string();

        // Zero is a legal ceiling but not a legal construction size.
        let semaphore = BoundedSemaphore::new(initial.max_parallelism.max(1) as usize)?;
        semaphore.resize(initial.max_parallelism as usize);

        let (tx, rx) = mpsc::channel(cfg.event_buffer);
        tx.try_send(ControlMsg::Update {
            env: initial,
            ack: None,
        })
        .map_err(|_| CoreError::ChannelClosed(env_id.clone()))?;

        let handle = ControllerHandle {
            env_id: env_id.clone(),
            run_id: run_id.clone(),
            tx: tx.clone(),
        };

        let ctrl = Self {
            namespace: deps.runner.job.namespace.clone(),
            runner: TestRunner::new(deps.substrate.clone(), deps.completions, deps.runner),
            substrate: deps.substrate,
            env_id,
            run_id,
            cfg,
            state: SchedulerState::new(),
            log: EventLog::new(),
            semaphore,
            pending: None,
            live: HashMap::new(),
            next_ticket: 0,
            rx,
            tx,
        };
        Ok((ctrl, handle))
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            env_id: self.env_id.clone(),
            run_id: self.run_id.clone(),
            tx: self.tx.clone(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run on a background task.
    pub fn spawn(self) -> JoinHandle<Result<Vec<ExecutionResult>, CoreError>> {
        tokio::spawn(self.run())
    }

    /// Drive the run to completion and return every result in completion order.
    #[instrument(level = "info", skip_all, fields(env = %self.env_id, run = %self.run_id))]
    pub async fn run(mut self) -> Result<Vec<ExecutionResult>, CoreError> {
        let started = Instant::now();
        info!("environment run started");

        let out = self.event_loop().await;
        self.shutdown();

        match &out {
            Ok(results) => info!(
                results = results.len(),
                events = self.log.len(),
                elapsed = ?started.elapsed(),
                "environment run finished"
            ),
            Err(e) => error!(
                error = %e,
                elapsed = ?started.elapsed(),
                "environment run aborted"
            ),
        }
        out
    }

    async fn event_loop(&mut self) -> Result<Vec<ExecutionResult>, CoreError> {
        loop {
            self.pump()?;
            if self.state.phase() == Phase::Done {
                return Ok(self.state.results().to_vec());
            }

            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.on_message(msg)?,
                    None => return Err(CoreError::ChannelClosed(self.env_id.clone())),
                },
                permit = next_permit(&mut self.pending) => {
                    self.pending = None;
                    self.dispatch_head(permit)?;
                }
            }
        }
    }

    /// Drain the waiting queue as far as the current phase and ceiling allow.
    fn pump(&mut self) -> Result<(), CoreError> {
        loop {
            match self.state.next_route() {
                None => {
                    self.pending = None;
                    return Ok(());
                }
                Some(Route::Skip) => {
                    self.pending = None;
                    self.skip_head()?;
                }
                Some(Route::Dispatch) => {
                    if self.pending.is_some() {
                        return Ok(());
                    }
                    match self.semaphore.try_acquire() {
                        Some(permit) => self.dispatch_head(permit)?,
                        None => {
                            trace!(
                                held = self.semaphore.held(),
                                capacity = self.semaphore.capacity(),
                                "ceiling reached; waiting for a slot"
                            );
                            self.pending = Some(self.semaphore.acquire());
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn skip_head(&mut self) -> Result<(), CoreError> {
        let unit = self.head()?;
        self.apply(SchedulerEvent::Pulled {
            unit: unit.id.clone(),
            route: Route::Skip,
        })?;
        debug!(unit = %unit.id, "skip");

        // Delivered through the channel so it queues behind messages already sent.
        let result = self.runner.skip(&unit);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx
                .send(ControlMsg::Result {
                    ticket: None,
                    result,
                })
                .await;
        });
        Ok(())
    }

    fn dispatch_head(&mut self, permit: SemaphorePermit) -> Result<(), CoreError> {
        let unit = self.head()?;
        self.apply(SchedulerEvent::Pulled {
            unit: unit.id.clone(),
            route: Route::Dispatch,
        })?;

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let handle = RunnerHandle::new();
        self.live.insert(ticket, (unit.id.clone(), handle.clone()));
        debug!(unit = %unit.id, ticket, "dispatch");

        let runner = self.runner.clone();
        let run_id = self.run_id.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = runner.run(&unit, &run_id, handle.token()).await;
            let _ = tx
                .send(ControlMsg::Result {
                    ticket: Some(ticket),
                    result,
                })
                .await;
            drop(permit);
        });
        Ok(())
    }

    fn head(&self) -> Result<ctrl_model::TestUnit, CoreError> {
        self.state
            .head()
            .cloned()
            .ok_or_else(|| CoreError::Invariant("waiting queue is empty".into()))
    }

    fn on_message(&mut self, msg: ControlMsg) -> Result<(), CoreError> {
        match msg {
            ControlMsg::Update { env, ack } => {
                debug!(
                    tests = env.tests.len(),
                    max_parallelism = env.max_parallelism,
                    r#continue = env.r#continue,
                    "environment message"
                );
                self.apply(SchedulerEvent::Reconfigured(env))?;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            ControlMsg::Result { ticket, result } => {
                if let Some(ticket) = ticket {
                    self.live.remove(&ticket);
                }
                debug!(unit = %result.id, status = result.status.as_str(), "result");
                self.apply(SchedulerEvent::ResultArrived(result))?;
            }
            ControlMsg::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
        Ok(())
    }

    fn apply(&mut self, event: SchedulerEvent) -> Result<(), CoreError> {
        let effects = self.state.apply(&event)?;
        self.log.append(event);
        for effect in effects {
            self.carry_out(effect);
        }
        Ok(())
    }

    fn carry_out(&mut self, effect: Effect) {
        match effect {
            Effect::Resize(n) => self.semaphore.resize(n as usize),
            Effect::TerminateLive(ids) => {
                for (unit, handle) in self.live.values() {
                    if ids.contains(unit) {
                        handle.terminate();
                    }
                }
                debug!(units = ids.len(), "termination signalled");
            }
            Effect::BulkTerminate => {
                if self.cfg.terminate_jobs_on_pause {
                    self.bulk_terminate();
                }
            }
            Effect::Transition { from, to } => info!(%from, %to, "phase transition"),
            Effect::Finished => debug!("all admitted units accounted for"),
        }
    }

    fn bulk_terminate(&self) {
        let substrate = Arc::clone(&self.substrate);
        let namespace = self.namespace.clone();
        let selector = JobLabels::environment_selector(&self.env_id);
        tokio::spawn(async move {
            match substrate.delete_jobs_by_label(&namespace, &selector).await {
                Ok(n) => debug!(?selector, deleted = n, "environment jobs deleted"),
                Err(e) => warn!(?selector, error = %e, "bulk job deletion failed"),
            }
        });
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            environment_id: self.env_id.clone(),
            run_id: self.run_id.clone(),
            phase: self.state.phase(),
            max_parallelism: self.state.max_parallelism(),
            total_expected: self.state.total_expected(),
            paused_count: self.state.paused_count(),
            waiting: self.state.waiting_len(),
            live: self.state.live_len(),
            results: self.state.results().to_vec(),
        }
    }

    /// Refuse further messages and release anything still in flight.
    fn shutdown(&mut self) {
        self.rx.close();
        // Dropping queued messages drops their acks, so senders see the run as closed.
        while self.rx.try_recv().is_ok() {}
        self.pending = None;
        for (_, handle) in self.live.values() {
            handle.terminate();
        }
    }
}

async fn next_permit(pending: &mut Option<Acquire>) -> SemaphorePermit {
    match pending {
        Some(acquire) => acquire.await,
        None => std::future::pending().await,
    }
}

/// Run one environment from its first message to completion.
pub async fn run_environment_controller(
    initial: Environment,
    cfg: ControllerConfig,
    deps: ControllerDeps,
) -> Result<Vec<ExecutionResult>, CoreError> {
    let (ctrl, _handle) = EnvironmentController::new(initial, cfg, deps)?;
    ctrl.run().await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use ctrl_model::ExecutionStatus;

    use super::*;
    use crate::testutil::FakeSubstrate;

    fn deps(substrate: &Arc<FakeSubstrate>, registry: &ActivityRegistry) -> ControllerDeps {
        ControllerDeps {
            substrate: substrate.clone(),
            completions: registry.clone(),
            runner: RunnerConfig::default(),
        }
    }

    fn ids(results: &[ExecutionResult]) -> BTreeSet<String> {
        results.iter().map(|r| r.id.to_string()).collect()
    }

    fn status_of<'a>(results: &'a [ExecutionResult], id: &str) -> &'a ExecutionStatus {
        &results
            .iter()
            .find(|r| r.id.as_str() == id)
            .expect("result present")
            .status
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_run_returns_every_result() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::succeeding(registry.clone()));
        let env = Environment::new("e1", 2)
            .with_test("t1", 1)
            .with_test("t2", 1)
            .with_test("t3", 1);

        let results =
            run_environment_controller(env, ControllerConfig::default(), deps(&substrate, &registry))
                .await
                .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(ids(&results), BTreeSet::from(["t1".into(), "t2".into(), "t3".into()]));
        assert!(results.iter().all(|r| r.status == ExecutionStatus::Success));
        assert!(substrate.peak_running() <= 2);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_recorded_not_fatal() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::completing(registry.clone(), |spec| {
            let unit = spec.job_labels().unwrap().test_unit_id;
            let status = if unit.as_str() == "t2" {
                ExecutionStatus::Failure
            } else {
                ExecutionStatus::Success
            };
            Some((Duration::from_secs(1), status))
        }));
        let env = Environment::new("e1", 3)
            .with_test("t1", 1)
            .with_test("t2", 1)
            .with_test("t3", 1);

        let results =
            run_environment_controller(env, ControllerConfig::default(), deps(&substrate, &registry))
                .await
                .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(status_of(&results, "t2"), &ExecutionStatus::Failure);
        assert_eq!(status_of(&results, "t3"), &ExecutionStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_terminates_live_unit_and_skips_new_ones() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::completing(registry.clone(), |_| {
            Some((Duration::from_secs(5), ExecutionStatus::Success))
        }));
        let (ctrl, handle) = EnvironmentController::new(
            Environment::new("e1", 1).with_test("t1", 5),
            ControllerConfig::default(),
            deps(&substrate, &registry),
        )
        .unwrap();
        let join = ctrl.spawn();

        substrate.next_created().await;
        handle
            .update(Environment::new("e1", 1).with_test("t2", 1).paused())
            .await
            .unwrap();

        let results = join.await.unwrap().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(status_of(&results, "t1"), &ExecutionStatus::Terminated);
        assert_eq!(status_of(&results, "t2"), &ExecutionStatus::Skipped);
        assert_eq!(substrate.created_count(), 1);

        tokio::task::yield_now().await;
        assert_eq!(
            substrate.deletes(),
            vec![("ctrlplane".to_string(), JobLabels::environment_selector("e1"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_continue_skips_first_batch_only() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::succeeding(registry.clone()));
        let (ctrl, handle) = EnvironmentController::new(
            Environment::new("e1", 2)
                .with_test("t1", 1)
                .with_test("t2", 1)
                .paused(),
            ControllerConfig::default(),
            deps(&substrate, &registry),
        )
        .unwrap();
        let join = ctrl.spawn();

        handle
            .update(Environment::new("e1", 2).with_test("t3", 1))
            .await
            .unwrap();

        let results = join.await.unwrap().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(status_of(&results, "t1"), &ExecutionStatus::Skipped);
        assert_eq!(status_of(&results, "t2"), &ExecutionStatus::Skipped);
        assert_eq!(status_of(&results, "t3"), &ExecutionStatus::Success);
        assert_eq!(substrate.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_parallelism_holds_dispatch_until_resized() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::succeeding(registry.clone()));
        let (ctrl, handle) = EnvironmentController::new(
            Environment::new("e1", 0).with_test("t1", 1),
            ControllerConfig::default(),
            deps(&substrate, &registry),
        )
        .unwrap();
        let join = ctrl.spawn();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(substrate.created_count(), 0);
        let status = handle.status().await.unwrap();
        assert_eq!(status.waiting, 1);
        assert_eq!(status.max_parallelism, 0);
        assert_eq!(status.phase, Phase::Accepting);

        handle.update(Environment::new("e1", 1)).await.unwrap();
        let results = join.await.unwrap().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ExecutionStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn update_after_finish_reports_closed() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::succeeding(registry.clone()));
        let (ctrl, handle) = EnvironmentController::new(
            Environment::new("e1", 1).with_test("t1", 1),
            ControllerConfig::default(),
            deps(&substrate, &registry),
        )
        .unwrap();
        ctrl.spawn().await.unwrap().unwrap();

        let err = handle
            .update(Environment::new("e1", 1).with_test("t2", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ChannelClosed(id) if id == "e1"));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn update_for_other_environment_is_rejected() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::new());
        let (_ctrl, handle) = EnvironmentController::new(
            Environment::new("e1", 1),
            ControllerConfig::default(),
            deps(&substrate, &registry),
        )
        .unwrap();

        let err = handle.update(Environment::new("e2", 1)).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn invalid_initial_message_is_rejected() {
        let registry = ActivityRegistry::new();
        let substrate = Arc::new(FakeSubstrate::new());
        let res = EnvironmentController::new(
            Environment::new("  ", 1),
            ControllerConfig::default(),
            deps(&substrate, &registry),
        );
        assert!(matches!(res, Err(CoreError::InvalidArgument(_))));
    }
}
