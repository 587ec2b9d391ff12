//! Pure scheduling reducer.
//!
//! [`SchedulerState::apply`] folds one [`SchedulerEvent`] into the state and returns the
//! [`Effect`]s the event loop must carry out. It performs no I/O, so a recorded
//! [`EventLog`] replays into an identical state.
//!
//! ## Phases
//! ```text
//! ACCEPTING --(continue=false)--> PAUSED
//! PAUSED --(continue=true | paused segment fully accounted)--> ACCEPTING
//! ACCEPTING --(results == total_expected > 0)--> FINALIZING --> DONE
//! ```
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use ctrl_model::{Environment, ExecutionResult, ExecutionStatus, TestUnit, TestUnitId};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Normal intake and dispatch.
    #[default]
    Accepting,
    /// Intake continues, dispatch is replaced by skipping, live units are being terminated.
    Paused,
    /// Nothing more is admitted.
    Finalizing,
    /// Terminal.
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Accepting => "ACCEPTING",
            Phase::Paused => "PAUSED",
            Phase::Finalizing => "FINALIZING",
            Phase::Done => "DONE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a unit pulled from the waiting queue goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dispatch,
    Skip,
}

/// Input of the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// An inbound environment message.
    Reconfigured(Environment),
    /// The queue head left the queue along `route`.
    Pulled { unit: TestUnitId, route: Route },
    /// A unit produced its terminal result.
    ResultArrived(ExecutionResult),
}

/// Output of the reducer, carried out by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Resize(u32),
    /// Signal termination to these live units.
    TerminateLive(Vec<TestUnitId>),
    /// Delete every external job of the environment.
    BulkTerminate,
    Transition { from: Phase, to: Phase },
    /// The run is complete; `results` is final.
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerState {
    phase: Phase,
    total_expected: usize,
    paused_count: usize,
    max_parallelism: u32,
    results: Vec<ExecutionResult>,
    waiting: VecDeque<TestUnit>,
    live: BTreeMap<TestUnitId, u32>,
    skipping: BTreeMap<TestUnitId, u32>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state by folding `events` from scratch.
    pub fn replay<'a, I>(events: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = &'a SchedulerEvent>,
    {
        let mut state = Self::new();
        for ev in events {
            state.apply(ev)?;
        }
        Ok(state)
    }

    /// Fold one event.
    ///
    /// Errors only on sequences the event loop can never produce; the state is left
    /// untouched in that case.
    pub fn apply(&mut self, event: &SchedulerEvent) -> Result<Vec<Effect>, CoreError> {
        match event {
            SchedulerEvent::Reconfigured(env) => Ok(self.reconfigure(env)),
            SchedulerEvent::Pulled { unit, route } => self.pull(unit, *route).map(|()| Vec::new()),
            SchedulerEvent::ResultArrived(result) => self.record(result),
        }
    }

    fn reconfigure(&mut self, env: &Environment) -> Vec<Effect> {
        if self.phase == Phase::Done {
            return Vec::new();
        }

        let mut effects = vec![Effect::Resize(env.max_parallelism)];
        self.max_parallelism = env.max_parallelism;
        let added = env.tests.len();

        if env.r#continue {
            if self.phase == Phase::Paused {
                self.resume(&mut effects);
            }
            self.total_expected += added;
        } else {
            self.paused_count += added;
            if self.phase != Phase::Paused {
                effects.push(self.transition(Phase::Paused));
                effects.push(Effect::BulkTerminate);
            }
            if !self.live.is_empty() {
                effects.push(Effect::TerminateLive(self.live.keys().cloned().collect()));
            }
        }

        self.waiting.extend(env.tests.iter().cloned());
        self.finish_if_complete(&mut effects);
        effects
    }

    fn pull(&mut self, unit: &TestUnitId, route: Route) -> Result<(), CoreError> {
        let expected = self.next_route();
        let head = self
            .waiting
            .front()
            .ok_or_else(|| CoreError::Invariant(format!("pulled '{unit}' from an empty queue")))?;
        if &head.id != unit {
            return Err(CoreError::Invariant(format!(
                "pulled '{unit}' but queue head is '{}'",
                head.id
            )));
        }
        if Some(route) != expected {
            return Err(CoreError::Invariant(format!(
                "'{unit}' routed to {route:?} while {}",
                self.phase
            )));
        }

        self.waiting.pop_front();
        let slot = match route {
            Route::Dispatch => &mut self.live,
            Route::Skip => &mut self.skipping,
        };
        *slot.entry(unit.clone()).or_default() += 1;
        Ok(())
    }

    fn record(&mut self, result: &ExecutionResult) -> Result<Vec<Effect>, CoreError> {
        if self.phase == Phase::Done {
            return Err(CoreError::Invariant(format!(
                "result for '{}' after the run finished",
                result.id
            )));
        }
        if self.results.len() >= self.total_expected + self.paused_count {
            return Err(CoreError::Invariant(format!(
                "result for '{}' exceeds the {} admitted units",
                result.id,
                self.total_expected + self.paused_count
            )));
        }

        let pending = match result.status {
            ExecutionStatus::Skipped => &mut self.skipping,
            _ => &mut self.live,
        };
        let remaining = match pending.get_mut(&result.id) {
            Some(n) => {
                *n -= 1;
                *n
            }
            None => {
                return Err(CoreError::Invariant(format!(
                    "{} result for '{}' which is not in flight",
                    result.status.as_str(),
                    result.id
                )));
            }
        };
        if remaining == 0 {
            pending.remove(&result.id);
        }

        self.results.push(result.clone());

        let mut effects = Vec::new();
        if self.phase == Phase::Paused
            && self.results.len() == self.total_expected + self.paused_count
        {
            self.resume(&mut effects);
        }
        self.finish_if_complete(&mut effects);
        Ok(effects)
    }

    fn resume(&mut self, effects: &mut Vec<Effect>) {
        self.total_expected += std::mem::take(&mut self.paused_count);
        effects.push(self.transition(Phase::Accepting));
    }

    fn finish_if_complete(&mut self, effects: &mut Vec<Effect>) {
        if self.is_complete() {
            effects.push(self.transition(Phase::Finalizing));
            effects.push(self.transition(Phase::Done));
            effects.push(Effect::Finished);
        }
    }

    fn transition(&mut self, to: Phase) -> Effect {
        let from = std::mem::replace(&mut self.phase, to);
        Effect::Transition { from, to }
    }

    /// Route the queue head would take right now, if there is one.
    pub fn next_route(&self) -> Option<Route> {
        self.waiting.front()?;
        match self.phase {
            Phase::Accepting => Some(Route::Dispatch),
            Phase::Paused => Some(Route::Skip),
            Phase::Finalizing | Phase::Done => None,
        }
    }

    pub fn head(&self) -> Option<&TestUnit> {
        self.waiting.front()
    }

    /// `true` iff not paused, something was admitted and everything admitted has a result.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Accepting
            && self.total_expected > 0
            && self.total_expected == self.results.len()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn total_expected(&self) -> usize {
        self.total_expected
    }

    pub fn paused_count(&self) -> usize {
        self.paused_count
    }

    pub fn max_parallelism(&self) -> u32 {
        self.max_parallelism
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ExecutionResult> {
        self.results
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Dispatched units still without a result.
    pub fn live_len(&self) -> usize {
        self.live.values().map(|n| *n as usize).sum()
    }

    pub fn is_live(&self, id: &TestUnitId) -> bool {
        self.live.contains_key(id)
    }
}

/// Append-only record of applied events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<SchedulerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: SchedulerEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchedulerEvent> {
        self.events.iter()
    }

    pub fn replay(&self) -> Result<SchedulerState, CoreError> {
        SchedulerState::replay(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(max: u32, ids: &[&str]) -> Environment {
        ids.iter()
            .fold(Environment::new("e1", max), |e, id| e.with_test(id, 1))
    }

    fn pulled(id: &str, route: Route) -> SchedulerEvent {
        SchedulerEvent::Pulled {
            unit: TestUnitId::from(id),
            route,
        }
    }

    fn result(r: ExecutionResult) -> SchedulerEvent {
        SchedulerEvent::ResultArrived(r)
    }

    /// Apply and keep a log, like the event loop does.
    struct Harness {
        state: SchedulerState,
        log: EventLog,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                state: SchedulerState::new(),
                log: EventLog::new(),
            }
        }

        fn apply(&mut self, ev: SchedulerEvent) -> Vec<Effect> {
            let effects = self.state.apply(&ev).unwrap();
            self.log.append(ev);
            effects
        }
    }

    #[test]
    fn continue_message_admits_units_and_resizes() {
        let mut h = Harness::new();
        let effects = h.apply(SchedulerEvent::Reconfigured(env(2, &["t1", "t2", "t3"])));

        assert_eq!(effects, vec![Effect::Resize(2)]);
        assert_eq!(h.state.phase(), Phase::Accepting);
        assert_eq!(h.state.total_expected(), 3);
        assert_eq!(h.state.waiting_len(), 3);
        assert_eq!(h.state.next_route(), Some(Route::Dispatch));
    }

    #[test]
    fn all_results_finish_the_run() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(2, &["t1", "t2"])));
        h.apply(pulled("t1", Route::Dispatch));
        h.apply(pulled("t2", Route::Dispatch));
        assert_eq!(h.state.live_len(), 2);

        assert!(h.apply(result(ExecutionResult::success("t2"))).is_empty());
        let effects = h.apply(result(ExecutionResult::failure("t1", "boom")));

        assert_eq!(
            effects,
            vec![
                Effect::Transition {
                    from: Phase::Accepting,
                    to: Phase::Finalizing
                },
                Effect::Transition {
                    from: Phase::Finalizing,
                    to: Phase::Done
                },
                Effect::Finished,
            ]
        );
        assert_eq!(h.state.phase(), Phase::Done);
        assert_eq!(h.state.results().len(), 2);
        assert_eq!(h.state.live_len(), 0);
    }

    #[test]
    fn empty_run_never_completes() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(1, &[])));
        assert!(!h.state.is_complete());
        assert_eq!(h.state.phase(), Phase::Accepting);
    }

    #[test]
    fn pause_terminates_live_units_and_defers_count() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(1, &["t1"])));
        h.apply(pulled("t1", Route::Dispatch));

        let effects = h.apply(SchedulerEvent::Reconfigured(env(1, &["t2"]).paused()));
        assert_eq!(
            effects,
            vec![
                Effect::Resize(1),
                Effect::Transition {
                    from: Phase::Accepting,
                    to: Phase::Paused
                },
                Effect::BulkTerminate,
                Effect::TerminateLive(vec![TestUnitId::from("t1")]),
            ]
        );
        assert_eq!(h.state.total_expected(), 1);
        assert_eq!(h.state.paused_count(), 1);
        assert_eq!(h.state.next_route(), Some(Route::Skip));
    }

    #[test]
    fn repeated_pause_collapses_to_one_transition() {
        let mut once = Harness::new();
        once.apply(SchedulerEvent::Reconfigured(env(2, &["t1"]).paused()));

        let mut twice = Harness::new();
        twice.apply(SchedulerEvent::Reconfigured(env(2, &["t1"]).paused()));
        let effects = twice.apply(SchedulerEvent::Reconfigured(env(2, &[]).paused()));

        assert_eq!(effects, vec![Effect::Resize(2)]);
        assert_eq!(once.state, twice.state);
    }

    #[test]
    fn units_pulled_while_paused_are_skipped_then_run_resumes_and_finishes() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(1, &["t1", "t2"]).paused()));
        h.apply(pulled("t1", Route::Skip));
        h.apply(pulled("t2", Route::Skip));

        assert!(h.apply(result(ExecutionResult::skipped("t1"))).is_empty());
        let effects = h.apply(result(ExecutionResult::skipped("t2")));

        assert_eq!(
            effects[0],
            Effect::Transition {
                from: Phase::Paused,
                to: Phase::Accepting
            }
        );
        assert_eq!(effects.last(), Some(&Effect::Finished));
        assert_eq!(h.state.total_expected(), 2);
        assert_eq!(h.state.paused_count(), 0);
    }

    #[test]
    fn continue_after_pause_flushes_deferred_units() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(1, &["t1", "t2"]).paused()));
        h.apply(pulled("t1", Route::Skip));

        let effects = h.apply(SchedulerEvent::Reconfigured(env(3, &["t3"])));
        assert_eq!(
            effects,
            vec![
                Effect::Resize(3),
                Effect::Transition {
                    from: Phase::Paused,
                    to: Phase::Accepting
                },
            ]
        );
        assert_eq!(h.state.total_expected(), 3);
        assert_eq!(h.state.paused_count(), 0);

        // Routing follows the phase at pull time, not at enqueue time.
        h.apply(pulled("t2", Route::Dispatch));
        h.apply(pulled("t3", Route::Dispatch));
        h.apply(result(ExecutionResult::skipped("t1")));
        h.apply(result(ExecutionResult::success("t2")));
        let effects = h.apply(result(ExecutionResult::success("t3")));
        assert_eq!(effects.last(), Some(&Effect::Finished));
    }

    #[test]
    fn paused_run_waits_for_terminated_live_units() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(1, &["t1"])));
        h.apply(pulled("t1", Route::Dispatch));
        h.apply(SchedulerEvent::Reconfigured(env(1, &["t2"]).paused()));
        h.apply(pulled("t2", Route::Skip));

        assert!(h.apply(result(ExecutionResult::skipped("t2"))).is_empty());
        assert_eq!(h.state.phase(), Phase::Paused);

        let effects = h.apply(result(ExecutionResult::terminated("t1")));
        assert_eq!(effects.last(), Some(&Effect::Finished));
        assert_eq!(h.state.results().len(), 2);
    }

    #[test]
    fn wrong_route_is_an_invariant_violation() {
        let mut state = SchedulerState::new();
        state
            .apply(&SchedulerEvent::Reconfigured(env(1, &["t1"]).paused()))
            .unwrap();

        let err = state.apply(&pulled("t1", Route::Dispatch)).unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));
        assert_eq!(state.waiting_len(), 1);
    }

    #[test]
    fn pulling_out_of_order_is_an_invariant_violation() {
        let mut state = SchedulerState::new();
        state
            .apply(&SchedulerEvent::Reconfigured(env(1, &["t1", "t2"])))
            .unwrap();
        assert!(state.apply(&pulled("t2", Route::Dispatch)).is_err());
    }

    #[test]
    fn result_for_unknown_unit_is_an_invariant_violation() {
        let mut state = SchedulerState::new();
        state
            .apply(&SchedulerEvent::Reconfigured(env(1, &["t1"])))
            .unwrap();
        let err = state
            .apply(&result(ExecutionResult::success("t1")))
            .unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));
        assert!(state.results().is_empty());
    }

    #[test]
    fn duplicate_unit_ids_are_counted_separately() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(2, &["t1"])));
        h.apply(SchedulerEvent::Reconfigured(env(2, &["t1"])));
        h.apply(pulled("t1", Route::Dispatch));
        h.apply(pulled("t1", Route::Dispatch));
        assert_eq!(h.state.live_len(), 2);

        h.apply(result(ExecutionResult::success("t1")));
        assert!(h.state.is_live(&TestUnitId::from("t1")));
        let effects = h.apply(result(ExecutionResult::success("t1")));
        assert_eq!(effects.last(), Some(&Effect::Finished));
    }

    #[test]
    fn messages_after_done_are_ignored() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(1, &["t1"])));
        h.apply(pulled("t1", Route::Dispatch));
        h.apply(result(ExecutionResult::success("t1")));

        let effects = h.apply(SchedulerEvent::Reconfigured(env(1, &["t2"])));
        assert!(effects.is_empty());
        assert_eq!(h.state.waiting_len(), 0);
        assert_eq!(h.state.phase(), Phase::Done);
    }

    #[test]
    fn replay_rebuilds_identical_state() {
        let mut h = Harness::new();
        h.apply(SchedulerEvent::Reconfigured(env(1, &["t1", "t2"])));
        h.apply(pulled("t1", Route::Dispatch));
        h.apply(SchedulerEvent::Reconfigured(env(0, &["t3"]).paused()));
        h.apply(pulled("t2", Route::Skip));
        h.apply(result(ExecutionResult::terminated("t1")));

        assert_eq!(h.log.len(), 5);
        let replayed = h.log.replay().unwrap();
        assert_eq!(replayed, h.state);
        assert_eq!(replayed.max_parallelism(), 0);
    }
}
