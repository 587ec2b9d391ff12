//! Concurrency-bounded environment controller.
//!
//! - [`BoundedSemaphore`] caps how many test units run at once.
//! - [`TestRunner`] turns one unit into one external job and waits for its outcome.
//! - [`SchedulerState`] is the pure reducer; [`EnvironmentController`] is the event loop around it.
//! - [`ActivityRegistry`] is the in-process completion channel the relay reports into.
//! - [`EnvironmentControllers`] implements start-or-update across environments.
pub mod error;
pub use error::{CompletionError, CoreError, SubstrateError};

pub mod semaphore;
pub use semaphore::{Acquire, BoundedSemaphore, SemaphorePermit};

pub mod completion;
pub use completion::{ActivityKey, ActivityRegistry, CompletionChannel, PendingActivity};

pub mod substrate;
pub use substrate::{JobSubstrate, JobWatch, WatchItem};

pub mod runner;
pub use runner::{RunnerConfig, RunnerHandle, TestRunner};

pub mod state;
pub use state::{Effect, EventLog, Phase, Route, SchedulerEvent, SchedulerState};

pub mod controller;
pub use controller::{
    ControllerConfig, ControllerDeps, ControllerHandle, ControllerStatus, EnvironmentController,
    run_environment_controller,
};

pub mod supervisor;
pub use supervisor::{Delivery, EnvironmentControllers, EnvironmentStatus, RunSummary};

#[cfg(test)]
pub(crate) mod testutil;
