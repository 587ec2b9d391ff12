mod unit_id;
pub use unit_id::TestUnitId;

mod test_unit;
pub use test_unit::TestUnit;

mod environment;
pub use environment::Environment;

mod execution;
pub use execution::{ExecutionResult, ExecutionStatus};

mod labels;
pub use labels::JobLabels;

mod constants;
pub use constants::{
    LABEL_ACTIVITY_ID, LABEL_ENVIRONMENT_ID, LABEL_RUN_ID, LABEL_TEST_UNIT_ID,
};

/// Customer/run scope identifier.
///
/// One environment controller runs per environment id at a time.
pub type EnvironmentId = String;

/// Identifier of a single controller run.
///
/// A new run id is minted every time a controller is started for an environment.
pub type RunId = String;

/// Identifier of one dispatched unit of external work.
///
/// Together with [`RunId`] it addresses a live entry on the completion channel.
pub type ActivityId = String;

/// Duration hint in whole seconds.
pub type DurationSecs = u64;
