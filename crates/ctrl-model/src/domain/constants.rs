/// Job label carrying the activity id the relay completes.
pub const LABEL_ACTIVITY_ID: &str = "ctrlplane.dev/activity-id";
/// Job label carrying the owning environment id; used for bulk deletion.
pub const LABEL_ENVIRONMENT_ID: &str = "ctrlplane.dev/environment-id";
/// Job label carrying the test unit id.
pub const LABEL_TEST_UNIT_ID: &str = "ctrlplane.dev/plan-id";
/// Job label carrying the controller run id.
pub const LABEL_RUN_ID: &str = "ctrlplane.dev/run-id";
