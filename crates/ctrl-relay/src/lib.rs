//! Completion relay: maps job lifecycle events onto the heartbeat/complete protocol.
mod config;
pub use config::RelayConfig;

mod errors;
pub use errors::RelayError;

mod relay;
pub use relay::{CompletionRelay, Handled, RELAY_TASK, RelayAction, classify};
