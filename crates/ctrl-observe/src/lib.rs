//! Process-wide `tracing` subscriber setup.
mod logger;
pub use logger::*;
