//! Domain types shared by the environment controller, the job substrate and the completion relay.
//!
//! Everything here is plain data: no runtime, no I/O.
mod domain;
pub use domain::*;

mod kind;
pub use kind::*;

mod error;
pub use error::ModelError;
