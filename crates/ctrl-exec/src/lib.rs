//! Local process-backed job substrate.
//!
//! Each job runs its command as a child process; lifecycle changes are published as
//! [`ctrl_model::JobEvent`]s to every watcher of the job's namespace.
mod error;
pub use error::ExecError;

mod util;

#[cfg(feature = "proc")]
pub mod proc;
#[cfg(feature = "proc")]
pub use proc::{ProcConfig, ProcSubstrate};

pub mod prelude {
    pub use crate::error::ExecError;
    #[cfg(feature = "proc")]
    pub use crate::proc::{ProcConfig, ProcSubstrate};
}
