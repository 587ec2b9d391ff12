mod job;
pub use job::{JobSpec, JobTemplate, RestartPolicy};

mod event;
pub use event::{JobEvent, JobEventKind, JobStatus};
