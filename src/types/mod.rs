//! Wire types shared by the dispatcher and the job poller.

mod error;
mod job;

pub use error::ApiErrorBody;
pub use job::{AsyncJobResult, JobStatus};
