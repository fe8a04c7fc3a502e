//! Task and group result model

mod record;
mod status;

pub use record::{CleanupReport, ExceptionInfo, GroupMeta, TaskMeta, TaskResult};
pub use status::TaskStatus;
