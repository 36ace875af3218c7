use async_trait::async_trait;
use thiserror::Error;

use crate::db::types::JobStatus;

mod pg;

pub(crate) use pg::PgJobQueue;

#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    #[error("job queue error: {0}")]
    Queue(#[from] sqlx::Error),
}

/// Queue-side view of a dispatched job. `Unknown` covers handles the queue
/// has never seen or has already pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl TaskStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Unknown => "unknown",
        }
    }
}

impl From<JobStatus> for TaskStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => TaskStatus::Pending,
            JobStatus::Running => TaskStatus::Running,
            JobStatus::Succeeded => TaskStatus::Succeeded,
            JobStatus::Failed | JobStatus::Dead => TaskStatus::Failed,
            JobStatus::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Contract the workflow engine holds against the queue. Workers acknowledge
/// a job only after processing it, so a crash mid-correction causes
/// redelivery rather than a lost job.
#[async_trait]
pub(crate) trait TaskDispatcher: Send + Sync {
    /// Enqueue a correction job for the essay and return its opaque handle.
    async fn enqueue(&self, essay_id: i64) -> Result<String, DispatchError>;

    /// Queue-side status for a previously issued handle.
    async fn status(&self, task_handle: &str) -> Result<TaskStatus, DispatchError>;

    /// Best-effort cancel. `true` only when the job was still waiting and
    /// was withdrawn before any worker picked it up.
    async fn cancel(&self, task_handle: &str) -> Result<bool, DispatchError>;
}
