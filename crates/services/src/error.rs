//! Shared error types for the services crate.

use thiserror::Error;

use mastery_core::model::{ProgressError, QuestionId};
use mastery_core::scheduler::SchedulerError;
use storage::repository::StorageError;

/// Errors emitted by the session service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("the course has no questions")]
    EmptyCourse,

    #[error("question {0} does not belong to this course")]
    UnknownQuestion(QuestionId),

    #[error("no progress exists for this student and course")]
    NotInitialized,

    #[error("question {0} is already mastered")]
    AlreadyMastered(QuestionId),

    #[error("course is already completed")]
    CourseCompleted,

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
