//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::QuizPolicyError;
use storage::StorageError;
use storage::http::HttpStoreError;
use storage::sqlite::SqliteInitError;

use crate::sessions::SessionPhase;

/// Errors emitted by quiz sessions and the services that read progression.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A read failed; `phase` is where the session stopped.
    #[error("failed to load quiz while {phase}: {reason}")]
    FetchFailure { phase: SessionPhase, reason: String },
    #[error("submission failed: {0}")]
    SubmissionFailure(#[source] StorageError),
    #[error("{unanswered} question(s) still unanswered")]
    Incomplete { unanswered: usize },
    #[error("not allowed while the session is {phase}")]
    InvalidPhase { phase: SessionPhase },
    #[error("integrity violation detected; answers are closed")]
    ViolationDetected,
    #[error("question {index} out of range ({len} questions)")]
    QuestionOutOfRange { index: usize, len: usize },
}

impl SessionError {
    pub(crate) fn fetch(phase: SessionPhase, err: &StorageError) -> Self {
        SessionError::FetchFailure {
            phase,
            reason: err.to_string(),
        }
    }
}

/// Errors emitted by `CourseCompletionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CourseCompletionError {
    #[error("failed to read progress: {0}")]
    Progress(#[from] SessionError),
    #[error("failed to read level statistics: {0}")]
    Statistics(#[source] StorageError),
    #[error("failed to record course result: {0}")]
    Record(#[source] StorageError),
}

/// Errors raised while reading configuration or connecting the configured store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
    #[error(transparent)]
    Policy(#[from] QuizPolicyError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Http(#[from] HttpStoreError),
}
