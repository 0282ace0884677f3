use thiserror::Error;

use crate::model::{AttemptError, LevelParseError, QuestionError, QuizPolicyError, TrackError};

/// Any validation failure raised by the domain model.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Level(#[from] LevelParseError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Policy(#[from] QuizPolicyError),
    #[error(transparent)]
    Track(#[from] TrackError),
}
