#![forbid(unsafe_code)]

pub mod config;
pub mod course_completion;
pub mod error;
pub mod integrity;
pub mod progression;
pub mod sessions;

pub use quiz_core::Clock;

pub use config::QuizConfig;
pub use course_completion::CourseCompletionService;
pub use error::{ConfigError, CourseCompletionError, SessionError};
pub use progression::{LevelBoard, LevelEntry, ProgressionService};

pub use sessions::{
    OpenOutcome, QuizSession, QuizSessionController, Redirect, Route, SessionPhase,
    SubmissionKind, SubmissionReceipt,
};
