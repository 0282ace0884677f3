mod controller;
mod route;
mod session;

// Public API of the quiz session subsystem.
pub use crate::error::SessionError;
pub use controller::QuizSessionController;
pub use route::{OpenOutcome, Redirect, Route, SessionPhase, SubmissionKind, SubmissionReceipt};
pub use session::QuizSession;
