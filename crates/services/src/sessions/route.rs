use std::fmt;

use quiz_core::model::{Level, Topic};
use serde::Serialize;

use super::session::QuizSession;

//
// ─── PHASES ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Normal,
    Violation,
}

/// Lifecycle of one quiz attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Held by `QuizSessionController::open`; a session that fails here only
    /// surfaces in `SessionError::FetchFailure`.
    Checking,
    Loading,
    Active,
    Submitting,
    Submitted(SubmissionKind),
    Reviewing,
    /// Torn down by navigation; nothing more can happen.
    Closed,
}

impl SessionPhase {
    #[must_use]
    pub fn is_submitted(self) -> bool {
        matches!(self, SessionPhase::Submitted(_) | SessionPhase::Reviewing)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Checking => f.write_str("checking"),
            SessionPhase::Loading => f.write_str("loading"),
            SessionPhase::Active => f.write_str("active"),
            SessionPhase::Submitting => f.write_str("submitting"),
            SessionPhase::Submitted(SubmissionKind::Normal) => f.write_str("submitted"),
            SessionPhase::Submitted(SubmissionKind::Violation) => f.write_str("submitted (violation)"),
            SessionPhase::Reviewing => f.write_str("reviewing"),
            SessionPhase::Closed => f.write_str("closed"),
        }
    }
}

//
// ─── ROUTING ───────────────────────────────────────────────────────────────────
//

/// Where the user goes next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", content = "target", rename_all = "snake_case")]
pub enum Route {
    BasicQuiz(Level),
    /// Follow-up step after the advanced basic quiz.
    Assessment,
    LevelSelector(Topic),
}

impl Route {
    /// Next stop on the basic track after finishing `level`.
    #[must_use]
    pub fn after_basic(level: Level) -> Self {
        level.next().map_or(Route::Assessment, Route::BasicQuiz)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub route: Route,
    pub message: String,
}

/// Result of opening a quiz route.
pub enum OpenOutcome {
    Redirect(Redirect),
    Ready(QuizSession),
}

impl OpenOutcome {
    #[must_use]
    pub fn redirect(&self) -> Option<&Redirect> {
        match self {
            OpenOutcome::Redirect(redirect) => Some(redirect),
            OpenOutcome::Ready(_) => None,
        }
    }

    #[must_use]
    pub fn into_session(self) -> Option<QuizSession> {
        match self {
            OpenOutcome::Redirect(_) => None,
            OpenOutcome::Ready(session) => Some(session),
        }
    }
}

impl fmt::Debug for OpenOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenOutcome::Redirect(redirect) => f.debug_tuple("Redirect").field(redirect).finish(),
            OpenOutcome::Ready(session) => f.debug_tuple("Ready").field(&session.id()).finish(),
        }
    }
}

//
// ─── RECEIPTS ──────────────────────────────────────────────────────────────────
//

/// What a submission produced, from both sides of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub kind: SubmissionKind,
    /// Score reported by the store; `None` when the post never succeeded.
    pub server_score: Option<u32>,
    /// Score recomputed locally from the answer key.
    pub client_score: u32,
    pub persisted: bool,
}

impl SubmissionReceipt {
    /// Score shown to the user. Always 0 for violations.
    #[must_use]
    pub fn displayed_score(&self) -> u32 {
        match self.kind {
            SubmissionKind::Violation => 0,
            SubmissionKind::Normal => self.server_score.unwrap_or(self.client_score),
        }
    }

    /// Server and client counts match. Violations agree when both are 0.
    #[must_use]
    pub fn scores_agree(&self) -> bool {
        self.server_score.is_none_or(|server| server == self.client_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_route_advances_then_leaves_for_assessment() {
        assert_eq!(Route::after_basic(Level::Beginner), Route::BasicQuiz(Level::Intermediate));
        assert_eq!(Route::after_basic(Level::Intermediate), Route::BasicQuiz(Level::Advanced));
        assert_eq!(Route::after_basic(Level::Advanced), Route::Assessment);
    }

    #[test]
    fn violation_receipt_always_displays_zero() {
        let receipt = SubmissionReceipt {
            kind: SubmissionKind::Violation,
            server_score: Some(0),
            client_score: 0,
            persisted: true,
        };
        assert_eq!(receipt.displayed_score(), 0);
        assert!(receipt.scores_agree());
    }
}
