//! Progression evaluation: which levels of a topic are completed, which are
//! cooling down, and which may be started.
//!
//! Everything here is a pure projection of attempt history, lockout records
//! and a timestamp. Nothing is cached or persisted; callers re-run
//! [`evaluate`] against freshly read history whenever they need an answer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::model::{Level, LockoutMap, QuizAttempt, QuizId, QuizPolicy, Topic, TrackKind};

//
// ─── INPUT ─────────────────────────────────────────────────────────────────────
//

/// Everything the evaluator looks at for one topic.
#[derive(Debug, Clone, Copy)]
pub struct ProgressionInput<'a> {
    pub topic: &'a Topic,
    /// Levels in order, each with the quiz it resolves to. Unresolved levels
    /// (`None`) are skipped and end up neither completed nor locked.
    pub levels: &'a [(Level, Option<QuizId>)],
    /// Full attempt history of the user, any quiz.
    pub attempts: &'a [QuizAttempt],
    pub lockouts: &'a LockoutMap,
}

//
// ─── OUTPUT ────────────────────────────────────────────────────────────────────
//

/// Derived per-level state shown by the level selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "until", rename_all = "snake_case")]
pub enum LevelStatus {
    /// Previous level not completed yet.
    Locked,
    Available,
    LockedUntil(DateTime<Utc>),
    Completed,
}

/// Why a level cannot be started right now.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Unavailable {
    #[error("level is locked until {0}")]
    LockedUntil(DateTime<Utc>),

    #[error("complete the {missing} level first")]
    OutOfSequence { missing: Level },
}

/// Result of evaluating one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelProgress {
    track: TrackKind,
    completed: BTreeSet<Level>,
    locked_until: BTreeMap<Level, DateTime<Utc>>,
}

impl LevelProgress {
    #[must_use]
    pub fn track(&self) -> TrackKind {
        self.track
    }

    #[must_use]
    pub fn completed(&self) -> &BTreeSet<Level> {
        &self.completed
    }

    #[must_use]
    pub fn locked_until(&self) -> &BTreeMap<Level, DateTime<Utc>> {
        &self.locked_until
    }

    #[must_use]
    pub fn is_completed(&self, level: Level) -> bool {
        self.completed.contains(&level)
    }

    #[must_use]
    pub fn all_completed(&self) -> bool {
        Level::ALL.iter().all(|level| self.completed.contains(level))
    }

    /// Active lockout expiry for `level`, if any is still ahead of `now`.
    #[must_use]
    pub fn lock_for(&self, level: Level, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.get(&level).copied().filter(|until| *until > now)
    }

    /// Display state of a level, with the sequential unlock rule applied.
    #[must_use]
    pub fn status(&self, level: Level, now: DateTime<Utc>) -> LevelStatus {
        if self.is_completed(level) {
            return LevelStatus::Completed;
        }
        if let Some(until) = self.lock_for(level, now) {
            return LevelStatus::LockedUntil(until);
        }
        if self.missing_prerequisite(level).is_some() {
            return LevelStatus::Locked;
        }
        LevelStatus::Available
    }

    /// Whether a new attempt at `level` may begin at `now`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable::LockedUntil` during a cool-down and
    /// `Unavailable::OutOfSequence` when the previous topic level is not completed.
    pub fn startable(&self, level: Level, now: DateTime<Utc>) -> Result<(), Unavailable> {
        if let Some(until) = self.lock_for(level, now) {
            return Err(Unavailable::LockedUntil(until));
        }
        if let Some(missing) = self.missing_prerequisite(level) {
            return Err(Unavailable::OutOfSequence { missing });
        }
        Ok(())
    }

    fn missing_prerequisite(&self, level: Level) -> Option<Level> {
        if self.track == TrackKind::Basic {
            return None;
        }
        level.previous().filter(|prev| !self.is_completed(*prev))
    }
}

//
// ─── EVALUATION ────────────────────────────────────────────────────────────────
//

/// Evaluates every level of `input.topic`.
///
/// Basic track: any attempt completes the level; nothing is ever locked.
///
/// Topic track: only attempts strictly after the last recorded lockout expiry
/// count. A counted attempt above `policy.pass_ratio` completes the level.
/// Otherwise a failing most recent attempt locks the level for
/// `policy.lockout` from its submission. A recorded lockout that is still
/// active wins when it ends later. Attempts without answers are non-scoring.
#[must_use]
pub fn evaluate(input: &ProgressionInput<'_>, policy: &QuizPolicy, now: DateTime<Utc>) -> LevelProgress {
    let track = input.topic.kind();
    let mut completed = BTreeSet::new();
    let mut locked_until = BTreeMap::new();

    for &(level, quiz_id) in input.levels {
        let Some(quiz_id) = quiz_id else {
            continue;
        };
        let mut attempts: Vec<&QuizAttempt> = input
            .attempts
            .iter()
            .filter(|a| a.quiz_id() == quiz_id)
            .collect();

        if track == TrackKind::Basic {
            if !attempts.is_empty() {
                completed.insert(level);
            }
            continue;
        }

        let recorded = input.lockouts.get(input.topic, level);
        attempts.retain(|a| a.ratio().is_some() && recorded.is_none_or(|end| a.submitted_at() > end));
        attempts.sort_by(|a, b| b.submitted_at().cmp(&a.submitted_at()));

        let passed = attempts
            .iter()
            .any(|a| a.ratio().is_some_and(|r| policy.passes(r)));
        if passed {
            completed.insert(level);
        }

        let score_lock = if passed {
            None
        } else {
            attempts
                .first()
                .filter(|latest| latest.ratio().is_some_and(|r| !policy.passes(r)))
                .map(|latest| latest.submitted_at() + policy.lockout())
                .filter(|until| *until > now)
        };
        let recorded_lock = input.lockouts.active(input.topic, level, now);

        if let Some(until) = score_lock.max(recorded_lock) {
            locked_until.insert(level, until);
        }
    }

    LevelProgress {
        track,
        completed,
        locked_until,
    }
}

/// Skip gate used when first entering a topic quiz: has any attempt at this
/// quiz reached `policy.already_passed_ratio`?
///
/// Attempts stored without answers (see [`QuizAttempt::unrecorded`]) are
/// measured against the policy's default question count.
#[must_use]
pub fn already_passed<'a>(
    attempts: impl IntoIterator<Item = &'a QuizAttempt>,
    quiz_id: QuizId,
    policy: &QuizPolicy,
) -> Option<&'a QuizAttempt> {
    attempts.into_iter().find(|a| {
        if a.quiz_id() != quiz_id {
            return false;
        }
        let total = match a.answer_count() {
            0 => policy.default_question_count(),
            n => n,
        };
        policy.already_passes(f64::from(a.score()) / f64::from(total))
    })
}

/// Whether the user has any attempt at `quiz_id`.
#[must_use]
pub fn has_attempted(attempts: &[QuizAttempt], quiz_id: QuizId) -> bool {
    attempts.iter().any(|a| a.quiz_id() == quiz_id)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
