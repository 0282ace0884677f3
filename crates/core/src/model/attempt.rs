use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{Level, QuizId, Topic};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("violation attempts must score 0, got {score}")]
    ScoredViolation { score: u32 },

    #[error("score {score} exceeds answer count {answer_count}")]
    ScoreAboveAnswerCount { score: u32, answer_count: u32 },
}

//
// ─── ATTEMPTS ──────────────────────────────────────────────────────────────────
//

/// One submitted attempt at one quiz. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AttemptParts")]
pub struct QuizAttempt {
    quiz_id: QuizId,
    score: u32,
    answer_count: u32,
    submitted_at: DateTime<Utc>,
    violation: bool,
}

#[derive(Deserialize)]
struct AttemptParts {
    quiz_id: QuizId,
    score: u32,
    answer_count: u32,
    submitted_at: DateTime<Utc>,
    #[serde(default)]
    violation: bool,
}

impl TryFrom<AttemptParts> for QuizAttempt {
    type Error = AttemptError;

    fn try_from(p: AttemptParts) -> Result<Self, Self::Error> {
        if p.answer_count == 0 {
            return QuizAttempt::unrecorded(p.quiz_id, p.score, p.submitted_at, p.violation);
        }
        QuizAttempt::new(p.quiz_id, p.score, p.answer_count, p.submitted_at, p.violation)
    }
}

impl QuizAttempt {
    /// # Errors
    ///
    /// Returns `AttemptError::ScoredViolation` when a violation carries a
    /// non-zero score, or `AttemptError::ScoreAboveAnswerCount` when the score
    /// exceeds the number of recorded answers.
    pub fn new(
        quiz_id: QuizId,
        score: u32,
        answer_count: u32,
        submitted_at: DateTime<Utc>,
        violation: bool,
    ) -> Result<Self, AttemptError> {
        if violation && score != 0 {
            return Err(AttemptError::ScoredViolation { score });
        }
        if score > answer_count {
            return Err(AttemptError::ScoreAboveAnswerCount {
                score,
                answer_count,
            });
        }
        Ok(Self {
            quiz_id,
            score,
            answer_count,
            submitted_at,
            violation,
        })
    }

    /// An attempt stored without its answer list. The score cannot be checked
    /// against an answer count, and `ratio()` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::ScoredViolation` when a violation carries a
    /// non-zero score.
    pub fn unrecorded(
        quiz_id: QuizId,
        score: u32,
        submitted_at: DateTime<Utc>,
        violation: bool,
    ) -> Result<Self, AttemptError> {
        if violation && score != 0 {
            return Err(AttemptError::ScoredViolation { score });
        }
        Ok(Self {
            quiz_id,
            score,
            answer_count: 0,
            submitted_at,
            violation,
        })
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn answer_count(&self) -> u32 {
        self.answer_count
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    #[must_use]
    pub fn is_violation(&self) -> bool {
        self.violation
    }

    /// Fraction of correct answers, `None` for non-scoring attempts.
    #[must_use]
    pub fn ratio(&self) -> Option<f64> {
        if self.answer_count == 0 {
            return None;
        }
        Some(f64::from(self.score) / f64::from(self.answer_count))
    }

    /// Whole-number percentage, 0 for non-scoring attempts.
    #[must_use]
    pub fn percentage(&self) -> u32 {
        self.ratio().map_or(0, percent_of)
    }
}

/// Rounds a ratio in `[0, 1]` to a whole percentage.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percent_of(ratio: f64) -> u32 {
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u32
}

//
// ─── LOCKOUTS ──────────────────────────────────────────────────────────────────
//

/// Per (topic, level) cool-down expiries stored on the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockoutMap(BTreeMap<Topic, BTreeMap<Level, DateTime<Utc>>>);

impl LockoutMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a lockout expiry. An existing record is only replaced by a later one.
    ///
    /// Returns the expiry now in effect.
    pub fn record(&mut self, topic: &Topic, level: Level, until: DateTime<Utc>) -> DateTime<Utc> {
        let slot = self
            .0
            .entry(topic.clone())
            .or_default()
            .entry(level)
            .or_insert(until);
        if until > *slot {
            *slot = until;
        }
        *slot
    }

    /// The last recorded expiry, active or not.
    #[must_use]
    pub fn get(&self, topic: &Topic, level: Level) -> Option<DateTime<Utc>> {
        self.0.get(topic).and_then(|levels| levels.get(&level)).copied()
    }

    /// The expiry only while it is still in the future.
    #[must_use]
    pub fn active(&self, topic: &Topic, level: Level, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.get(topic, level).filter(|until| *until > now)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Topic, Level, DateTime<Utc>)> {
        self.0.iter().flat_map(|(topic, levels)| {
            levels.iter().map(move |(level, until)| (topic, *level, *until))
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn violations_must_score_zero() {
        let err = QuizAttempt::new(QuizId::new(1), 4, 10, fixed_now(), true).unwrap_err();
        assert_eq!(err, AttemptError::ScoredViolation { score: 4 });
        assert!(QuizAttempt::new(QuizId::new(1), 0, 10, fixed_now(), true).is_ok());
    }

    #[test]
    fn ratio_is_none_without_answers() {
        let attempt = QuizAttempt::new(QuizId::new(1), 0, 0, fixed_now(), false).unwrap();
        assert_eq!(attempt.ratio(), None);
        assert_eq!(attempt.percentage(), 0);

        let attempt = QuizAttempt::new(QuizId::new(1), 2, 3, fixed_now(), false).unwrap();
        assert_eq!(attempt.percentage(), 67);
    }

    #[test]
    fn unrecorded_attempts_keep_their_score() {
        let attempt = QuizAttempt::unrecorded(QuizId::new(1), 7, fixed_now(), false).unwrap();
        assert_eq!(attempt.score(), 7);
        assert_eq!(attempt.answer_count(), 0);
        assert_eq!(attempt.ratio(), None);
        assert!(QuizAttempt::new(QuizId::new(1), 7, 0, fixed_now(), false).is_err());
        assert!(QuizAttempt::unrecorded(QuizId::new(1), 7, fixed_now(), true).is_err());
    }

    #[test]
    fn deserialising_enforces_invariants() {
        let json = r#"{"quiz_id":1,"score":3,"answer_count":10,"submitted_at":"2023-11-14T22:13:20Z","violation":true}"#;
        assert!(serde_json::from_str::<QuizAttempt>(json).is_err());

        let json = r#"{"quiz_id":1,"score":3,"answer_count":0,"submitted_at":"2023-11-14T22:13:20Z"}"#;
        let attempt = serde_json::from_str::<QuizAttempt>(json).unwrap();
        assert_eq!(attempt.score(), 3);
    }

    #[test]
    fn lockout_keeps_later_expiry() {
        let topic = Topic::new("graphs").unwrap();
        let mut map = LockoutMap::new();
        let later = fixed_now() + Duration::hours(24);
        map.record(&topic, Level::Beginner, later);
        let kept = map.record(&topic, Level::Beginner, fixed_now());
        assert_eq!(kept, later);
        assert_eq!(map.get(&topic, Level::Beginner), Some(later));
    }

    #[test]
    fn expired_lockout_is_not_active() {
        let topic = Topic::new("graphs").unwrap();
        let mut map = LockoutMap::new();
        map.record(&topic, Level::Advanced, fixed_now());
        assert_eq!(map.active(&topic, Level::Advanced, fixed_now()), None);
        assert!(
            map.active(&topic, Level::Advanced, fixed_now() - Duration::seconds(1))
                .is_some()
        );
    }
}
