use chrono::Duration;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::model::OptionTag;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum QuizPolicyError {
    #[error("pass ratio must be in [0, 1), got {0}")]
    InvalidPassRatio(f64),

    #[error("already-passed ratio must be in (0, 1], got {0}")]
    InvalidAlreadyPassedRatio(f64),

    #[error("lockout must be at least one minute")]
    InvalidLockout,

    #[error("default question count must be > 0")]
    InvalidQuestionCount,

    #[error("blur debounce must be between 1 and 5000 ms")]
    InvalidBlurDebounce,

    #[error("violation submission needs at least one attempt")]
    InvalidSubmitAttempts,

    #[error("course completion floor must be <= 100")]
    InvalidCompletionFloor,
}

/// Tunable rules for progression, lockouts and integrity handling.
///
/// `pass_ratio` drives lockout math (strictly greater passes) while
/// `already_passed_ratio` drives the skip-if-passed gate (greater or equal
/// passes). They are separate knobs and stay that way.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizPolicy {
    pass_ratio: f64,
    already_passed_ratio: f64,
    lockout: Duration,
    default_question_count: u32,
    blur_debounce: StdDuration,
    violation_placeholder: OptionTag,
    violation_submit_attempts: u32,
    course_completion_floor: u32,
}

/// Unvalidated policy values, e.g. assembled from environment overrides.
#[derive(Debug, Clone)]
pub struct QuizPolicyDraft {
    pub pass_ratio: f64,
    pub already_passed_ratio: f64,
    pub lockout: Duration,
    pub default_question_count: u32,
    pub blur_debounce: StdDuration,
    pub violation_placeholder: OptionTag,
    pub violation_submit_attempts: u32,
    pub course_completion_floor: u32,
}

impl Default for QuizPolicyDraft {
    fn default() -> Self {
        Self {
            pass_ratio: 0.5,
            already_passed_ratio: 0.6,
            lockout: Duration::hours(24),
            default_question_count: 10,
            blur_debounce: StdDuration::from_millis(100),
            violation_placeholder: OptionTag::B,
            violation_submit_attempts: 2,
            course_completion_floor: 60,
        }
    }
}

impl QuizPolicyDraft {
    /// # Errors
    ///
    /// Returns `QuizPolicyError` for any out-of-range value.
    pub fn validate(self) -> Result<QuizPolicy, QuizPolicyError> {
        if !(0.0..1.0).contains(&self.pass_ratio) {
            return Err(QuizPolicyError::InvalidPassRatio(self.pass_ratio));
        }
        if !(self.already_passed_ratio > 0.0 && self.already_passed_ratio <= 1.0) {
            return Err(QuizPolicyError::InvalidAlreadyPassedRatio(
                self.already_passed_ratio,
            ));
        }
        if self.lockout < Duration::minutes(1) {
            return Err(QuizPolicyError::InvalidLockout);
        }
        if self.default_question_count == 0 {
            return Err(QuizPolicyError::InvalidQuestionCount);
        }
        let debounce_ms = self.blur_debounce.as_millis();
        if debounce_ms == 0 || debounce_ms > 5_000 {
            return Err(QuizPolicyError::InvalidBlurDebounce);
        }
        if self.violation_submit_attempts == 0 {
            return Err(QuizPolicyError::InvalidSubmitAttempts);
        }
        if self.course_completion_floor > 100 {
            return Err(QuizPolicyError::InvalidCompletionFloor);
        }

        Ok(QuizPolicy {
            pass_ratio: self.pass_ratio,
            already_passed_ratio: self.already_passed_ratio,
            lockout: self.lockout,
            default_question_count: self.default_question_count,
            blur_debounce: self.blur_debounce,
            violation_placeholder: self.violation_placeholder,
            violation_submit_attempts: self.violation_submit_attempts,
            course_completion_floor: self.course_completion_floor,
        })
    }
}

impl Default for QuizPolicy {
    fn default() -> Self {
        let d = QuizPolicyDraft::default();
        Self {
            pass_ratio: d.pass_ratio,
            already_passed_ratio: d.already_passed_ratio,
            lockout: d.lockout,
            default_question_count: d.default_question_count,
            blur_debounce: d.blur_debounce,
            violation_placeholder: d.violation_placeholder,
            violation_submit_attempts: d.violation_submit_attempts,
            course_completion_floor: d.course_completion_floor,
        }
    }
}

impl QuizPolicy {
    #[must_use]
    pub fn to_draft(&self) -> QuizPolicyDraft {
        QuizPolicyDraft {
            pass_ratio: self.pass_ratio,
            already_passed_ratio: self.already_passed_ratio,
            lockout: self.lockout,
            default_question_count: self.default_question_count,
            blur_debounce: self.blur_debounce,
            violation_placeholder: self.violation_placeholder,
            violation_submit_attempts: self.violation_submit_attempts,
            course_completion_floor: self.course_completion_floor,
        }
    }

    #[must_use]
    pub fn pass_ratio(&self) -> f64 {
        self.pass_ratio
    }

    #[must_use]
    pub fn already_passed_ratio(&self) -> f64 {
        self.already_passed_ratio
    }

    #[must_use]
    pub fn lockout(&self) -> Duration {
        self.lockout
    }

    #[must_use]
    pub fn default_question_count(&self) -> u32 {
        self.default_question_count
    }

    #[must_use]
    pub fn blur_debounce(&self) -> StdDuration {
        self.blur_debounce
    }

    #[must_use]
    pub fn violation_placeholder(&self) -> OptionTag {
        self.violation_placeholder
    }

    #[must_use]
    pub fn violation_submit_attempts(&self) -> u32 {
        self.violation_submit_attempts
    }

    #[must_use]
    pub fn course_completion_floor(&self) -> u32 {
        self.course_completion_floor
    }

    /// Lockout math: a ratio passes only when strictly above `pass_ratio`.
    #[must_use]
    pub fn passes(&self, ratio: f64) -> bool {
        ratio > self.pass_ratio
    }

    /// Skip gate: a ratio counts as already passed at or above `already_passed_ratio`.
    #[must_use]
    pub fn already_passes(&self, ratio: f64) -> bool {
        ratio >= self.already_passed_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_validates() {
        let policy = QuizPolicyDraft::default().validate().unwrap();
        assert_eq!(policy, QuizPolicy::default());
    }

    #[test]
    fn thresholds_differ_at_the_boundaries() {
        let policy = QuizPolicy::default();
        assert!(!policy.passes(0.5));
        assert!(policy.passes(0.51));
        assert!(!policy.already_passes(0.59));
        assert!(policy.already_passes(0.6));
        // 0.55 passes lockout math but is not an "already passed" skip.
        assert!(policy.passes(0.55) && !policy.already_passes(0.55));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut draft = QuizPolicyDraft::default();
        draft.pass_ratio = 1.0;
        assert_eq!(draft.validate().unwrap_err(), QuizPolicyError::InvalidPassRatio(1.0));

        let mut draft = QuizPolicyDraft::default();
        draft.blur_debounce = StdDuration::ZERO;
        assert_eq!(draft.validate().unwrap_err(), QuizPolicyError::InvalidBlurDebounce);

        let mut draft = QuizPolicyDraft::default();
        draft.lockout = Duration::seconds(5);
        assert_eq!(draft.validate().unwrap_err(), QuizPolicyError::InvalidLockout);
    }
}
