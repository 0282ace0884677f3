//! Server-side rules shared by the storage adapters: scoring a submission,
//! refusing quizzes that are locked or out of sequence, and building reviews.

use chrono::{DateTime, Utc};
use quiz_core::model::{
    Level, LockoutMap, OptionTag, Question, QuizAttempt, QuizId, QuizPolicy, Topic, count_correct,
    percent_of,
};
use quiz_core::progression::{ProgressionInput, evaluate};

use crate::repository::{AttemptRecord, ReviewRecord, ReviewStatistics, StorageError, SubmissionRequest};

/// Scores a submission against the answer key and builds the attempt to append.
///
/// Violations and forced-zero submissions always score 0.
///
/// # Errors
///
/// Returns `StorageError::Serialization` if the resulting attempt is inconsistent.
pub fn grade(
    quiz_id: QuizId,
    questions: &[Question],
    submission: &SubmissionRequest,
    now: DateTime<Utc>,
) -> Result<QuizAttempt, StorageError> {
    let score = if submission.zero_score() {
        0
    } else {
        let answers: Vec<Option<OptionTag>> = submission.answers.iter().copied().map(Some).collect();
        count_correct(questions, &answers)
    };
    let answer_count = u32::try_from(submission.answers.len()).unwrap_or(u32::MAX);
    QuizAttempt::new(quiz_id, score, answer_count, now, submission.violation)
        .map_err(|e| StorageError::from(quiz_core::Error::from(e)))
}

/// Refuses to hand out questions for a level the user may not start.
///
/// # Errors
///
/// Returns `StorageError::NotAvailable` while locked or out of sequence.
pub fn ensure_startable(
    topic: &Topic,
    level: Level,
    levels: &[(Level, Option<QuizId>)],
    attempts: &[QuizAttempt],
    lockouts: &LockoutMap,
    policy: &QuizPolicy,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let input = ProgressionInput {
        topic,
        levels,
        attempts,
        lockouts,
    };
    evaluate(&input, policy, now)
        .startable(level, now)
        .map_err(StorageError::from)
}

/// Review of the latest attempt in `history` (chronological order).
///
/// Returns `None` when there is nothing to review.
#[must_use]
pub fn review(questions: &[Question], history: &[&AttemptRecord]) -> Option<ReviewRecord> {
    let latest_answers = &history.iter().max_by_key(|r| r.attempt.submitted_at())?.answers;
    let per_question_correct = questions
        .iter()
        .enumerate()
        .map(|(i, q)| latest_answers.get(i).is_some_and(|tag| q.is_correct(*tag)))
        .collect();

    let best = history.iter().map(|r| &r.attempt).max_by_key(|a| a.score())?;
    let total = u32::try_from(questions.len()).unwrap_or(u32::MAX);
    let best_percentage = if total == 0 {
        0
    } else {
        percent_of(f64::from(best.score()) / f64::from(total))
    };

    Some(ReviewRecord {
        per_question_correct,
        statistics: ReviewStatistics {
            best_score: best.score(),
            best_percentage,
            attempts: u32::try_from(history.len()).unwrap_or(u32::MAX),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{QuestionDraft, QuizOption};
    use quiz_core::time::fixed_now;

    fn question(correct: OptionTag) -> Question {
        QuestionDraft {
            text: "Which?".into(),
            options: vec![
                QuizOption {
                    text: "one".into(),
                    tag: OptionTag::A,
                },
                QuizOption {
                    text: "two".into(),
                    tag: OptionTag::B,
                },
            ],
            correct_option: correct,
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn forced_zero_ignores_correct_answers() {
        let questions = vec![question(OptionTag::A)];
        let mut submission = SubmissionRequest::normal(vec![OptionTag::A]);
        submission.force_zero_score = true;
        let attempt = grade(QuizId::new(1), &questions, &submission, fixed_now()).unwrap();
        assert_eq!(attempt.score(), 0);
        assert!(!attempt.is_violation());
    }

    #[test]
    fn empty_history_has_no_review() {
        assert!(review(&[question(OptionTag::A)], &[]).is_none());
    }
}
