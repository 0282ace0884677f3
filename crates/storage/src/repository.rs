use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    Level, LockoutMap, OptionTag, Question, QuizAttempt, QuizId, QuizKey, QuizPolicy, Topic,
    UserId,
};
use quiz_core::progression::Unavailable;
use quiz_core::Clock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::grading;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The store refused to hand out a quiz: locked, out of sequence, or already passed.
    #[error("not available: {reason}")]
    NotAvailable {
        reason: String,
        locked_until: Option<DateTime<Utc>>,
    },

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<Unavailable> for StorageError {
    fn from(value: Unavailable) -> Self {
        let locked_until = match value {
            Unavailable::LockedUntil(until) => Some(until),
            _ => None,
        };
        StorageError::NotAvailable {
            reason: value.to_string(),
            locked_until,
        }
    }
}

impl From<quiz_core::Error> for StorageError {
    fn from(value: quiz_core::Error) -> Self {
        StorageError::Serialization(value.to_string())
    }
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Everything progression needs to know about a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub attempts: Vec<QuizAttempt>,
    pub lockouts: LockoutMap,
}

/// One stored attempt together with the answers it was graded on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: QuizAttempt,
    pub answers: Vec<OptionTag>,
}

/// Identity of a quiz as resolved by the content catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizRef {
    pub id: QuizId,
    pub question_count: u32,
}

/// Payload posted when an attempt ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// One tag per question, in question order.
    pub answers: Vec<OptionTag>,
    pub violation: bool,
    #[serde(default)]
    pub force_zero_score: bool,
    /// Ask the store to record a cool-down for this (topic, level).
    #[serde(default)]
    pub lockout: bool,
}

impl SubmissionRequest {
    #[must_use]
    pub fn normal(answers: Vec<OptionTag>) -> Self {
        Self {
            answers,
            violation: false,
            force_zero_score: false,
            lockout: false,
        }
    }

    #[must_use]
    pub fn violation(answers: Vec<OptionTag>) -> Self {
        Self {
            answers,
            violation: true,
            force_zero_score: true,
            lockout: true,
        }
    }

    /// Whether the store must record a score of zero.
    #[must_use]
    pub fn zero_score(&self) -> bool {
        self.violation || self.force_zero_score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub score: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStatistics {
    pub best_score: u32,
    pub best_percentage: u32,
    pub attempts: u32,
}

/// Post-submission review of the latest attempt at one quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub per_question_correct: Vec<bool>,
    pub statistics: ReviewStatistics,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Persistence of quiz attempts per user.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Fetch the full attempt history and lockout map of a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user is unknown, or other storage errors.
    async fn get_user(&self, user: UserId) -> Result<UserRecord, StorageError>;

    /// Fetch the question set for a quiz the user is about to take.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotAvailable` when the level is locked or out of
    /// sequence for this user, `StorageError::NotFound` for an unknown quiz.
    async fn get_questions(&self, user: UserId, key: &QuizKey) -> Result<Vec<Question>, StorageError>;

    /// Append one attempt. Atomic per user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be stored.
    async fn submit_attempt(
        &self,
        user: UserId,
        key: &QuizKey,
        submission: &SubmissionRequest,
    ) -> Result<SubmissionResult, StorageError>;

    /// Per-question correctness of the latest attempt plus best-score statistics.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user never attempted this quiz.
    async fn get_review(&self, user: UserId, key: &QuizKey) -> Result<ReviewRecord, StorageError>;

    /// Mark a topic course as completed with the given percentage result.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the result cannot be stored.
    async fn complete_course(&self, user: UserId, topic: &Topic, result: u32) -> Result<(), StorageError>;
}

/// Read-only view of quiz identities owned by the content collaborator.
#[async_trait]
pub trait QuizCatalog: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no quiz exists for the key.
    async fn get_quiz(&self, key: &QuizKey) -> Result<QuizRef, StorageError>;
}

/// Resolves every level of a topic to its quiz, leaving gaps as `None`.
///
/// # Errors
///
/// Propagates catalog errors other than `NotFound`.
pub async fn resolve_levels(
    catalog: &dyn QuizCatalog,
    key: &QuizKey,
) -> Result<Vec<(Level, Option<QuizRef>)>, StorageError> {
    let mut out = Vec::with_capacity(Level::ALL.len());
    for level in Level::ALL {
        match catalog.get_quiz(&key.with_level(level)).await {
            Ok(quiz) => out.push((level, Some(quiz))),
            Err(StorageError::NotFound) => out.push((level, None)),
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

//
// ─── IN-MEMORY ADAPTER ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct StoredQuiz {
    id: QuizId,
    questions: Vec<Question>,
}

#[derive(Debug, Clone, Default)]
struct StoredUser {
    attempts: Vec<AttemptRecord>,
    lockouts: LockoutMap,
    courses: BTreeMap<Topic, u32>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    clock: Clock,
    next_quiz_id: u64,
    quizzes: HashMap<QuizKey, StoredQuiz>,
    users: HashMap<UserId, StoredUser>,
}

/// Mutex-backed store implementing both collaborator contracts.
///
/// Applies the same server-side rules as the `SQLite` adapter, which makes it
/// suitable for tests and prototypes.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
    policy: QuizPolicy,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(self, clock: Clock) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.clock = clock;
        }
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: QuizPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Replace the store clock, e.g. to step past a lockout in tests.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the state lock is poisoned.
    pub fn set_clock(&self, clock: Clock) -> Result<(), StorageError> {
        self.lock()?.clock = clock;
        Ok(())
    }

    /// Register a quiz with its questions and return its new id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a quiz already exists for the key.
    pub fn insert_quiz(&self, key: QuizKey, questions: Vec<Question>) -> Result<QuizId, StorageError> {
        let mut state = self.lock()?;
        if state.quizzes.contains_key(&key) {
            return Err(StorageError::Conflict);
        }
        state.next_quiz_id += 1;
        let id = QuizId::new(state.next_quiz_id);
        state.quizzes.insert(key, StoredQuiz { id, questions });
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the user already exists.
    pub fn insert_user(&self, user: UserId) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        if state.users.contains_key(&user) {
            return Err(StorageError::Conflict);
        }
        state.users.insert(user, StoredUser::default());
        Ok(())
    }

    /// Seed a historical attempt without grading it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown user.
    pub fn seed_attempt(&self, user: UserId, record: AttemptRecord) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let stored = state.users.get_mut(&user).ok_or(StorageError::NotFound)?;
        stored.attempts.push(record);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown user.
    pub fn seed_lockout(
        &self,
        user: UserId,
        topic: &Topic,
        level: Level,
        until: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let stored = state.users.get_mut(&user).ok_or(StorageError::NotFound)?;
        stored.lockouts.record(topic, level, until);
        Ok(())
    }

    /// Recorded course result for a topic, if the course was completed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown user.
    pub fn course_result(&self, user: UserId, topic: &Topic) -> Result<Option<u32>, StorageError> {
        let state = self.lock()?;
        let stored = state.users.get(&user).ok_or(StorageError::NotFound)?;
        Ok(stored.courses.get(topic).copied())
    }
}

#[async_trait]
impl QuizCatalog for InMemoryStore {
    async fn get_quiz(&self, key: &QuizKey) -> Result<QuizRef, StorageError> {
        let state = self.lock()?;
        let quiz = state.quizzes.get(key).ok_or(StorageError::NotFound)?;
        Ok(QuizRef {
            id: quiz.id,
            question_count: u32::try_from(quiz.questions.len()).unwrap_or(u32::MAX),
        })
    }
}

#[async_trait]
impl AttemptStore for InMemoryStore {
    async fn get_user(&self, user: UserId) -> Result<UserRecord, StorageError> {
        let state = self.lock()?;
        let stored = state.users.get(&user).ok_or(StorageError::NotFound)?;
        Ok(UserRecord {
            attempts: stored.attempts.iter().map(|r| r.attempt.clone()).collect(),
            lockouts: stored.lockouts.clone(),
        })
    }

    async fn get_questions(&self, user: UserId, key: &QuizKey) -> Result<Vec<Question>, StorageError> {
        let state = self.lock()?;
        let stored = state.users.get(&user).ok_or(StorageError::NotFound)?;
        let quiz = state.quizzes.get(key).ok_or(StorageError::NotFound)?;
        let levels: Vec<(Level, Option<QuizId>)> = Level::ALL
            .iter()
            .map(|level| (*level, state.quizzes.get(&key.with_level(*level)).map(|q| q.id)))
            .collect();
        let attempts: Vec<QuizAttempt> = stored.attempts.iter().map(|r| r.attempt.clone()).collect();
        grading::ensure_startable(
            &key.topic,
            key.level,
            &levels,
            &attempts,
            &stored.lockouts,
            &self.policy,
            state.clock.now(),
        )?;
        Ok(quiz.questions.clone())
    }

    async fn submit_attempt(
        &self,
        user: UserId,
        key: &QuizKey,
        submission: &SubmissionRequest,
    ) -> Result<SubmissionResult, StorageError> {
        let mut state = self.lock()?;
        let now = state.clock.now();
        let quiz = state.quizzes.get(key).ok_or(StorageError::NotFound)?.clone();
        let stored = state.users.get_mut(&user).ok_or(StorageError::NotFound)?;

        let attempt = grading::grade(quiz.id, &quiz.questions, submission, now)?;
        let score = attempt.score();
        stored.attempts.push(AttemptRecord {
            attempt,
            answers: submission.answers.clone(),
        });
        if submission.lockout {
            let until = stored
                .lockouts
                .record(&key.topic, key.level, now + self.policy.lockout());
            tracing::info!(%user, quiz = %key, %until, "lockout recorded");
        }
        Ok(SubmissionResult { score })
    }

    async fn get_review(&self, user: UserId, key: &QuizKey) -> Result<ReviewRecord, StorageError> {
        let state = self.lock()?;
        let stored = state.users.get(&user).ok_or(StorageError::NotFound)?;
        let quiz = state.quizzes.get(key).ok_or(StorageError::NotFound)?;
        let history: Vec<&AttemptRecord> = stored
            .attempts
            .iter()
            .filter(|r| r.attempt.quiz_id() == quiz.id)
            .collect();
        grading::review(&quiz.questions, &history).ok_or(StorageError::NotFound)
    }

    async fn complete_course(&self, user: UserId, topic: &Topic, result: u32) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let stored = state.users.get_mut(&user).ok_or(StorageError::NotFound)?;
        stored.courses.insert(topic.clone(), result);
        Ok(())
    }
}

/// Aggregates the collaborator contracts behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub attempts: Arc<dyn AttemptStore>,
    pub catalog: Arc<dyn QuizCatalog>,
}

impl Storage {
    #[must_use]
    pub fn in_memory(store: InMemoryStore) -> Self {
        let attempts: Arc<dyn AttemptStore> = Arc::new(store.clone());
        let catalog: Arc<dyn QuizCatalog> = Arc::new(store);
        Self { attempts, catalog }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quiz_core::model::{Language, QuestionDraft, QuizOption};
    use quiz_core::time::{fixed_clock, fixed_now};

    fn question(correct: OptionTag) -> Question {
        QuestionDraft {
            text: "Q".into(),
            options: [OptionTag::A, OptionTag::B, OptionTag::C, OptionTag::D]
                .into_iter()
                .map(|tag| QuizOption {
                    text: tag.to_string(),
                    tag,
                })
                .collect(),
            correct_option: correct,
        }
        .validate()
        .unwrap()
    }

    fn key(level: Level) -> QuizKey {
        QuizKey::new(Language::new("cpp").unwrap(), level, Topic::new("stacks").unwrap())
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new().with_clock(fixed_clock());
        for level in Level::ALL {
            store
                .insert_quiz(key(level), vec![question(OptionTag::A), question(OptionTag::C)])
                .unwrap();
        }
        store.insert_user(UserId::new(1)).unwrap();
        store
    }

    #[tokio::test]
    async fn grades_and_appends_attempt() {
        let store = seeded();
        let user = UserId::new(1);
        let result = store
            .submit_attempt(
                user,
                &key(Level::Beginner),
                &SubmissionRequest::normal(vec![OptionTag::A, OptionTag::B]),
            )
            .await
            .unwrap();
        assert_eq!(result.score, 1);

        let record = store.get_user(user).await.unwrap();
        assert_eq!(record.attempts.len(), 1);
        assert_eq!(record.attempts[0].answer_count(), 2);
        assert!(record.lockouts.is_empty());
    }

    #[tokio::test]
    async fn violation_scores_zero_and_records_lockout() {
        let store = seeded();
        let user = UserId::new(1);
        let result = store
            .submit_attempt(
                user,
                &key(Level::Beginner),
                &SubmissionRequest::violation(vec![OptionTag::A, OptionTag::C]),
            )
            .await
            .unwrap();
        assert_eq!(result.score, 0);

        let record = store.get_user(user).await.unwrap();
        assert!(record.attempts[0].is_violation());
        assert_eq!(
            record.lockouts.get(&Topic::new("stacks").unwrap(), Level::Beginner),
            Some(fixed_now() + Duration::hours(24))
        );

        let err = store.get_questions(user, &key(Level::Beginner)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::NotAvailable {
                locked_until: Some(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn refuses_out_of_sequence_questions() {
        let store = seeded();
        let err = store
            .get_questions(UserId::new(1), &key(Level::Intermediate))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotAvailable { locked_until: None, .. }));
        assert!(store.get_questions(UserId::new(1), &key(Level::Beginner)).await.is_ok());
    }

    #[tokio::test]
    async fn review_reports_latest_answers_and_best_score() {
        let store = seeded();
        let user = UserId::new(1);
        let k = key(Level::Beginner);
        store
            .submit_attempt(user, &k, &SubmissionRequest::normal(vec![OptionTag::A, OptionTag::C]))
            .await
            .unwrap();
        store
            .submit_attempt(user, &k, &SubmissionRequest::normal(vec![OptionTag::B, OptionTag::C]))
            .await
            .unwrap();

        let review = store.get_review(user, &k).await.unwrap();
        assert_eq!(review.per_question_correct, vec![false, true]);
        assert_eq!(review.statistics.best_score, 2);
        assert_eq!(review.statistics.best_percentage, 100);
        assert_eq!(review.statistics.attempts, 2);
    }

    #[tokio::test]
    async fn resolves_levels_with_gaps() {
        let store = InMemoryStore::new();
        store.insert_quiz(key(Level::Beginner), vec![question(OptionTag::A)]).unwrap();
        let levels = resolve_levels(&store, &key(Level::Beginner)).await.unwrap();
        assert!(levels[0].1.is_some());
        assert!(levels[1].1.is_none());
        assert!(levels[2].1.is_none());
    }
}
