#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use quiz_core::model::{
    Language, Level, OptionTag, Question, QuestionDraft, QuizKey, QuizOption, QuizPolicy, Topic,
    UserId,
};
use quiz_core::time::fixed_clock;
use services::integrity::{ManualSignalSource, RecordingWarningSink};
use services::{OpenOutcome, QuizSession, QuizSessionController};
use storage::repository::{
    AttemptStore, InMemoryStore, ReviewRecord, StorageError, SubmissionRequest, SubmissionResult,
    UserRecord,
};
use tracing_subscriber::EnvFilter;

pub const USER: UserId = UserId::new(1);
pub const QUESTIONS_PER_QUIZ: usize = 4;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn python() -> Language {
    Language::new("python").unwrap()
}

pub fn stacks() -> Topic {
    Topic::new("stacks").unwrap()
}

pub fn key(topic: &Topic, level: Level) -> QuizKey {
    QuizKey::new(python(), level, topic.clone())
}

/// Four options, `A` is always right.
pub fn question(n: usize) -> Question {
    let options = [OptionTag::A, OptionTag::B, OptionTag::C, OptionTag::D]
        .into_iter()
        .map(|tag| QuizOption {
            text: format!("option {tag} of question {n}"),
            tag,
        })
        .collect();
    QuestionDraft {
        text: format!("question {n}"),
        options,
        correct_option: OptionTag::A,
    }
    .validate()
    .unwrap()
}

pub fn questions() -> Vec<Question> {
    (1..=QUESTIONS_PER_QUIZ).map(question).collect()
}

/// In-memory store with every level of `topic` seeded, plus `USER`.
pub fn seeded_store(topic: &Topic) -> InMemoryStore {
    let store = InMemoryStore::new().with_clock(fixed_clock());
    for level in Level::ALL {
        store.insert_quiz(key(topic, level), questions()).unwrap();
    }
    store.insert_user(USER).unwrap();
    store
}

pub struct Harness {
    pub store: InMemoryStore,
    pub signals: ManualSignalSource,
    pub warnings: RecordingWarningSink,
    pub controller: QuizSessionController,
}

pub fn harness(topic: &Topic) -> Harness {
    let store = seeded_store(topic);
    harness_with(store.clone(), Arc::new(store))
}

pub fn harness_with(store: InMemoryStore, attempts: Arc<dyn AttemptStore>) -> Harness {
    init_tracing();
    let signals = ManualSignalSource::new();
    let warnings = RecordingWarningSink::new();
    let controller = QuizSessionController::new(
        fixed_clock(),
        QuizPolicy::default(),
        attempts,
        Arc::new(store.clone()),
        Arc::new(signals.clone()),
        Arc::new(warnings.clone()),
    );
    Harness {
        store,
        signals,
        warnings,
        controller,
    }
}

pub async fn open_ready(harness: &Harness, key: QuizKey) -> QuizSession {
    match harness.controller.open(USER, key).await.unwrap() {
        OpenOutcome::Ready(session) => session,
        OpenOutcome::Redirect(redirect) => panic!("unexpected redirect: {redirect:?}"),
    }
}

/// Answer every question, `correct` of them right.
pub fn answer_all(session: &mut QuizSession, correct: usize) {
    for index in 0..session.questions().len() {
        let tag = if index < correct { OptionTag::A } else { OptionTag::C };
        session.answer_at(index, tag).unwrap();
    }
}

/// Attempt store whose submissions fail while `failures` is non-zero.
#[derive(Clone)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub failures: Arc<AtomicUsize>,
    pub posts: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(failures)),
            posts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl AttemptStore for FlakyStore {
    async fn get_user(&self, user: UserId) -> Result<UserRecord, StorageError> {
        self.inner.get_user(user).await
    }

    async fn get_questions(&self, user: UserId, key: &QuizKey) -> Result<Vec<Question>, StorageError> {
        self.inner.get_questions(user, key).await
    }

    async fn submit_attempt(
        &self,
        user: UserId,
        key: &QuizKey,
        submission: &SubmissionRequest,
    ) -> Result<SubmissionResult, StorageError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Connection("store offline".into()));
        }
        self.inner.submit_attempt(user, key, submission).await
    }

    async fn get_review(&self, user: UserId, key: &QuizKey) -> Result<ReviewRecord, StorageError> {
        self.inner.get_review(user, key).await
    }

    async fn complete_course(&self, user: UserId, topic: &Topic, result: u32) -> Result<(), StorageError> {
        self.inner.complete_course(user, topic, result).await
    }
}
