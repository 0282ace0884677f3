use std::sync::Arc;

use chrono::{DateTime, Utc};
use quiz_core::model::{Language, Level, QuizKey, QuizPolicy, Topic, UserId};
use quiz_core::progression::{LevelProgress, LevelStatus, ProgressionInput, evaluate};
use serde::Serialize;
use storage::repository::{AttemptStore, QuizCatalog, QuizRef, resolve_levels};
use tracing::debug;

use crate::Clock;
use crate::error::SessionError;
use crate::sessions::SessionPhase;

/// One row of the level selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelEntry {
    pub level: Level,
    /// `None` when the catalog has no quiz for this level.
    pub quiz: Option<QuizRef>,
    pub status: LevelStatus,
}

/// Per-level state of one topic for one user, as of `evaluated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelBoard {
    pub topic: Topic,
    pub entries: Vec<LevelEntry>,
    pub evaluated_at: DateTime<Utc>,
    #[serde(skip)]
    progress: LevelProgress,
}

impl LevelBoard {
    #[must_use]
    pub fn status(&self, level: Level) -> Option<LevelStatus> {
        self.entries
            .iter()
            .find(|entry| entry.level == level)
            .map(|entry| entry.status)
    }

    #[must_use]
    pub fn progress(&self) -> &LevelProgress {
        &self.progress
    }

    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.progress.all_completed()
    }
}

/// Read side of progression for the level-selector view.
///
/// Never caches: every call re-reads attempts and lockouts so two rapid
/// submissions are always judged against the latest persisted history.
#[derive(Clone)]
pub struct ProgressionService {
    clock: Clock,
    policy: QuizPolicy,
    store: Arc<dyn AttemptStore>,
    catalog: Arc<dyn QuizCatalog>,
}

impl ProgressionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: QuizPolicy,
        store: Arc<dyn AttemptStore>,
        catalog: Arc<dyn QuizCatalog>,
    ) -> Self {
        Self {
            clock,
            policy,
            store,
            catalog,
        }
    }

    /// Evaluate every level of `topic` for `user`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::FetchFailure` in `Checking` when history or quiz
    /// identities cannot be read.
    pub async fn board(
        &self,
        user: UserId,
        language: &Language,
        topic: &Topic,
    ) -> Result<LevelBoard, SessionError> {
        let key = QuizKey::new(language.clone(), Level::Beginner, topic.clone());
        let record = self
            .store
            .get_user(user)
            .await
            .map_err(|err| SessionError::fetch(SessionPhase::Checking, &err))?;
        let resolved = resolve_levels(self.catalog.as_ref(), &key)
            .await
            .map_err(|err| SessionError::fetch(SessionPhase::Checking, &err))?;

        let levels: Vec<_> = resolved
            .iter()
            .map(|(level, quiz)| (*level, quiz.map(|q| q.id)))
            .collect();
        let now = self.clock.now();
        let progress = evaluate(
            &ProgressionInput {
                topic,
                levels: &levels,
                attempts: &record.attempts,
                lockouts: &record.lockouts,
            },
            &self.policy,
            now,
        );

        let entries = resolved
            .into_iter()
            .map(|(level, quiz)| LevelEntry {
                level,
                quiz,
                status: progress.status(level, now),
            })
            .collect();
        debug!(user_id = %user, %topic, completed = progress.completed().len(), "level board evaluated");

        Ok(LevelBoard {
            topic: topic.clone(),
            entries,
            evaluated_at: now,
            progress,
        })
    }
}
