use std::sync::Arc;

use quiz_core::model::{QuizId, QuizKey, QuizPolicy, SessionId, TrackKind, UserId};
use quiz_core::progression::{ProgressionInput, already_passed, evaluate, has_attempted};
use storage::repository::{AttemptStore, QuizCatalog, StorageError, resolve_levels};
use storage::Storage;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::integrity::{IntegrityMonitor, SignalSource, WarningSink};
use crate::Clock;

use super::route::{OpenOutcome, Redirect, Route, SessionPhase};
use super::session::{QuizSession, SessionSetup};

/// Opens quiz sessions: availability check, question fetch, monitor wiring.
#[derive(Clone)]
pub struct QuizSessionController {
    clock: Clock,
    policy: QuizPolicy,
    store: Arc<dyn AttemptStore>,
    catalog: Arc<dyn QuizCatalog>,
    signals: Arc<dyn SignalSource>,
    warnings: Arc<dyn WarningSink>,
}

impl QuizSessionController {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: QuizPolicy,
        store: Arc<dyn AttemptStore>,
        catalog: Arc<dyn QuizCatalog>,
        signals: Arc<dyn SignalSource>,
        warnings: Arc<dyn WarningSink>,
    ) -> Self {
        Self {
            clock,
            policy,
            store,
            catalog,
            signals,
            warnings,
        }
    }

    #[must_use]
    pub fn from_storage(
        clock: Clock,
        policy: QuizPolicy,
        storage: &Storage,
        signals: Arc<dyn SignalSource>,
        warnings: Arc<dyn WarningSink>,
    ) -> Self {
        Self::new(
            clock,
            policy,
            Arc::clone(&storage.attempts),
            Arc::clone(&storage.catalog),
            signals,
            warnings,
        )
    }

    #[must_use]
    pub fn policy(&self) -> &QuizPolicy {
        &self.policy
    }

    /// Open the quiz route for `key`.
    ///
    /// History is always re-read from the store. A quiz the user may not take
    /// yields `OpenOutcome::Redirect`; otherwise the questions are loaded and
    /// the session starts `Active` with its monitor armed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::FetchFailure` when the quiz, history or questions
    /// cannot be loaded, including an empty question set. Its `phase` is
    /// `Checking` or `Loading`.
    pub async fn open(&self, user: UserId, key: QuizKey) -> Result<OpenOutcome, SessionError> {
        let session_id = SessionId::new_random();
        debug!(%session_id, user_id = %user, level = %key.level, topic = %key.topic, "checking quiz availability");

        // ─── Checking ───
        let quiz = self.catalog.get_quiz(&key).await.map_err(checking)?;
        let record = self.store.get_user(user).await.map_err(checking)?;
        let now = self.clock.now();

        let early = match key.topic.kind() {
            TrackKind::Basic => has_attempted(&record.attempts, quiz.id).then(|| Redirect {
                route: Route::after_basic(key.level),
                message: format!("You have already taken the {} basic quiz.", key.level),
            }),
            TrackKind::Topic => already_passed(&record.attempts, quiz.id, &self.policy).map(|_| Redirect {
                route: Route::LevelSelector(key.topic.clone()),
                message: format!("You have already passed the {} {} quiz.", key.level, key.topic),
            }),
        };
        if let Some(redirect) = early {
            return Ok(redirect_with(session_id, redirect));
        }

        let levels: Vec<(_, Option<QuizId>)> = resolve_levels(self.catalog.as_ref(), &key)
            .await
            .map_err(checking)?
            .into_iter()
            .map(|(level, quiz)| (level, quiz.map(|q| q.id)))
            .collect();
        let progress = evaluate(
            &ProgressionInput {
                topic: &key.topic,
                levels: &levels,
                attempts: &record.attempts,
                lockouts: &record.lockouts,
            },
            &self.policy,
            now,
        );
        if let Err(unavailable) = progress.startable(key.level, now) {
            return Ok(redirect_with(
                session_id,
                Redirect {
                    route: Route::LevelSelector(key.topic.clone()),
                    message: unavailable.to_string(),
                },
            ));
        }

        // ─── Loading ───
        let questions = match self.store.get_questions(user, &key).await {
            Ok(questions) => questions,
            Err(StorageError::NotAvailable { reason, .. }) => {
                return Ok(redirect_with(
                    session_id,
                    Redirect {
                        route: Route::LevelSelector(key.topic.clone()),
                        message: reason,
                    },
                ));
            }
            Err(err) => return Err(SessionError::fetch(SessionPhase::Loading, &err)),
        };
        if questions.is_empty() {
            warn!(%session_id, quiz = %key, "quiz has no questions");
            return Err(SessionError::FetchFailure {
                phase: SessionPhase::Loading,
                reason: format!("quiz {key} has no questions"),
            });
        }

        let monitor = IntegrityMonitor::new(
            Arc::clone(&self.signals),
            Arc::clone(&self.warnings),
            self.policy.blur_debounce(),
        );
        Ok(OpenOutcome::Ready(QuizSession::start(SessionSetup {
            id: session_id,
            user,
            key,
            quiz,
            questions,
            policy: self.policy.clone(),
            store: Arc::clone(&self.store),
            monitor,
        })))
    }
}

fn checking(err: StorageError) -> SessionError {
    SessionError::fetch(SessionPhase::Checking, &err)
}

fn redirect_with(session_id: SessionId, redirect: Redirect) -> OpenOutcome {
    info!(%session_id, route = ?redirect.route, message = %redirect.message, "quiz redirected");
    OpenOutcome::Redirect(redirect)
}
