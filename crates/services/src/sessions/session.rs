use std::sync::Arc;

use quiz_core::model::{
    OptionTag, Question, QuizKey, QuizPolicy, SessionId, TrackKind, UserId, count_correct,
};
use storage::repository::{AttemptStore, QuizRef, ReviewRecord, SubmissionRequest};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::integrity::{IntegrityMonitor, MonitorState, ViolationKind};

use super::route::{Route, SessionPhase, SubmissionKind, SubmissionReceipt};

/// One live attempt at a quiz, from the first question to the review.
///
/// The integrity monitor is armed for the whole `Active` phase. Its first
/// violation is delivered through [`QuizSession::next_violation`] or
/// [`QuizSession::drain_violation`]; the driver then calls
/// [`QuizSession::submit_violation`]. Dropping the session disarms the monitor.
pub struct QuizSession {
    id: SessionId,
    user: UserId,
    key: QuizKey,
    quiz: QuizRef,
    questions: Vec<Question>,
    answers: Vec<Option<OptionTag>>,
    current: usize,
    phase: SessionPhase,
    policy: QuizPolicy,
    store: Arc<dyn AttemptStore>,
    monitor: IntegrityMonitor,
    violations: Option<oneshot::Receiver<ViolationKind>>,
    receipt: Option<SubmissionReceipt>,
    pending: Option<SubmissionRequest>,
    review: Option<ReviewRecord>,
}

/// Immutable inputs of a session, gathered while checking and loading.
pub(crate) struct SessionSetup {
    pub id: SessionId,
    pub user: UserId,
    pub key: QuizKey,
    pub quiz: QuizRef,
    pub questions: Vec<Question>,
    pub policy: QuizPolicy,
    pub store: Arc<dyn AttemptStore>,
    pub monitor: IntegrityMonitor,
}

impl QuizSession {
    /// Enter `Active` and arm the monitor.
    pub(crate) fn start(setup: SessionSetup) -> Self {
        let answers = vec![None; setup.questions.len()];
        let mut session = Self {
            id: setup.id,
            user: setup.user,
            key: setup.key,
            quiz: setup.quiz,
            questions: setup.questions,
            answers,
            current: 0,
            phase: SessionPhase::Active,
            policy: setup.policy,
            store: setup.store,
            monitor: setup.monitor,
            violations: None,
            receipt: None,
            pending: None,
            review: None,
        };
        session.arm_monitor();
        info!(
            session_id = %session.id,
            user_id = %session.user,
            level = %session.key.level,
            topic = %session.key.topic,
            questions = session.questions.len(),
            "quiz session active"
        );
        session
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn user(&self) -> UserId {
        self.user
    }

    #[must_use]
    pub fn key(&self) -> &QuizKey {
        &self.key
    }

    #[must_use]
    pub fn quiz(&self) -> QuizRef {
        self.quiz
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<OptionTag>] {
        &self.answers
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    #[must_use]
    pub fn receipt(&self) -> Option<SubmissionReceipt> {
        self.receipt
    }

    #[must_use]
    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// Last review fetched by [`QuizSession::review`].
    #[must_use]
    pub fn last_review(&self) -> Option<&ReviewRecord> {
        self.review.as_ref()
    }

    //
    // ─── ANSWERING ─────────────────────────────────────────────────────────────
    //

    /// Record an answer for the current question.
    ///
    /// # Errors
    ///
    /// See [`QuizSession::answer_at`].
    pub fn answer(&mut self, tag: OptionTag) -> Result<(), SessionError> {
        self.answer_at(self.current, tag)
    }

    /// Record or overwrite the answer for question `index`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` outside `Active`,
    /// `SessionError::ViolationDetected` once the monitor has fired, and
    /// `SessionError::QuestionOutOfRange` for a bad index.
    pub fn answer_at(&mut self, index: usize, tag: OptionTag) -> Result<(), SessionError> {
        self.ensure_phase(SessionPhase::Active)?;
        if self.monitor.is_fired() {
            return Err(SessionError::ViolationDetected);
        }
        let len = self.answers.len();
        let slot = self
            .answers
            .get_mut(index)
            .ok_or(SessionError::QuestionOutOfRange { index, len })?;
        *slot = Some(tag);
        Ok(())
    }

    /// Whether "next" is enabled: the current question is answered and is not the last.
    #[must_use]
    pub fn can_advance(&self) -> bool {
        self.phase == SessionPhase::Active
            && self.current + 1 < self.questions.len()
            && self.answers.get(self.current).is_some_and(Option::is_some)
    }

    pub fn next(&mut self) -> bool {
        if !self.can_advance() {
            return false;
        }
        self.current += 1;
        true
    }

    pub fn previous(&mut self) -> bool {
        if self.phase != SessionPhase::Active || self.current == 0 {
            return false;
        }
        self.current -= 1;
        true
    }

    //
    // ─── VIOLATIONS ────────────────────────────────────────────────────────────
    //

    /// Wait for the monitor to report a violation.
    ///
    /// Resolves to `None` once the monitor is disarmed without firing, or when
    /// the violation was already taken.
    pub async fn next_violation(&mut self) -> Option<ViolationKind> {
        let receiver = self.violations.as_mut()?;
        let kind = receiver.await.ok();
        self.violations = None;
        kind
    }

    /// Non-blocking check for a reported violation.
    pub fn drain_violation(&mut self) -> Option<ViolationKind> {
        let receiver = self.violations.as_mut()?;
        match receiver.try_recv() {
            Ok(kind) => {
                self.violations = None;
                Some(kind)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.violations = None;
                None
            }
        }
    }

    //
    // ─── SUBMISSION ────────────────────────────────────────────────────────────
    //

    /// Submit the answers as a normal attempt.
    ///
    /// Idempotent once submitted: later calls return the first receipt. If
    /// the monitor has already fired, this becomes a violation submission.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Incomplete` when a question is unanswered,
    /// `SessionError::InvalidPhase` outside `Active`, and
    /// `SessionError::SubmissionFailure` when the store rejects the post. After a
    /// failure the session is `Active` again with the monitor re-armed.
    pub async fn submit(&mut self) -> Result<SubmissionReceipt, SessionError> {
        if let Some(receipt) = self.receipt {
            return Ok(receipt);
        }
        self.ensure_phase(SessionPhase::Active)?;
        if let Some(kind) = self.monitor.violation() {
            return self.submit_violation(kind).await;
        }

        let unanswered = self.answers.iter().filter(|a| a.is_none()).count();
        if unanswered > 0 {
            return Err(SessionError::Incomplete { unanswered });
        }
        let answers: Vec<OptionTag> = self.answers.iter().flatten().copied().collect();
        let client_score = count_correct(&self.questions, &self.answers);

        self.stop_monitor();
        // Nothing can fire after disarm; a violation latched before it still wins.
        if let Some(kind) = self.monitor.violation() {
            return self.submit_violation(kind).await;
        }
        self.phase = SessionPhase::Submitting;
        let request = SubmissionRequest::normal(answers);

        match self.store.submit_attempt(self.user, &self.key, &request).await {
            Ok(result) => {
                let receipt = SubmissionReceipt {
                    kind: SubmissionKind::Normal,
                    server_score: Some(result.score),
                    client_score,
                    persisted: true,
                };
                if !receipt.scores_agree() {
                    warn!(
                        session_id = %self.id,
                        server_score = result.score,
                        client_score,
                        "server and client scores disagree"
                    );
                }
                Ok(self.finish(receipt))
            }
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "submission failed");
                self.phase = SessionPhase::Active;
                self.arm_monitor();
                Err(SessionError::SubmissionFailure(err))
            }
        }
    }

    /// Force-submit after a violation: unanswered questions get the
    /// placeholder tag and the store is asked for a zero score plus lockout.
    ///
    /// Never fails once the session is live. If every post attempt fails, the
    /// session is still marked `Submitted(Violation)` with score 0 and the
    /// request is kept for [`QuizSession::reconcile`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` when the session was torn down or
    /// never became active.
    pub async fn submit_violation(
        &mut self,
        kind: ViolationKind,
    ) -> Result<SubmissionReceipt, SessionError> {
        if let Some(receipt) = self.receipt {
            return Ok(receipt);
        }
        self.ensure_phase(SessionPhase::Active)?;

        self.stop_monitor();
        self.phase = SessionPhase::Submitting;
        let placeholder = self.policy.violation_placeholder();
        let answers = self
            .answers
            .iter()
            .map(|a| a.unwrap_or(placeholder))
            .collect();
        let request = SubmissionRequest::violation(answers);

        let tries = self.policy.violation_submit_attempts().max(1);
        let mut server_score = None;
        for attempt in 1..=tries {
            match self.store.submit_attempt(self.user, &self.key, &request).await {
                Ok(result) => {
                    server_score = Some(result.score);
                    break;
                }
                Err(err) => {
                    warn!(session_id = %self.id, attempt, error = %err, "violation submission failed");
                }
            }
        }

        let persisted = server_score.is_some();
        if !persisted {
            error!(
                session_id = %self.id,
                ?kind,
                "violation kept locally; submission pending reconciliation"
            );
            self.pending = Some(request);
        }
        info!(session_id = %self.id, ?kind, persisted, "violation submitted");

        Ok(self.finish(SubmissionReceipt {
            kind: SubmissionKind::Violation,
            server_score,
            client_score: 0,
            persisted,
        }))
    }

    /// Violation request that never reached the store.
    #[must_use]
    pub fn pending_reconciliation(&self) -> Option<&SubmissionRequest> {
        self.pending.as_ref()
    }

    /// Re-post a pending violation submission.
    ///
    /// Returns `false` when nothing was pending.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SubmissionFailure` if the store still rejects it;
    /// the request stays pending.
    pub async fn reconcile(&mut self) -> Result<bool, SessionError> {
        let Some(request) = self.pending.as_ref() else {
            return Ok(false);
        };
        let result = self
            .store
            .submit_attempt(self.user, &self.key, request)
            .await
            .map_err(SessionError::SubmissionFailure)?;

        self.pending = None;
        if let Some(receipt) = self.receipt.as_mut() {
            receipt.server_score = Some(result.score);
            receipt.persisted = true;
        }
        info!(session_id = %self.id, "pending violation reconciled");
        Ok(true)
    }

    //
    // ─── AFTER SUBMISSION ──────────────────────────────────────────────────────
    //

    /// Fetch the review of the submitted attempt. The monitor stays disarmed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPhase` before submission and
    /// `SessionError::FetchFailure` when the review cannot be loaded.
    pub async fn review(&mut self) -> Result<ReviewRecord, SessionError> {
        if !self.phase.is_submitted() {
            return Err(SessionError::InvalidPhase { phase: self.phase });
        }
        let review = self
            .store
            .get_review(self.user, &self.key)
            .await
            .map_err(|err| SessionError::fetch(self.phase, &err))?;
        self.phase = SessionPhase::Reviewing;
        self.review = Some(review.clone());
        Ok(review)
    }

    /// Where to send the user after submitting. `None` until submitted.
    #[must_use]
    pub fn next_route(&self) -> Option<Route> {
        if !self.phase.is_submitted() {
            return None;
        }
        Some(match self.key.topic.kind() {
            TrackKind::Basic => Route::after_basic(self.key.level),
            TrackKind::Topic => Route::LevelSelector(self.key.topic.clone()),
        })
    }

    /// Navigation away: detach the monitor and close the session.
    pub fn teardown(&mut self) {
        self.stop_monitor();
        if self.phase != SessionPhase::Closed {
            debug!(session_id = %self.id, phase = %self.phase, "quiz session torn down");
        }
        self.phase = SessionPhase::Closed;
    }

    //
    // ─── INTERNALS ─────────────────────────────────────────────────────────────
    //

    fn ensure_phase(&self, expected: SessionPhase) -> Result<(), SessionError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidPhase { phase: self.phase })
        }
    }

    fn arm_monitor(&mut self) {
        let (tx, rx) = oneshot::channel();
        let armed = self.monitor.arm(move |kind| {
            let _ = tx.send(kind);
        });
        if armed {
            self.violations = Some(rx);
        } else {
            warn!(session_id = %self.id, "integrity monitor could not be armed");
        }
    }

    fn stop_monitor(&mut self) {
        self.monitor.disarm();
        self.violations = None;
    }

    fn finish(&mut self, receipt: SubmissionReceipt) -> SubmissionReceipt {
        self.receipt = Some(receipt);
        self.phase = SessionPhase::Submitted(receipt.kind);
        info!(
            session_id = %self.id,
            user_id = %self.user,
            level = %self.key.level,
            topic = %self.key.topic,
            score = receipt.displayed_score(),
            "quiz submitted"
        );
        receipt
    }
}
