use chrono::{DateTime, Utc};
use quiz_core::model::{
    Level, LockoutMap, Question, QuizAttempt, QuizId, QuizKey, Topic, UserId,
};
use sqlx::Row;

use super::SqliteStore;
use super::mapping::{
    answers_to_text, conn, id_to_i64, map_attempt_row, parse_level, ser, user_id_to_i64,
};
use crate::grading;
use crate::repository::{
    AttemptRecord, AttemptStore, ReviewRecord, StorageError, SubmissionRequest, SubmissionResult, UserRecord,
};

impl SqliteStore {
    async fn ensure_user(&self, user: UserId) -> Result<i64, StorageError> {
        let id = user_id_to_i64(user)?;
        sqlx::query("SELECT 1 FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        Ok(id)
    }

    async fn load_attempts(
        &self,
        user_id: i64,
        quiz_id: Option<QuizId>,
    ) -> Result<Vec<AttemptRecord>, StorageError> {
        let rows = match quiz_id {
            Some(quiz_id) => sqlx::query(
                r"
                    SELECT quiz_id, score, answer_count, answers, violation, submitted_at
                    FROM attempts
                    WHERE user_id = ?1 AND quiz_id = ?2
                    ORDER BY submitted_at ASC, id ASC
                ",
            )
            .bind(user_id)
            .bind(id_to_i64("quiz_id", quiz_id.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?,
            None => sqlx::query(
                r"
                    SELECT quiz_id, score, answer_count, answers, violation, submitted_at
                    FROM attempts
                    WHERE user_id = ?1
                    ORDER BY submitted_at ASC, id ASC
                ",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?,
        };
        rows.iter().map(map_attempt_row).collect()
    }

    async fn load_lockouts(&self, user_id: i64) -> Result<LockoutMap, StorageError> {
        let rows = sqlx::query("SELECT topic, level, locked_until FROM lockouts WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut lockouts = LockoutMap::new();
        for row in rows {
            let topic = Topic::new(row.try_get::<String, _>("topic").map_err(ser)?).map_err(ser)?;
            let level = parse_level(&row.try_get::<String, _>("level").map_err(ser)?)?;
            let until: DateTime<Utc> = row.try_get("locked_until").map_err(ser)?;
            lockouts.record(&topic, level, until);
        }
        Ok(lockouts)
    }

    async fn topic_levels(&self, key: &QuizKey) -> Result<Vec<(Level, Option<QuizId>)>, StorageError> {
        let mut levels = Vec::with_capacity(Level::ALL.len());
        for level in Level::ALL {
            levels.push((level, self.quiz_id_for(&key.with_level(level)).await?));
        }
        Ok(levels)
    }

    async fn resolve_quiz(&self, key: &QuizKey) -> Result<(QuizId, Vec<Question>), StorageError> {
        let quiz_id = self.quiz_id_for(key).await?.ok_or(StorageError::NotFound)?;
        Ok((quiz_id, self.load_questions(quiz_id).await?))
    }

    /// Recorded course result for a topic, if the course was completed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    pub async fn course_result(&self, user: UserId, topic: &Topic) -> Result<Option<u32>, StorageError> {
        let row = sqlx::query("SELECT result FROM course_results WHERE user_id = ?1 AND topic = ?2")
            .bind(user_id_to_i64(user)?)
            .bind(topic.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.map(|r| {
            let result: i64 = r.try_get("result").map_err(ser)?;
            u32::try_from(result).map_err(ser)
        })
        .transpose()
    }
}

#[async_trait::async_trait]
impl AttemptStore for SqliteStore {
    async fn get_user(&self, user: UserId) -> Result<UserRecord, StorageError> {
        let user_id = self.ensure_user(user).await?;
        let attempts = self
            .load_attempts(user_id, None)
            .await?
            .into_iter()
            .map(|record| record.attempt)
            .collect();
        let lockouts = self.load_lockouts(user_id).await?;
        Ok(UserRecord { attempts, lockouts })
    }

    async fn get_questions(&self, user: UserId, key: &QuizKey) -> Result<Vec<Question>, StorageError> {
        let user_id = self.ensure_user(user).await?;
        let (_, questions) = self.resolve_quiz(key).await?;

        let attempts: Vec<QuizAttempt> = self
            .load_attempts(user_id, None)
            .await?
            .into_iter()
            .map(|record| record.attempt)
            .collect();
        let lockouts = self.load_lockouts(user_id).await?;
        let levels = self.topic_levels(key).await?;
        grading::ensure_startable(
            &key.topic,
            key.level,
            &levels,
            &attempts,
            &lockouts,
            &self.policy,
            self.clock.now(),
        )?;
        Ok(questions)
    }

    async fn submit_attempt(
        &self,
        user: UserId,
        key: &QuizKey,
        submission: &SubmissionRequest,
    ) -> Result<SubmissionResult, StorageError> {
        let user_id = self.ensure_user(user).await?;
        let (quiz_id, questions) = self.resolve_quiz(key).await?;
        let now = self.clock.now();
        let attempt = grading::grade(quiz_id, &questions, submission, now)?;

        let mut tx = self.pool.begin().await.map_err(conn)?;
        sqlx::query(
            r"
                INSERT INTO attempts (user_id, quiz_id, score, answer_count, answers, violation, submitted_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(user_id)
        .bind(id_to_i64("quiz_id", quiz_id.value())?)
        .bind(i64::from(attempt.score()))
        .bind(i64::from(attempt.answer_count()))
        .bind(answers_to_text(&submission.answers))
        .bind(i64::from(attempt.is_violation()))
        .bind(attempt.submitted_at())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if submission.lockout {
            let until = now + self.policy.lockout();
            // Keep whichever expiry ends later.
            sqlx::query(
                r"
                    INSERT INTO lockouts (user_id, topic, level, locked_until)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(user_id, topic, level) DO UPDATE SET
                        locked_until = MAX(locked_until, excluded.locked_until)
                ",
            )
            .bind(user_id)
            .bind(key.topic.as_str())
            .bind(key.level.as_str())
            .bind(until)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
            tracing::info!(%user, quiz = %key, %until, "lockout recorded");
        }

        tx.commit().await.map_err(conn)?;
        Ok(SubmissionResult {
            score: attempt.score(),
        })
    }

    async fn get_review(&self, user: UserId, key: &QuizKey) -> Result<ReviewRecord, StorageError> {
        let user_id = self.ensure_user(user).await?;
        let (quiz_id, questions) = self.resolve_quiz(key).await?;
        let history = self.load_attempts(user_id, Some(quiz_id)).await?;
        let borrowed: Vec<&AttemptRecord> = history.iter().collect();
        grading::review(&questions, &borrowed).ok_or(StorageError::NotFound)
    }

    async fn complete_course(&self, user: UserId, topic: &Topic, result: u32) -> Result<(), StorageError> {
        let user_id = self.ensure_user(user).await?;
        sqlx::query(
            r"
                INSERT INTO course_results (user_id, topic, result, completed_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(user_id, topic) DO UPDATE SET
                    result = excluded.result,
                    completed_at = excluded.completed_at
            ",
        )
        .bind(user_id)
        .bind(topic.as_str())
        .bind(i64::from(result.min(100)))
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
