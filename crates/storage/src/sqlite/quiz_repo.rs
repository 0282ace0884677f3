use quiz_core::model::{Question, QuizId, QuizKey, UserId};
use sqlx::Row;

use super::SqliteStore;
use super::mapping::{conn, id_to_i64, map_question_row, options_to_json, quiz_id_from_i64, ser, user_id_to_i64};
use crate::repository::{QuizCatalog, QuizRef, StorageError};

impl SqliteStore {
    /// Insert a quiz and its ordered questions in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a quiz already exists for the key.
    pub async fn insert_quiz(&self, key: &QuizKey, questions: &[Question]) -> Result<QuizId, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let existing = sqlx::query("SELECT id FROM quizzes WHERE language = ?1 AND level = ?2 AND topic = ?3")
            .bind(key.language.as_str())
            .bind(key.level.as_str())
            .bind(key.topic.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if existing.is_some() {
            return Err(StorageError::Conflict);
        }

        let res = sqlx::query("INSERT INTO quizzes (language, level, topic) VALUES (?1, ?2, ?3)")
            .bind(key.language.as_str())
            .bind(key.level.as_str())
            .bind(key.topic.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        let quiz_id = res.last_insert_rowid();

        for (position, question) in questions.iter().enumerate() {
            sqlx::query(
                r"
                    INSERT INTO questions (quiz_id, position, text, options, correct_option)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(quiz_id)
            .bind(i64::try_from(position).map_err(ser)?)
            .bind(question.text())
            .bind(options_to_json(question.options())?)
            .bind(question.correct_option().as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(quiz = %key, quiz_id, questions = questions.len(), "quiz inserted");
        quiz_id_from_i64(quiz_id)
    }

    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the user already exists.
    pub async fn insert_user(&self, user: UserId) -> Result<(), StorageError> {
        let res = sqlx::query("INSERT INTO users (id, created_at) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING")
            .bind(user_id_to_i64(user)?)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(())
    }

    pub(super) async fn quiz_id_for(&self, key: &QuizKey) -> Result<Option<QuizId>, StorageError> {
        let row = sqlx::query("SELECT id FROM quizzes WHERE language = ?1 AND level = ?2 AND topic = ?3")
            .bind(key.language.as_str())
            .bind(key.level.as_str())
            .bind(key.topic.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.map(|r| quiz_id_from_i64(r.try_get::<i64, _>("id").map_err(ser)?))
            .transpose()
    }

    pub(super) async fn load_questions(&self, quiz_id: QuizId) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT text, options, correct_option
                FROM questions
                WHERE quiz_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(id_to_i64("quiz_id", quiz_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;
        rows.iter().map(map_question_row).collect()
    }
}

#[async_trait::async_trait]
impl QuizCatalog for SqliteStore {
    async fn get_quiz(&self, key: &QuizKey) -> Result<QuizRef, StorageError> {
        let row = sqlx::query(
            r"
                SELECT q.id AS id, COUNT(qs.position) AS question_count
                FROM quizzes q
                LEFT JOIN questions qs ON qs.quiz_id = q.id
                WHERE q.language = ?1 AND q.level = ?2 AND q.topic = ?3
                GROUP BY q.id
            ",
        )
        .bind(key.language.as_str())
        .bind(key.level.as_str())
        .bind(key.topic.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let count: i64 = row.try_get("question_count").map_err(ser)?;
        Ok(QuizRef {
            id: quiz_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
            question_count: u32::try_from(count).map_err(ser)?,
        })
    }
}
