use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Applies versioned schema migrations tracked in `schema_migrations`.
///
/// Version 1 creates quizzes, questions, users, attempts, lockouts and course results.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quizzes (
                    id INTEGER PRIMARY KEY,
                    language TEXT NOT NULL,
                    level TEXT NOT NULL CHECK (level IN ('beginner', 'intermediate', 'advanced')),
                    topic TEXT NOT NULL,
                    UNIQUE (language, level, topic)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS questions (
                    quiz_id INTEGER NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    text TEXT NOT NULL,
                    options TEXT NOT NULL,
                    correct_option TEXT NOT NULL,
                    PRIMARY KEY (quiz_id, position),
                    FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY,
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempts (
                    id INTEGER PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    quiz_id INTEGER NOT NULL,
                    score INTEGER NOT NULL CHECK (score >= 0),
                    answer_count INTEGER NOT NULL CHECK (answer_count >= score),
                    answers TEXT NOT NULL,
                    violation INTEGER NOT NULL CHECK (violation IN (0, 1)),
                    submitted_at TEXT NOT NULL,
                    CHECK (violation = 0 OR score = 0),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                    FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS lockouts (
                    user_id INTEGER NOT NULL,
                    topic TEXT NOT NULL,
                    level TEXT NOT NULL,
                    locked_until TEXT NOT NULL,
                    PRIMARY KEY (user_id, topic, level),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS course_results (
                    user_id INTEGER NOT NULL,
                    topic TEXT NOT NULL,
                    result INTEGER NOT NULL CHECK (result BETWEEN 0 AND 100),
                    completed_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, topic),
                    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempts_user_quiz_submitted
                    ON attempts (user_id, quiz_id, submitted_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
