use quiz_core::model::{
    Level, OptionTag, Question, QuestionDraft, QuizAttempt, QuizId, QuizOption, UserId,
};
use sqlx::Row;

use crate::repository::{AttemptRecord, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn user_id_to_i64(user: UserId) -> Result<i64, StorageError> {
    id_to_i64("user_id", user.value())
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

pub(crate) fn parse_level(s: &str) -> Result<Level, StorageError> {
    s.parse::<Level>().map_err(ser)
}

/// Answers are stored as a compact tag string, one letter per question.
pub(crate) fn answers_to_text(answers: &[OptionTag]) -> String {
    answers.iter().map(|tag| tag.as_str()).collect()
}

pub(crate) fn answers_from_text(text: &str) -> Result<Vec<OptionTag>, StorageError> {
    text.chars()
        .map(|c| c.to_string().parse::<OptionTag>().map_err(ser))
        .collect()
}

pub(crate) fn options_to_json(options: &[QuizOption]) -> Result<String, StorageError> {
    serde_json::to_string(options).map_err(ser)
}

pub(crate) fn map_question_row(row: &sqlx::sqlite::SqliteRow) -> Result<Question, StorageError> {
    let options_json: String = row.try_get("options").map_err(ser)?;
    let options: Vec<QuizOption> = serde_json::from_str(&options_json).map_err(ser)?;
    let correct: String = row.try_get("correct_option").map_err(ser)?;
    QuestionDraft {
        text: row.try_get("text").map_err(ser)?,
        options,
        correct_option: correct.parse().map_err(ser)?,
    }
    .validate()
    .map_err(ser)
}

pub(crate) fn map_attempt_row(row: &sqlx::sqlite::SqliteRow) -> Result<AttemptRecord, StorageError> {
    let answers_text: String = row.try_get("answers").map_err(ser)?;
    let quiz_id = quiz_id_from_i64(row.try_get::<i64, _>("quiz_id").map_err(ser)?)?;
    let score = u32_from_i64("score", row.try_get::<i64, _>("score").map_err(ser)?)?;
    let answer_count = u32_from_i64("answer_count", row.try_get::<i64, _>("answer_count").map_err(ser)?)?;
    let submitted_at = row.try_get("submitted_at").map_err(ser)?;
    let violation = row.try_get::<i64, _>("violation").map_err(ser)? != 0;
    let attempt = if answer_count == 0 {
        QuizAttempt::unrecorded(quiz_id, score, submitted_at, violation)
    } else {
        QuizAttempt::new(quiz_id, score, answer_count, submitted_at, violation)
    }
    .map_err(ser)?;
    Ok(AttemptRecord {
        attempt,
        answers: answers_from_text(&answers_text)?,
    })
}
