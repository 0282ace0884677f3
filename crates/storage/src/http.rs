//! REST adapter for a quiz backend exposing the user and quiz routes over JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    Level, LockoutMap, OptionTag, Question, QuestionDraft, QuizAttempt, QuizId, QuizKey,
    QuizOption, Topic, UserId,
};
use quiz_core::time::from_epoch_millis;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::repository::{
    AttemptStore, QuizCatalog, QuizRef, ReviewRecord, ReviewStatistics, StorageError,
    SubmissionRequest, SubmissionResult, UserRecord,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpStoreError {
    #[error("invalid store url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("store url cannot be a base: {0}")]
    NotABase(String),
}

/// `AttemptStore` and `QuizCatalog` over HTTP.
#[derive(Clone, Debug)]
pub struct HttpAttemptStore {
    client: Client,
    base: Url,
}

impl HttpAttemptStore {
    /// # Errors
    ///
    /// Returns `HttpStoreError` if `base_url` does not parse as an absolute base URL.
    pub fn new(base_url: &str) -> Result<Self, HttpStoreError> {
        Self::with_client(Client::new(), base_url)
    }

    /// # Errors
    ///
    /// Returns `HttpStoreError` if `base_url` does not parse as an absolute base URL.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, HttpStoreError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(HttpStoreError::NotABase(base_url.to_owned()));
        }
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| StorageError::Connection(format!("cannot extend {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn user_url(&self, user: UserId) -> Result<Url, StorageError> {
        self.url(&["api", "users", &user.to_string()])
    }

    fn quiz_url(&self, user: UserId, key: &QuizKey, action: &str) -> Result<Url, StorageError> {
        self.url(&[
            "api",
            "users",
            &user.to_string(),
            key.language.as_str(),
            key.level.as_str(),
            key.topic.as_str(),
            action,
        ])
    }
}

fn transport(e: reqwest::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn decode(e: reqwest::Error) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps non-success responses onto storage errors, keeping lock details.
async fn check(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(StorageError::NotFound),
        StatusCode::CONFLICT => Err(StorageError::Conflict),
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN => {
            let body: RefusalDto = response.json().await.unwrap_or_default();
            Err(StorageError::NotAvailable {
                reason: body.message.unwrap_or_else(|| status.to_string()),
                locked_until: body.unlock_time.and_then(from_epoch_millis),
            })
        }
        other => Err(StorageError::Connection(format!("store responded with {other}"))),
    }
}

#[async_trait]
impl AttemptStore for HttpAttemptStore {
    async fn get_user(&self, user: UserId) -> Result<UserRecord, StorageError> {
        let response = self
            .client
            .get(self.user_url(user)?)
            .send()
            .await
            .map_err(transport)?;
        let body: UserDto = check(response).await?.json().await.map_err(decode)?;
        body.try_into()
    }

    async fn get_questions(&self, user: UserId, key: &QuizKey) -> Result<Vec<Question>, StorageError> {
        let response = self
            .client
            .get(self.quiz_url(user, key, "questions")?)
            .send()
            .await
            .map_err(transport)?;
        let body: QuestionsDto = check(response).await?.json().await.map_err(decode)?;
        body.questions.into_iter().map(Question::try_from).collect()
    }

    async fn submit_attempt(
        &self,
        user: UserId,
        key: &QuizKey,
        submission: &SubmissionRequest,
    ) -> Result<SubmissionResult, StorageError> {
        let payload = SubmitDto {
            answers: &submission.answers,
            violation: submission.violation,
            force_zero_score: submission.force_zero_score,
            lockout: submission.lockout,
        };
        let response = self
            .client
            .post(self.quiz_url(user, key, "submit")?)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        let body: ScoreDto = check(response).await?.json().await.map_err(decode)?;
        Ok(SubmissionResult {
            score: body.score.or(body.results.map(|r| r.score)).unwrap_or(0),
        })
    }

    async fn get_review(&self, user: UserId, key: &QuizKey) -> Result<ReviewRecord, StorageError> {
        let response = self
            .client
            .get(self.quiz_url(user, key, "review")?)
            .send()
            .await
            .map_err(transport)?;
        let body: ReviewDto = check(response).await?.json().await.map_err(decode)?;
        Ok(ReviewRecord {
            per_question_correct: body.per_question_correct,
            statistics: ReviewStatistics {
                best_score: body.statistics.best_score,
                best_percentage: body.statistics.best_percentage,
                attempts: body.statistics.attempts,
            },
        })
    }

    async fn complete_course(&self, user: UserId, topic: &Topic, result: u32) -> Result<(), StorageError> {
        let url = self.url(&["api", "users", &user.to_string(), "courses", &topic.course_name(), "complete"])?;
        let response = self
            .client
            .put(url)
            .json(&CompleteDto { result })
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl QuizCatalog for HttpAttemptStore {
    async fn get_quiz(&self, key: &QuizKey) -> Result<QuizRef, StorageError> {
        let url = self.url(&[
            "api",
            "quizzes",
            "lang",
            key.language.as_str(),
            "level",
            key.level.as_str(),
            "topic",
            key.topic.as_str(),
        ])?;
        let response = self.client.get(url).send().await.map_err(transport)?;
        let body: QuizDto = check(response).await?.json().await.map_err(decode)?;
        Ok(QuizRef {
            id: body.id,
            question_count: body.question_count,
        })
    }
}

//
// ─── WIRE SHAPES ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefusalDto {
    message: Option<String>,
    unlock_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    #[serde(default)]
    quizzes: Vec<AttemptDto>,
    /// topic -> level -> expiry in epoch milliseconds
    #[serde(default)]
    course_quiz_lockouts: BTreeMap<String, BTreeMap<String, i64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttemptDto {
    quiz_id: QuizId,
    user_score: u32,
    #[serde(default)]
    user_answers: Vec<OptionTag>,
    submitted_at: DateTime<Utc>,
    #[serde(default)]
    violation: bool,
}

impl TryFrom<UserDto> for UserRecord {
    type Error = StorageError;

    fn try_from(dto: UserDto) -> Result<Self, Self::Error> {
        let attempts = dto
            .quizzes
            .into_iter()
            .map(|a| {
                let attempt = if a.user_answers.is_empty() {
                    QuizAttempt::unrecorded(a.quiz_id, a.user_score, a.submitted_at, a.violation)
                } else {
                    let answer_count = u32::try_from(a.user_answers.len()).unwrap_or(u32::MAX);
                    QuizAttempt::new(a.quiz_id, a.user_score, answer_count, a.submitted_at, a.violation)
                };
                attempt.map_err(|e| StorageError::from(quiz_core::Error::from(e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut lockouts = LockoutMap::new();
        for (topic, levels) in dto.course_quiz_lockouts {
            let topic = Topic::new(&topic).map_err(|e| StorageError::from(quiz_core::Error::from(e)))?;
            for (level, millis) in levels {
                let level: Level = level
                    .parse()
                    .map_err(|e| StorageError::from(quiz_core::Error::from(e)))?;
                let until = from_epoch_millis(millis)
                    .ok_or_else(|| StorageError::Serialization(format!("invalid lockout time {millis}")))?;
                lockouts.record(&topic, level, until);
            }
        }
        Ok(UserRecord { attempts, lockouts })
    }
}

#[derive(Debug, Deserialize)]
struct QuestionsDto {
    questions: Vec<QuestionDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionDto {
    question_text: String,
    options: Vec<OptionDto>,
    correct_option: OptionTag,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionDto {
    option_text: String,
    option_tag: OptionTag,
}

impl TryFrom<QuestionDto> for Question {
    type Error = StorageError;

    fn try_from(dto: QuestionDto) -> Result<Self, Self::Error> {
        QuestionDraft {
            text: dto.question_text,
            options: dto
                .options
                .into_iter()
                .map(|o| QuizOption {
                    text: o.option_text,
                    tag: o.option_tag,
                })
                .collect(),
            correct_option: dto.correct_option,
        }
        .validate()
        .map_err(|e| StorageError::from(quiz_core::Error::from(e)))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitDto<'a> {
    answers: &'a [OptionTag],
    violation: bool,
    force_zero_score: bool,
    lockout: bool,
}

#[derive(Debug, Deserialize)]
struct ScoreDto {
    score: Option<u32>,
    results: Option<ScoreResultsDto>,
}

#[derive(Debug, Deserialize)]
struct ScoreResultsDto {
    score: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewDto {
    per_question_correct: Vec<bool>,
    statistics: StatisticsDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsDto {
    best_score: u32,
    best_percentage: u32,
    #[serde(default)]
    attempts: u32,
}

#[derive(Debug, Serialize)]
struct CompleteDto {
    result: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuizDto {
    id: QuizId,
    question_count: u32,
}
