use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::Level;

/// Topic name of the diagnostic onboarding track.
pub const BASIC_TOPIC: &str = "basic";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackError {
    #[error("topic cannot be empty")]
    EmptyTopic,

    #[error("language cannot be empty")]
    EmptyLanguage,
}

/// Which progression policy a topic follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Diagnostic track: any attempt completes a level, never locked.
    Basic,
    /// Topic/course track: pass threshold, lockouts, strict sequence.
    Topic,
}

/// A content area within a language track. Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// # Errors
    ///
    /// Returns `TrackError::EmptyTopic` if the name is blank.
    pub fn new(name: impl AsRef<str>) -> Result<Self, TrackError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(TrackError::EmptyTopic);
        }
        Ok(Self(name.to_lowercase()))
    }

    #[must_use]
    pub fn basic() -> Self {
        Self(BASIC_TOPIC.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_basic(&self) -> bool {
        self.0 == BASIC_TOPIC
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        if self.is_basic() {
            TrackKind::Basic
        } else {
            TrackKind::Topic
        }
    }

    /// Course display name: first letter upper-cased, rest lower-cased.
    #[must_use]
    pub fn course_name(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = TrackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        value.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Programming language a quiz belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// # Errors
    ///
    /// Returns `TrackError::EmptyLanguage` if the name is blank.
    pub fn new(name: impl AsRef<str>) -> Result<Self, TrackError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(TrackError::EmptyLanguage);
        }
        Ok(Self(name.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Language {
    type Error = TrackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addresses one quiz: language + level + topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuizKey {
    pub language: Language,
    pub level: Level,
    pub topic: Topic,
}

impl QuizKey {
    #[must_use]
    pub fn new(language: Language, level: Level, topic: Topic) -> Self {
        Self {
            language,
            level,
            topic,
        }
    }

    /// Same language and topic, different level.
    #[must_use]
    pub fn with_level(&self, level: Level) -> Self {
        Self {
            language: self.language.clone(),
            level,
            topic: self.topic.clone(),
        }
    }
}

impl fmt::Display for QuizKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.language, self.level, self.topic)
    }
}
