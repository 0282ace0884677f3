use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use quiz_core::Clock;
use quiz_core::model::{QuizPolicy, QuizPolicyDraft};
use storage::Storage;
use storage::http::HttpAttemptStore;
use storage::repository::InMemoryStore;

use crate::error::ConfigError;

/// Runtime configuration: the quiz policy plus where attempts are stored.
#[derive(Clone, Debug, Default)]
pub struct QuizConfig {
    pub policy: QuizPolicy,
    /// `sqlite:` URL, `http(s)://` base URL, or `None` for the in-memory store.
    pub store_url: Option<String>,
}

impl QuizConfig {
    /// Read overrides from `QUIZ_*` environment variables on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but unparsable, or if the
    /// resulting policy is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`QuizConfig::from_env`] with an injectable variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unparsable or out-of-range values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut draft = QuizPolicyDraft::default();

        if let Some(ratio) = parse::<f64>(&lookup, "QUIZ_PASS_RATIO")? {
            draft.pass_ratio = ratio;
        }
        if let Some(ratio) = parse::<f64>(&lookup, "QUIZ_ALREADY_PASSED_RATIO")? {
            draft.already_passed_ratio = ratio;
        }
        if let Some(hours) = parse::<i64>(&lookup, "QUIZ_LOCKOUT_HOURS")? {
            draft.lockout = Duration::try_hours(hours).ok_or(ConfigError::InvalidValue {
                var: "QUIZ_LOCKOUT_HOURS",
                value: hours.to_string(),
            })?;
        }
        if let Some(ms) = parse::<u64>(&lookup, "QUIZ_BLUR_DEBOUNCE_MS")? {
            draft.blur_debounce = StdDuration::from_millis(ms);
        }

        let store_url = lookup("QUIZ_STORE_URL")
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty());

        Ok(Self {
            policy: draft.validate()?,
            store_url,
        })
    }

    /// Connect the configured attempt store.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the store URL is unsupported or the connection fails.
    pub async fn connect_storage(&self, clock: Clock) -> Result<Storage, ConfigError> {
        match self.store_url.as_deref() {
            None => {
                tracing::info!("using in-memory attempt store");
                Ok(Storage::in_memory(
                    InMemoryStore::new()
                        .with_clock(clock)
                        .with_policy(self.policy.clone()),
                ))
            }
            Some(url) if url.starts_with("sqlite:") => {
                tracing::info!(url, "using sqlite attempt store");
                Ok(Storage::sqlite(url, clock, self.policy.clone()).await?)
            }
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                tracing::info!(url, "using http attempt store");
                let store = HttpAttemptStore::new(url)?;
                Ok(Storage {
                    attempts: Arc::new(store.clone()),
                    catalog: Arc::new(store),
                })
            }
            Some(url) => Err(ConfigError::InvalidValue {
                var: "QUIZ_STORE_URL",
                value: url.to_owned(),
            }),
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let config = QuizConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.policy, QuizPolicy::default());
        assert!(config.store_url.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = QuizConfig::from_lookup(lookup(&[
            ("QUIZ_PASS_RATIO", "0.7"),
            ("QUIZ_LOCKOUT_HOURS", "2"),
            ("QUIZ_BLUR_DEBOUNCE_MS", "250"),
            ("QUIZ_STORE_URL", " sqlite:quiz.db "),
        ]))
        .unwrap();
        assert!((config.policy.pass_ratio() - 0.7).abs() < f64::EPSILON);
        assert!((config.policy.already_passed_ratio() - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.policy.lockout(), Duration::hours(2));
        assert_eq!(config.policy.blur_debounce(), StdDuration::from_millis(250));
        assert_eq!(config.store_url.as_deref(), Some("sqlite:quiz.db"));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = QuizConfig::from_lookup(lookup(&[("QUIZ_PASS_RATIO", "half")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "QUIZ_PASS_RATIO", .. }));
    }

    #[test]
    fn out_of_range_policy_is_rejected() {
        let err = QuizConfig::from_lookup(lookup(&[("QUIZ_BLUR_DEBOUNCE_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Policy(_)));
    }

    #[tokio::test]
    async fn unknown_store_scheme_is_rejected() {
        let config = QuizConfig {
            store_url: Some("ftp://example.com".into()),
            ..QuizConfig::default()
        };
        assert!(matches!(
            config.connect_storage(Clock::System).await,
            Err(ConfigError::InvalidValue { var: "QUIZ_STORE_URL", .. })
        ));
    }
}
