//! Application-level configuration loading: host secret, prize and ranking
//! policy, token verifier selection and optional seed data.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::{
    dao::models::{Participant, Question},
    services::retry::RetryPolicy,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_LIVE_BACK_CONFIG_PATH";
/// Environment variable that overrides the configured host token.
const HOST_TOKEN_ENV: &str = "HOST_TOKEN";

const DEFAULT_BASE_PRIZE: u64 = 10_000;
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_VERIFIER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    host_token: Option<String>,
    base_prize: u64,
    auth_timeout: Duration,
    ranking_retry: RetryPolicy,
    verifier: VerifierConfig,
    seed: SeedData,
}

/// How audience tokens are verified.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifierConfig {
    /// Fixed token to subject id table.
    Static { tokens: HashMap<String, String> },
    /// Remote verification endpoint.
    Http { url: String, timeout: Duration },
}

/// Questions and participants loaded into the store at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SeedData {
    /// Questions saved before the first host action.
    pub questions: Vec<Question>,
    /// Participants registered with their initial status.
    pub participants: Vec<Participant>,
}

impl SeedData {
    /// Whether there is nothing to seed.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty() && self.participants.is_empty()
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        questions = config.seed.questions.len(),
                        participants = config.seed.participants.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_host_token(env::var(HOST_TOKEN_ENV).ok())
    }

    /// Parse a JSON configuration document.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Replace the host token when `token` is a non-empty value.
    pub fn with_host_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|token| !token.trim().is_empty()) {
            self.host_token = Some(token);
        }
        self
    }

    /// Replace the verifier configuration.
    pub fn with_verifier(mut self, verifier: VerifierConfig) -> Self {
        self.verifier = verifier;
        self
    }

    /// Replace the auth handshake timeout.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Replace the ranking retry policy.
    pub fn with_ranking_retry(mut self, policy: RetryPolicy) -> Self {
        self.ranking_retry = policy;
        self
    }

    /// Shared secret expected in the `X-Host-Token` header, if host actions are enabled.
    pub fn host_token(&self) -> Option<&str> {
        self.host_token.as_deref()
    }

    /// Prize added to the carryover when nobody answers correctly.
    pub fn base_prize(&self) -> u64 {
        self.base_prize
    }

    /// Time a new connection has to authenticate.
    pub fn auth_timeout(&self) -> Duration {
        self.auth_timeout
    }

    /// Retry policy of the ranking computation and state transactions.
    pub fn ranking_retry(&self) -> &RetryPolicy {
        &self.ranking_retry
    }

    /// Audience token verification backend.
    pub fn verifier(&self) -> &VerifierConfig {
        &self.verifier
    }

    /// Data loaded into the store at startup.
    pub fn seed(&self) -> &SeedData {
        &self.seed
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host_token: None,
            base_prize: DEFAULT_BASE_PRIZE,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            ranking_retry: RetryPolicy::default(),
            verifier: VerifierConfig::Static {
                tokens: HashMap::new(),
            },
            seed: SeedData::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    host_token: Option<String>,
    base_prize: u64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "auth_timeout_ms")]
    auth_timeout: Duration,
    ranking_retry: RawRetry,
    verifier: RawVerifier,
    seed: SeedData,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            host_token: None,
            base_prize: DEFAULT_BASE_PRIZE,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            ranking_retry: RawRetry::default(),
            verifier: RawVerifier::default(),
            seed: SeedData::default(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            host_token: value.host_token.filter(|token| !token.trim().is_empty()),
            base_prize: value.base_prize,
            auth_timeout: value.auth_timeout,
            ranking_retry: value.ranking_retry.into(),
            verifier: value.verifier.into(),
            seed: value.seed,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the retry policy.
struct RawRetry {
    max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms")]
    base_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_delay_ms")]
    max_delay: Duration,
    backoff_factor: f64,
}

impl Default for RawRetry {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            backoff_factor: policy.backoff_factor,
        }
    }
}

impl From<RawRetry> for RetryPolicy {
    fn from(value: RawRetry) -> Self {
        Self {
            max_attempts: value.max_attempts.max(1),
            base_delay: value.base_delay,
            max_delay: value.max_delay.max(value.base_delay),
            backoff_factor: if value.backoff_factor.is_finite() && value.backoff_factor >= 1.0 {
                value.backoff_factor
            } else {
                1.0
            },
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
/// JSON representation of the verifier selection.
enum RawVerifier {
    Static {
        #[serde(default)]
        tokens: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "timeout_ms", default = "default_verifier_timeout")]
        timeout: Duration,
    },
}

impl Default for RawVerifier {
    fn default() -> Self {
        RawVerifier::Static {
            tokens: HashMap::new(),
        }
    }
}

fn default_verifier_timeout() -> Duration {
    DEFAULT_VERIFIER_TIMEOUT
}

impl From<RawVerifier> for VerifierConfig {
    fn from(value: RawVerifier) -> Self {
        match value {
            RawVerifier::Static { tokens } => VerifierConfig::Static { tokens },
            RawVerifier::Http { url, timeout } => VerifierConfig::Http { url, timeout },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.base_prize(), DEFAULT_BASE_PRIZE);
        assert_eq!(config.auth_timeout(), Duration::from_secs(10));
        assert_eq!(config.ranking_retry(), &RetryPolicy::default());
        assert_eq!(config.host_token(), None);
        assert!(matches!(config.verifier(), VerifierConfig::Static { tokens } if tokens.is_empty()));
        assert!(config.seed().is_empty());
    }

    #[test]
    fn full_document_is_parsed() {
        let json = r#"{
            "host_token": "s3cret",
            "base_prize": 2500,
            "auth_timeout_ms": 1500,
            "ranking_retry": {"max_attempts": 5, "base_delay_ms": 200, "max_delay_ms": 800, "backoff_factor": 3.0},
            "verifier": {"type": "http", "url": "http://auth.local/verify", "timeout_ms": 750},
            "seed": {
                "questions": [{
                    "id": "q1", "period": "first", "number": 1, "text": "2+2?",
                    "choices": ["3", "4"], "correctChoice": "4", "deadlineMs": 0
                }],
                "participants": [{"id": "p1", "displayName": "Ada", "status": "ACTIVE"}]
            }
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.host_token(), Some("s3cret"));
        assert_eq!(config.base_prize(), 2500);
        assert_eq!(config.auth_timeout(), Duration::from_millis(1500));
        assert_eq!(config.ranking_retry().max_attempts, 5);
        assert_eq!(config.ranking_retry().max_delay, Duration::from_millis(800));
        assert_eq!(
            config.verifier(),
            &VerifierConfig::Http {
                url: "http://auth.local/verify".into(),
                timeout: Duration::from_millis(750),
            }
        );
        assert_eq!(config.seed().questions[0].correct_choice, "4");
        assert_eq!(config.seed().participants[0].display_name, "Ada");
    }

    #[test]
    fn blank_env_token_does_not_override() {
        let config = AppConfig::default()
            .with_host_token(Some("file".into()))
            .with_host_token(Some("  ".into()));
        assert_eq!(config.host_token(), Some("file"));
    }

    #[test]
    fn static_verifier_tokens_are_loaded() {
        let json = r#"{"verifier": {"type": "static", "tokens": {"tok-1": "p1"}}}"#;
        let config = AppConfig::from_json(json).unwrap();
        let VerifierConfig::Static { tokens } = config.verifier() else {
            panic!("expected static verifier");
        };
        assert_eq!(tokens.get("tok-1").map(String::as_str), Some("p1"));
    }
}
