//! Audience token verification.

use std::{collections::HashMap, sync::Arc};

use futures::{
    FutureExt,
    future::{BoxFuture, ready},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::VerifierConfig;

/// Identity extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedToken {
    /// Participant id the token was issued to.
    pub subject_id: String,
    /// Remaining claims, kept opaque.
    #[serde(default)]
    pub claims: Map<String, Value>,
}

/// Reasons a token is refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token, or a blank one, was presented.
    #[error("missing token")]
    MissingToken,
    /// The token is unknown, expired or revoked.
    #[error("invalid or expired token")]
    InvalidToken,
    /// The verifier itself could not answer.
    #[error("token verification unavailable: {0}")]
    Unavailable(String),
}

/// External `verify(token) -> subject` contract.
pub trait TokenVerifier: Send + Sync {
    /// Resolve `token` to the participant it was issued to.
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<VerifiedToken, AuthError>>;
}

/// Verifier backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: Arc<HashMap<String, String>>,
}

impl StaticTokenVerifier {
    /// Verifier accepting the `token -> subject id` pairs of `tokens`.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: Arc::new(tokens),
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<VerifiedToken, AuthError>> {
        let result = if token.trim().is_empty() {
            Err(AuthError::MissingToken)
        } else {
            self.tokens
                .get(token)
                .map(|subject_id| VerifiedToken {
                    subject_id: subject_id.clone(),
                    claims: Map::new(),
                })
                .ok_or(AuthError::InvalidToken)
        };
        ready(result).boxed()
    }
}

#[cfg(feature = "http-verifier")]
mod http {
    use std::time::Duration;

    use futures::{FutureExt, future::BoxFuture};
    use reqwest::{Client, StatusCode};
    use serde_json::json;
    use tracing::warn;

    use super::{AuthError, TokenVerifier, VerifiedToken};

    /// Verifier delegating to a remote endpoint.
    ///
    /// The token is POSTed as `{"token": ...}`. A 2xx answer carries
    /// `{"subjectId": ..., "claims": {...}}`, 401/403 mean the token is
    /// refused, anything else means the verifier is unavailable.
    #[derive(Debug, Clone)]
    pub struct HttpTokenVerifier {
        client: Client,
        url: String,
    }

    impl HttpTokenVerifier {
        /// Verifier posting tokens to `url`, giving up after `timeout`.
        pub fn new(url: String, timeout: Duration) -> Result<Self, AuthError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| AuthError::Unavailable(err.to_string()))?;
            Ok(Self { client, url })
        }
    }

    impl TokenVerifier for HttpTokenVerifier {
        fn verify(&self, token: &str) -> BoxFuture<'static, Result<VerifiedToken, AuthError>> {
            let client = self.client.clone();
            let url = self.url.clone();
            let token = token.to_owned();
            async move {
                if token.trim().is_empty() {
                    return Err(AuthError::MissingToken);
                }
                let response = client
                    .post(&url)
                    .json(&json!({ "token": token }))
                    .send()
                    .await
                    .map_err(|err| {
                        warn!(url = %url, error = %err, "token verifier request failed");
                        AuthError::Unavailable(err.to_string())
                    })?;

                match response.status() {
                    status if status.is_success() => response
                        .json::<VerifiedToken>()
                        .await
                        .map_err(|err| AuthError::Unavailable(format!("malformed verifier response: {err}"))),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidToken),
                    status => Err(AuthError::Unavailable(format!(
                        "verifier answered with status {status}"
                    ))),
                }
            }
            .boxed()
        }
    }
}

#[cfg(feature = "http-verifier")]
pub use http::HttpTokenVerifier;

/// Instantiate the verifier selected by the configuration.
pub fn build_verifier(config: &VerifierConfig) -> Result<Arc<dyn TokenVerifier>, AuthError> {
    match config {
        VerifierConfig::Static { tokens } => Ok(Arc::new(StaticTokenVerifier::new(tokens.clone()))),
        #[cfg(feature = "http-verifier")]
        VerifierConfig::Http { url, timeout } => {
            Ok(Arc::new(HttpTokenVerifier::new(url.clone(), *timeout)?))
        }
        #[cfg(not(feature = "http-verifier"))]
        VerifierConfig::Http { .. } => Err(AuthError::Unavailable(
            "http verifier support was not compiled in".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(HashMap::from([("tok-ada".to_string(), "p-ada".to_string())]))
    }

    #[tokio::test]
    async fn known_token_yields_subject() {
        let verified = verifier().verify("tok-ada").await.unwrap();
        assert_eq!(verified.subject_id, "p-ada");
    }

    #[tokio::test]
    async fn unknown_and_blank_tokens_are_refused() {
        assert!(matches!(
            verifier().verify("nope").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            verifier().verify("  ").await,
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn verifier_response_parses_without_claims() {
        let parsed: VerifiedToken = serde_json::from_str(r#"{"subjectId":"p1"}"#).unwrap();
        assert_eq!(parsed.subject_id, "p1");
        assert!(parsed.claims.is_empty());
    }
}
