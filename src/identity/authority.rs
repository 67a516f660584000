//! External session authority: the system that issued the `session` cookie and is the
//! only source of truth for whether it is still valid.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::principal::UserIdentity;

/// Outcome of a well-formed authority answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(UserIdentity),
    Invalid,
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority unreachable: {0}")]
    Transport(String),
    #[error("authority answered with status {0}")]
    Status(u16),
    #[error("malformed authority response: {0}")]
    Malformed(String),
    #[error("authority did not answer within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SessionAuthority: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Validation, AuthorityError>;
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    session_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    user: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Map the authority's JSON body to a `Validation`.
///
/// `{"valid": true, "user": {..., "role": ...}}` is valid, `{"valid": false, ...}` is invalid,
/// anything else is malformed.
pub fn parse_validate_response(body: &[u8]) -> Result<Validation, AuthorityError> {
    let resp: ValidateResponse = serde_json::from_slice(body)
        .map_err(|e| AuthorityError::Malformed(e.to_string()))?;
    if !resp.valid {
        if let Some(err) = resp.error.as_deref() {
            tracing::debug!(target: "gatekeeper", "authority rejected session: {}", err);
        }
        return Ok(Validation::Invalid);
    }
    let Some(user) = resp.user else {
        return Err(AuthorityError::Malformed("valid response without user".into()));
    };
    let identity: UserIdentity = serde_json::from_value(user)
        .map_err(|e| AuthorityError::Malformed(format!("user: {}", e)))?;
    Ok(Validation::Valid(identity))
}

/// Authority reached over HTTP: POST `{"session_token": ...}` to the validation endpoint.
pub struct HttpSessionAuthority {
    client: reqwest::Client,
    url: String,
}

impl HttpSessionAuthority {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|e| anyhow::anyhow!("invalid authority url '{}': {}", url, e))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("building authority client: {}", e))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str { &self.url }
}

#[async_trait]
impl SessionAuthority for HttpSessionAuthority {
    async fn validate(&self, token: &str) -> Result<Validation, AuthorityError> {
        let resp = self.client
            .post(&self.url)
            .json(&ValidateRequest { session_token: token })
            .send()
            .await
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthorityError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(|e| AuthorityError::Transport(e.to_string()))?;
        parse_validate_response(&body)
    }
}

/// Used when no authority is configured. Every token is invalid.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAllAuthority;

#[async_trait]
impl SessionAuthority for DenyAllAuthority {
    async fn validate(&self, _token: &str) -> Result<Validation, AuthorityError> {
        Ok(Validation::Invalid)
    }
}

/// In-memory token table.
#[derive(Debug, Default)]
pub struct StaticAuthority {
    tokens: RwLock<HashMap<String, UserIdentity>>,
}

impl StaticAuthority {
    pub fn new() -> Self { Self::default() }

    pub fn with_token(self, token: impl Into<String>, identity: UserIdentity) -> Self {
        self.insert(token, identity);
        self
    }

    pub fn insert(&self, token: impl Into<String>, identity: UserIdentity) {
        self.tokens.write().insert(token.into(), identity);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }
}

#[async_trait]
impl SessionAuthority for StaticAuthority {
    async fn validate(&self, token: &str) -> Result<Validation, AuthorityError> {
        Ok(match self.tokens.read().get(token) {
            Some(id) => Validation::Valid(id.clone()),
            None => Validation::Invalid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_response() {
        let body = br#"{"valid": true, "user": {"username": "natalya", "role": "admin"}}"#;
        match parse_validate_response(body).unwrap() {
            Validation::Valid(id) => {
                assert_eq!(id.role, "admin");
                assert_eq!(id.username.as_deref(), Some("natalya"));
            }
            other => panic!("expected valid, got {:?}", other),
        }
    }

    #[test]
    fn parses_invalid_response() {
        let body = br#"{"valid": false, "error": "SSO not yet implemented"}"#;
        assert_eq!(parse_validate_response(body).unwrap(), Validation::Invalid);
        assert_eq!(parse_validate_response(br#"{"valid": false}"#).unwrap(), Validation::Invalid);
    }

    #[test]
    fn malformed_bodies_are_errors() {
        for body in [
            &b"not json"[..],
            br#"{"user": {"role": "admin"}}"#,
            br#"{"valid": "yes"}"#,
            br#"{"valid": true}"#,
            br#"{"valid": true, "user": {"username": "x"}}"#,
            br#"{"valid": true, "user": "admin"}"#,
        ] {
            let r = parse_validate_response(body);
            assert!(matches!(r, Err(AuthorityError::Malformed(_))), "body {:?} gave {:?}", String::from_utf8_lossy(body), r);
        }
    }

    #[tokio::test]
    async fn static_authority_lookup_and_revoke() {
        let auth = StaticAuthority::new().with_token("t1", UserIdentity::new("a", "admin"));
        assert!(matches!(auth.validate("t1").await.unwrap(), Validation::Valid(_)));
        assert_eq!(auth.validate("t2").await.unwrap(), Validation::Invalid);
        assert!(auth.revoke("t1"));
        assert_eq!(auth.validate("t1").await.unwrap(), Validation::Invalid);
    }

    #[tokio::test]
    async fn deny_all_rejects() {
        assert_eq!(DenyAllAuthority.validate("anything").await.unwrap(), Validation::Invalid);
    }

    #[tokio::test]
    async fn unreachable_http_authority_is_transport_error() {
        // Port 9 on loopback: nothing listens there in test environments.
        let auth = HttpSessionAuthority::new("http://127.0.0.1:9/api/validate_session", Duration::from_millis(500)).unwrap();
        let r = auth.validate("tok").await;
        assert!(matches!(r, Err(AuthorityError::Transport(_))), "got {:?}", r);
    }
}
