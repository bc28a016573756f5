//! # Session REST Client
//!
//! Thin client for the two backend endpoints the voice session depends on:
//!
//! - `POST /sessions` creates the session record **before** the duplex
//!   channel opens and returns the id carried in the channel URI.
//! - `POST /sessions/{id}/end` is strictly best-effort: a failure is logged
//!   and must never block local teardown.
//!
//! Everything else the backend offers (analytics, history, user CRUD) is out
//! of scope for this crate.

use crate::config::ApiConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parameters for creating a session record.
#[derive(Debug, Clone, Serialize)]
pub struct SessionParams {
    /// Conversation scenario identifier (e.g. "restaurant_ordering")
    pub scenario: String,

    /// Scenario category/grouping (e.g. "daily_life")
    pub category: String,
}

/// A session record as returned by the backend.
///
/// Immutable once created except for the end timestamp; owned exclusively by
/// the session controller and dropped when the user ends or abandons the
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session
    #[serde(default = "fallback_session_id")]
    pub id: String,

    /// Conversation scenario identifier
    pub scenario: String,

    /// Scenario category/grouping
    pub category: String,

    /// When the record was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the duplex channel first opened (if it has)
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the session ended (if it has)
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

fn fallback_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// HTTP client for the session endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl ApiClient {
    /// Build a client from the API config section.
    pub fn new(config: &ApiConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("voice-session-client/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Http(format!("Failed to initialize HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    /// Create a session record on the backend.
    ///
    /// This happens before the channel opens; the returned id is embedded in
    /// the channel URI.
    pub async fn create_session(&self, params: &SessionParams) -> AppResult<Session> {
        let url = format!("{}/sessions", self.base_url);
        debug!("Creating session: scenario={}", params.scenario);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Http(format!(
                "Session create failed with status {}",
                response.status()
            )));
        }

        let session: Session = response.json().await?;
        info!("Session {} created (scenario: {})", session.id, session.scenario);
        Ok(session)
    }

    /// Notify the backend that the session ended. Best-effort.
    ///
    /// A network failure here is logged and swallowed: teardown has already
    /// happened locally and must not be blocked or re-surfaced.
    pub async fn end_session(&self, session_id: &str) {
        let url = format!("{}/sessions/{}/end", self.base_url, session_id);

        match self.http.post(&url).bearer_auth(&self.auth_token).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Session {} end acknowledged", session_id);
            }
            Ok(response) => {
                warn!(
                    "Session {} end notification rejected: {}",
                    session_id,
                    response.status()
                );
            }
            Err(err) => {
                warn!("Session {} end notification failed: {}", session_id, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_deserializes_minimal_payload() {
        // Backends in the field omit timestamps; defaults must fill in.
        let json = r#"{"id": "abc-123", "scenario": "restaurant", "category": "daily_life"}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.id, "abc-123");
        assert!(session.started_at.is_none());
        assert!(session.ended_at.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ApiConfig {
            base_url: "http://localhost:8080/".to_string(),
            auth_token: "t".to_string(),
            request_timeout_secs: 5,
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }
}
