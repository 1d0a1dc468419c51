//! REST response envelope and the client-side API error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope wrapped around every `/api/*` response body.
///
/// Success bodies put the payload under `data`; failures carry a human-readable
/// `message` and, for validation failures, a list of `errors`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            message: None,
            errors: Vec::new(),
        }
    }
}

/// Attempt to pull a user-facing message out of an error body.
/// Prefers `message`, falls back to the first entry of `errors`.
pub fn try_server_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ApiResponse<serde_json::Value>>(body).ok()?;
    if let Some(message) = parsed.message {
        if !message.trim().is_empty() {
            return Some(message);
        }
    }
    parsed.errors.into_iter().find(|e| !e.trim().is_empty())
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    /// No credential pair is stored; a new login is required.
    #[error("Not authenticated")]
    NotAuthenticated,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Server-provided message for business and validation failures
    /// ("user not found", "already friends", ...).
    pub fn server_message(&self) -> Option<String> {
        match self {
            ApiError::Http { body, .. } => try_server_message(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_prefers_message_field() {
        let err = ApiError::Http {
            status: 400,
            body: r#"{"message":"Already friends","errors":["ignored"]}"#.to_string(),
        };
        assert_eq!(err.server_message().as_deref(), Some("Already friends"));
    }

    #[test]
    fn server_message_falls_back_to_errors() {
        let body = r#"{"data":null,"errors":["", "Email is already taken"]}"#;
        assert_eq!(
            try_server_message(body).as_deref(),
            Some("Email is already taken")
        );
    }

    #[test]
    fn server_message_is_none_for_non_envelope_bodies() {
        assert_eq!(try_server_message("<html>bad gateway</html>"), None);
        assert_eq!(ApiError::Network("reset".into()).server_message(), None);
    }

    #[test]
    fn envelope_without_data_decodes() {
        let parsed: ApiResponse<String> =
            serde_json::from_str(r#"{"message":"Logged out"}"#).unwrap();
        assert_eq!(parsed.data, None);
        assert_eq!(parsed.message.as_deref(), Some("Logged out"));
    }

    #[test]
    fn envelope_decodes_payloads_without_default() {
        use crate::models::{LoginData, TokenPair};

        let parsed: ApiResponse<TokenPair> = serde_json::from_str(
            r#"{"data":{"accessToken":"a2","refreshToken":"r2"}}"#,
        )
        .unwrap();
        let pair = parsed.data.unwrap();
        assert_eq!(pair.access_token, "a2");
        assert_eq!(pair.refresh_token, "r2");

        let parsed: ApiResponse<LoginData> =
            serde_json::from_str(r#"{"message":"Invalid credentials"}"#).unwrap();
        assert!(parsed.data.is_none());
    }
}
