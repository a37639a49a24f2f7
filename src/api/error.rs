use thiserror::Error;

use crate::models::TokenDecodeError;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The server answered the login with a second-factor challenge.
    /// Not a failure of the overall flow; carries the challenge token the
    /// verification step must echo back.
    #[error("second factor required")]
    SecondFactorRequired { tfa_api_token: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    /// Second-factor submission rejected because the one-time code itself
    /// was wrong (narrower than `InvalidCredentials`).
    #[error("invalid one-time code")]
    InvalidCode,

    #[error("account locked")]
    AccountLocked,

    /// The refresh token was rejected - terminal for the session, the
    /// client must re-authenticate from credentials.
    #[error("session expired")]
    SessionExpired,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response: HTTP {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("token decode failed: {0}")]
    Token(#[from] TokenDecodeError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl AuthError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Map a non-success login/second-factor response to a typed error.
    ///
    /// A 401 on a second-factor submission whose body names an invalid
    /// one-time code gets the narrower `InvalidCode`; other statuses that
    /// have no mapping propagate unchanged as `UnexpectedResponse`.
    pub fn from_login_status(status: reqwest::StatusCode, body: &str, mfa_request: bool) -> Self {
        match status.as_u16() {
            401 => {
                if mfa_request && body_names_invalid_code(body) {
                    AuthError::InvalidCode
                } else {
                    AuthError::InvalidCredentials
                }
            }
            403 => AuthError::AccountLocked,
            422 => AuthError::InvalidCredentials,
            _ => AuthError::UnexpectedResponse {
                status: status.as_u16(),
                body: Self::truncate_body(body),
            },
        }
    }

    /// Map a non-success token refresh response to a typed error.
    pub fn from_refresh_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => AuthError::SessionExpired,
            _ => AuthError::UnexpectedResponse {
                status: status.as_u16(),
                body: Self::truncate_body(body),
            },
        }
    }

    /// True when the request never got an HTTP response at all (client
    /// offline, connect failure, request timeout). Callers keep their
    /// existing session and retry later instead of treating this as a
    /// rejection.
    pub fn is_offline(&self) -> bool {
        match self {
            AuthError::Network(e) => e.status().is_none(),
            _ => false,
        }
    }
}

/// Check whether a 401 body is the server's "Invalid code" rejection:
/// `{"errors":[{"description":"Invalid code"}]}`.
fn body_names_invalid_code(body: &str) -> bool {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        errors: Vec<ErrorEntry>,
    }

    #[derive(serde::Deserialize)]
    struct ErrorEntry {
        #[serde(default)]
        description: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.errors.into_iter().next())
        .and_then(|e| e.description)
        .is_some_and(|d| d == "Invalid code")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn login_status_mapping() {
        assert!(matches!(
            AuthError::from_login_status(StatusCode::UNAUTHORIZED, "", false),
            AuthError::InvalidCredentials
        ));
        assert!(matches!(
            AuthError::from_login_status(StatusCode::FORBIDDEN, "", false),
            AuthError::AccountLocked
        ));
        assert!(matches!(
            AuthError::from_login_status(StatusCode::UNPROCESSABLE_ENTITY, "", false),
            AuthError::InvalidCredentials
        ));
        assert!(matches!(
            AuthError::from_login_status(StatusCode::INTERNAL_SERVER_ERROR, "boom", false),
            AuthError::UnexpectedResponse { status: 500, .. }
        ));
    }

    #[test]
    fn invalid_code_needs_mfa_context_and_description() {
        let body = r#"{"errors":[{"description":"Invalid code"}]}"#;
        assert!(matches!(
            AuthError::from_login_status(StatusCode::UNAUTHORIZED, body, true),
            AuthError::InvalidCode
        ));
        // Same body on a primary login is still a credentials rejection.
        assert!(matches!(
            AuthError::from_login_status(StatusCode::UNAUTHORIZED, body, false),
            AuthError::InvalidCredentials
        ));
        // Different description stays generic.
        let other = r#"{"errors":[{"description":"Expired challenge"}]}"#;
        assert!(matches!(
            AuthError::from_login_status(StatusCode::UNAUTHORIZED, other, true),
            AuthError::InvalidCredentials
        ));
    }

    #[test]
    fn refresh_401_is_session_expired() {
        assert!(matches!(
            AuthError::from_refresh_status(StatusCode::UNAUTHORIZED, ""),
            AuthError::SessionExpired
        ));
        assert!(matches!(
            AuthError::from_refresh_status(StatusCode::BAD_GATEWAY, ""),
            AuthError::UnexpectedResponse { status: 502, .. }
        ));
    }

    #[test]
    fn truncates_long_bodies() {
        let long = "x".repeat(2000);
        match AuthError::from_login_status(StatusCode::INTERNAL_SERVER_ERROR, &long, false) {
            AuthError::UnexpectedResponse { body, .. } => {
                assert!(body.len() < 600);
                assert!(body.contains("truncated"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
