//! Auth API client for the remote session endpoints.
//!
//! This module provides the `AuthClient` struct for the authentication
//! handshake: primary login, second-factor completion, and token refresh.
//! All three calls decode the returned access/refresh tokens into a
//! `Session` and translate transport outcomes into typed `AuthError`s.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{Session, SignedToken, TokenKind};

use super::AuthError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh requests carry the refresh token out-of-band in this header,
/// not as a bearer token - the access token may already be expired.
const REFRESH_HEADER: &str = "authorization-x-refresh";

#[derive(Debug, Deserialize)]
struct TokensEnvelope {
    data: TokensData,
}

#[derive(Debug, Deserialize)]
struct TokensData {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires: Option<i64>,
    user_id: u64,
}

#[derive(Debug, Deserialize)]
struct TwoFactorEnvelope {
    data: TwoFactorData,
}

#[derive(Debug, Deserialize)]
struct TwoFactorData {
    tfa_api_token: String,
}

/// Stateless client for the authentication endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    /// Create a new auth client against the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Primary login with email and password.
    ///
    /// The server answers `POST /v1/sessions` with either a token pair or a
    /// second-factor challenge; the two shapes are disjoint, discriminated
    /// by which field is present. A challenge surfaces as
    /// `AuthError::SecondFactorRequired` carrying the challenge token.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let url = format!("{}/v1/sessions", self.base_url);
        debug!(url = %url, "Sending login request");

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(url = %url, status = %status, "Login rejected");
            return Err(AuthError::from_login_status(status, &text, false));
        }

        // Challenge shape first, as the discriminating field lives there.
        if let Ok(challenge) = serde_json::from_str::<TwoFactorEnvelope>(&text) {
            debug!("Login requires second factor");
            return Err(AuthError::SecondFactorRequired {
                tfa_api_token: challenge.data.tfa_api_token,
            });
        }

        let tokens: TokensEnvelope = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, "Failed to parse login response");
            AuthError::UnexpectedResponse {
                status: status.as_u16(),
                body: format!("unparseable token response: {}", e),
            }
        })?;

        Self::session_from_tokens(tokens.data)
    }

    /// Complete a second-factor challenge with a one-time code.
    ///
    /// Same endpoint and error mapping as `authenticate`, except a 401 whose
    /// body names an invalid code maps to the narrower `InvalidCode`.
    pub async fn two_factor_authenticate(
        &self,
        tfa_api_token: &str,
        code: &str,
    ) -> Result<Session, AuthError> {
        let url = format!("{}/v1/sessions", self.base_url);
        debug!(url = %url, "Sending second-factor request");

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "tfa_api_token": tfa_api_token, "token": code }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(url = %url, status = %status, "Second-factor rejected");
            return Err(AuthError::from_login_status(status, &text, true));
        }

        let tokens: TokensEnvelope = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, "Failed to parse second-factor response");
            AuthError::UnexpectedResponse {
                status: status.as_u16(),
                body: format!("unparseable token response: {}", e),
            }
        })?;

        Self::session_from_tokens(tokens.data)
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// A 401 here means the refresh token itself was rejected -
    /// `AuthError::SessionExpired`, unrecoverable without re-authenticating.
    /// A transport failure with no response at all is *not* expiry; the
    /// caller keeps its session and retries later (`AuthError::is_offline`).
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let url = format!("{}/v1/tokens", self.base_url);
        debug!(url = %url, "Sending token refresh request");

        let response = self
            .client
            .post(&url)
            .header(REFRESH_HEADER, refresh_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(url = %url, status = %status, "Refresh rejected");
            return Err(AuthError::from_refresh_status(status, &text));
        }

        let tokens: TokensEnvelope = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, "Failed to parse refresh response");
            AuthError::UnexpectedResponse {
                status: status.as_u16(),
                body: format!("unparseable token response: {}", e),
            }
        })?;

        Self::session_from_tokens(tokens.data)
    }

    /// Assemble a session from one server response. Both tokens originate
    /// from the same call, which is what makes the pair atomic.
    fn session_from_tokens(data: TokensData) -> Result<Session, AuthError> {
        Ok(Session {
            user_id: data.user_id,
            access: SignedToken::decode(&data.access_token, TokenKind::Access)?,
            refresh: SignedToken::decode(&data.refresh_token, TokenKind::Refresh)?,
        })
    }
}
