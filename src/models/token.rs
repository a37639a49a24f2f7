use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety margin against clock skew between client and server.
/// Refresh is scheduled this far before real expiry, and a refresh token
/// within this margin of its own expiry is treated as unusable. The same
/// margin intentionally serves both checks; it is tunable through
/// `SessionController`.
pub const CLOCK_DRIFT_MS: i64 = 30_000;

#[derive(Debug, Error)]
pub enum TokenDecodeError {
    #[error("token is not a three-segment JWT")]
    Malformed,

    #[error("token payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("token payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a {expected} token, got {actual}")]
    WrongKind { expected: TokenKind, actual: TokenKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// Decoded claims of a signed token. Immutable once decoded.
///
/// The server is the trusted transport, so claims are read without
/// signature verification; only the shape is validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub typ: TokenKind,
    /// Expiry, epoch seconds.
    pub exp: i64,
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub kid: String,
    /// Issued-at, epoch seconds. Used as the monotonic session version.
    pub iat: i64,
    pub jti: String,
    /// Not-before, epoch seconds.
    pub nbf: i64,
}

/// A raw signed token paired with its decoded claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedToken {
    pub token: String,
    pub payload: TokenPayload,
}

impl SignedToken {
    /// Decode a signed token, checking that its `typ` claim matches the
    /// slot it is about to fill.
    pub fn decode(token: &str, expected: TokenKind) -> Result<Self, TokenDecodeError> {
        let payload = decode_claims(token)?;
        if payload.typ != expected {
            return Err(TokenDecodeError::WrongKind {
                expected,
                actual: payload.typ,
            });
        }
        Ok(Self {
            token: token.to_string(),
            payload,
        })
    }
}

/// The live token pair for one authenticated user.
///
/// Both tokens always originate from the same server call, so
/// `access.payload.iat == refresh.payload.iat`; the access token's `iat`
/// serves as the pair's version marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: u64,
    pub access: SignedToken,
    pub refresh: SignedToken,
}

impl Session {
    /// Milliseconds until the proactive refresh point (access expiry minus
    /// the drift margin). Zero or negative means "refresh now".
    pub fn refresh_delay_ms(&self, drift_ms: i64) -> i64 {
        self.access.payload.exp * 1000 - Utc::now().timestamp_millis() - drift_ms
    }

    /// Whether the refresh token is still usable, with the same drift
    /// margin applied against its expiry.
    pub fn can_refresh(&self, drift_ms: i64) -> bool {
        self.refresh.payload.exp * 1000 - drift_ms > Utc::now().timestamp_millis()
    }
}

/// Decode the claims segment of a signed token (no signature verification).
fn decode_claims(token: &str) -> Result<TokenPayload, TokenDecodeError> {
    let mut segments = token.split('.');
    let claims = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(claims), Some(_), None) => claims,
        _ => return Err(TokenDecodeError::Malformed),
    };

    let bytes = URL_SAFE_NO_PAD.decode(claims)?;
    Ok(serde_json::from_slice(&bytes)?)
}
