//! Gatehouse - session and credential lifecycle core for a mobile client.
//!
//! This crate manages authentication tokens, their automatic renewal,
//! secure persistence of login secrets, and propagation of authentication
//! state to the rest of the application:
//!
//! - `vault`: serialized, timeout-bounded access to the platform secret
//!   store, with reset-then-retry writes and a read fallback chain
//! - `api`: the authentication handshake (login, second factor, refresh)
//!   with a typed error taxonomy
//! - `auth`: the session controller (proactive refresh, the
//!   `access_token` choke point), the credential store, and the
//!   second-factor hand-off slot
//!
//! Construct an [`auth::AuthStack`] once at application start, call
//! `initialize`, and route every authenticated request through
//! [`auth::SessionController::access_token`].

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod vault;

pub use api::{AuthClient, AuthError};
pub use auth::{
    AuthStack, CredentialStore, Credentials, MultiFactorHandoff, MultiFactorState,
    SessionController, SessionError,
};
pub use config::Config;
pub use models::{Session, SignedToken, TokenKind, TokenPayload, CLOCK_DRIFT_MS};
pub use vault::{SecureVault, VaultBackend, VaultError};
