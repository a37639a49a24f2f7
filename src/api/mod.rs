//! Auth API client module for the remote session service.
//!
//! This module provides the `AuthClient` for the authentication handshake
//! (login, second-factor completion, token refresh) against the
//! `/v1/sessions` and `/v1/tokens` endpoints, and the typed `AuthError`
//! taxonomy the rest of the core dispatches on.

pub mod client;
pub mod error;

pub use client::AuthClient;
pub use error::AuthError;
