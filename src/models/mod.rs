//! Data models for the authentication core.
//!
//! This module contains the token shapes shared across the API client,
//! the session controller, and vault persistence:
//!
//! - `TokenPayload`: decoded claims of a signed token
//! - `SignedToken`: raw token string plus its claims
//! - `Session`: the access/refresh pair for one authenticated user

pub mod token;

pub use token::{Session, SignedToken, TokenDecodeError, TokenKind, TokenPayload, CLOCK_DRIFT_MS};
