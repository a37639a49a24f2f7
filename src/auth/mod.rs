//! Authentication core: session lifecycle and credential management.
//!
//! This module provides:
//! - `SessionController`: the live token pair, proactive refresh, and the
//!   `access_token` choke point for authenticated requests
//! - `CredentialStore`: the one stored email/password pair and `unlock`
//! - `MultiFactorHandoff`: the one-shot second-factor hand-off slot
//! - `AuthStack`: assembly and lifecycle entry points
//!
//! Credential unlock triggers authentication; irrecoverable refresh
//! failure cascades back into unlock. Everything else talks to these
//! components through explicit method calls and notifications.

pub mod credentials;
pub mod multi_factor;
pub mod session;
pub mod stack;

pub use credentials::{CredentialStore, Credentials};
pub use multi_factor::{MultiFactorHandoff, MultiFactorState};
pub use session::{ReauthHook, SessionController, SessionError};
pub use stack::AuthStack;
