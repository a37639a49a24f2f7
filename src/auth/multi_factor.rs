//! One-shot hand-off slot between the login step and the second-factor
//! challenge screen.

use std::sync::Mutex;

/// The pending login's credentials and challenge token, alive only
/// between the challenge being raised and the verification step
/// consuming it.
#[derive(Clone, PartialEq, Eq)]
pub struct MultiFactorState {
    pub email: String,
    pub password: String,
    pub tfa_api_token: String,
}

impl std::fmt::Debug for MultiFactorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiFactorState")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("tfa_api_token", &self.tfa_api_token)
            .finish()
    }
}

/// A single shared slot holding at most one pending challenge.
///
/// Reading pops: the slot empties on the read, so a stale challenge can
/// never be replayed by a later visit to the challenge screen.
#[derive(Default)]
pub struct MultiFactorHandoff {
    slot: Mutex<Option<MultiFactorState>>,
}

impl MultiFactorHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot unconditionally.
    pub fn set(&self, state: MultiFactorState) {
        *self.slot.lock().unwrap() = Some(state);
    }

    /// Take the pending state, clearing the slot.
    pub fn pop(&self) -> Option<MultiFactorState> {
        self.slot.lock().unwrap().take()
    }
}
