//! Secure vault over the platform secret store.
//!
//! This module provides:
//! - `SecureVault`: serialized, timeout-bounded get/put/reset with a
//!   reset-then-retry write policy and a primary/secondary read fallback
//! - `VaultBackend`: the storage abstraction, with `KeyringBackend` for
//!   the OS keychain and `MemoryBackend` for tests
//!
//! Operations are serialized because reads and writes can raise the
//! device's biometric/passcode prompt, which is globally exclusive.

pub mod backend;
pub mod store;

pub use backend::{BackendError, KeyringBackend, MemoryBackend, VaultBackend};
pub use store::{SecureVault, VaultError};
