use std::collections::HashMap;
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;

/// Error from a single backend operation, carrying the platform message.
/// The vault inspects the message to distinguish a cancelled or failed
/// device-authentication prompt from ordinary storage failures.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl From<keyring::Error> for BackendError {
    fn from(e: keyring::Error) -> Self {
        BackendError(e.to_string())
    }
}

/// A platform secret store holding opaque `(key, secret-string)` pairs.
///
/// Implementations may block (OS keychain calls, possibly raising a
/// biometric or passcode prompt); the vault runs them on the blocking
/// pool, one at a time.
pub trait VaultBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    fn put(&self, key: &str, value: &str) -> Result<(), BackendError>;

    fn reset(&self, key: &str) -> Result<(), BackendError>;
}

/// Secret store backed by the OS keychain via `keyring`.
///
/// Entries are written requesting device-unlock gating; the platform
/// applies its automatic security-upgrade policy on reads rather than
/// failing on a settings mismatch.
pub struct KeyringBackend {
    service: String,
    name: &'static str,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            name: "keyring",
        }
    }

    /// Backend reading the legacy service namespace that older builds
    /// wrote with a different storage cipher. Used as the read fallback.
    pub fn legacy(service: impl Into<String>) -> Self {
        Self {
            service: format!("{}.legacy", service.into()),
            name: "keyring-legacy",
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, BackendError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl VaultBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), BackendError> {
        Ok(self.entry(key)?.set_password(value)?)
    }

    fn reset(&self, key: &str) -> Result<(), BackendError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory backend for tests and local development.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VaultBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn reset(&self, key: &str) -> Result<(), BackendError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("k").unwrap(), None);

        backend.put("k", "v").unwrap();
        assert_eq!(backend.get("k").unwrap(), Some("v".to_string()));

        backend.reset("k").unwrap();
        assert_eq!(backend.get("k").unwrap(), None);
        // Resetting an absent key is not an error.
        backend.reset("k").unwrap();
    }
}
