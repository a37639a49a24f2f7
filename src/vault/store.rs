//! Timeout-bounded, serialized access to the platform secret store.
//!
//! Reads and writes may raise an OS-level biometric or passcode prompt,
//! and that UI is globally exclusive - so every vault operation goes
//! through one fair FIFO queue, one operation in flight at a time.
//! Failure recovery is an explicit ordered chain: writes reset the key and
//! retry once before being abandoned, reads fall back to a secondary
//! backend before being treated as absence.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::backend::{BackendError, KeyringBackend, VaultBackend};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for plain writes and resets.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reads, which may sit behind a device-authentication prompt
/// until the user reacts.
const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum VaultError {
    /// The operation did not finish within its timeout class. The queue
    /// moves on; the underlying platform call may still complete.
    #[error("secret store operation timed out")]
    Timeout,

    /// The device-authentication prompt was cancelled or failed. Distinct
    /// from absence: the secret may exist but the gate was not passed.
    #[error("device authentication gate failed")]
    AuthGateFailed,

    #[error("secret store failure: {0}")]
    Backend(String),

    /// Persisted payload did not parse back into its expected shape.
    #[error("corrupted persisted payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl VaultError {
    /// Classify a backend failure, pulling out prompt-gate failures by
    /// message the way the platform reports them.
    fn classify(e: BackendError) -> Self {
        let message = e.0.to_ascii_lowercase();
        if message.contains("cancel") || message.contains("not correct") {
            VaultError::AuthGateFailed
        } else {
            VaultError::Backend(e.0)
        }
    }
}

/// Serialized, timeout-bounded front for the platform secret store.
pub struct SecureVault {
    primary: Arc<dyn VaultBackend>,
    secondary: Option<Arc<dyn VaultBackend>>,
    /// The single point of true mutual exclusion: tokio's Mutex is fair,
    /// so queued operations run in FIFO order, one at a time.
    serial: Mutex<()>,
    write_timeout: Duration,
    read_timeout: Duration,
}

impl SecureVault {
    pub fn new(primary: Arc<dyn VaultBackend>, secondary: Option<Arc<dyn VaultBackend>>) -> Self {
        Self {
            primary,
            secondary,
            serial: Mutex::new(()),
            write_timeout: DEFAULT_TIMEOUT,
            read_timeout: PROMPT_TIMEOUT,
        }
    }

    /// Platform wiring: OS keychain plus the legacy-cipher namespace as
    /// the read fallback.
    pub fn platform(service: &str) -> Self {
        Self::new(
            Arc::new(KeyringBackend::new(service)),
            Some(Arc::new(KeyringBackend::legacy(service))),
        )
    }

    #[cfg(test)]
    fn with_timeouts(mut self, write: Duration, read: Duration) -> Self {
        self.write_timeout = write;
        self.read_timeout = read;
        self
    }

    /// Run one backend operation through the serial queue with a timeout.
    async fn run_op<T, F>(&self, timeout: Duration, op: F) -> Result<T, VaultError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    {
        let _serial = self.serial.lock().await;
        let task = tokio::task::spawn_blocking(op);
        match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(VaultError::Timeout),
            Ok(Err(join)) => Err(VaultError::Backend(join.to_string())),
            Ok(Ok(Err(e))) => Err(VaultError::classify(e)),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }

    async fn get_from(
        &self,
        backend: &Arc<dyn VaultBackend>,
        key: &str,
    ) -> Result<Option<String>, VaultError> {
        let backend = Arc::clone(backend);
        let key = key.to_string();
        self.run_op(self.read_timeout, move || backend.get(&key)).await
    }

    /// Read a secret. Primary-backend failures fall back to the secondary
    /// backend, then to absence - except a failed device-authentication
    /// gate, which is surfaced as `VaultError::AuthGateFailed` from either
    /// backend and never masked as a missing entry.
    pub async fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        match self.get_from(&self.primary, key).await {
            Ok(value) => Ok(value),
            Err(VaultError::AuthGateFailed) => Err(VaultError::AuthGateFailed),
            Err(e1) => {
                warn!(key, backend = self.primary.name(), error = %e1, "Vault read failed");

                let Some(ref secondary) = self.secondary else {
                    return Ok(None);
                };
                match self.get_from(secondary, key).await {
                    Ok(value) => Ok(value),
                    Err(VaultError::AuthGateFailed) => Err(VaultError::AuthGateFailed),
                    Err(e2) => {
                        warn!(key, backend = secondary.name(), error = %e2, "Vault read fallback failed");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Write a secret, best-effort. On failure the key is reset and the
    /// write retried once; a second failure abandons the write, so callers
    /// must not assume persistence succeeded.
    pub async fn put(&self, key: &str, value: &str) {
        let set = |backend: Arc<dyn VaultBackend>, key: String, value: String| {
            move || backend.put(&key, &value)
        };

        let first = self
            .run_op(
                self.write_timeout,
                set(Arc::clone(&self.primary), key.to_string(), value.to_string()),
            )
            .await;
        let Err(e1) = first else {
            debug!(key, "Vault write succeeded");
            return;
        };
        warn!(key, error = %e1, "Vault write failed, resetting key");

        let backend = Arc::clone(&self.primary);
        let reset_key = key.to_string();
        if let Err(e2) = self
            .run_op(self.write_timeout, move || backend.reset(&reset_key))
            .await
        {
            warn!(key, error = %e2, "Vault reset failed, abandoning write");
            return;
        }

        if let Err(e3) = self
            .run_op(
                self.write_timeout,
                set(Arc::clone(&self.primary), key.to_string(), value.to_string()),
            )
            .await
        {
            warn!(key, error = %e3, "Vault write failed even after reset");
        }
    }

    /// Erase a secret, best-effort.
    pub async fn reset(&self, key: &str) {
        let backend = Arc::clone(&self.primary);
        let reset_key = key.to_string();
        if let Err(e) = self
            .run_op(self.write_timeout, move || backend.reset(&reset_key))
            .await
        {
            warn!(key, error = %e, "Vault reset failed");
        }
    }

    /// Read and deserialize a persisted value. A payload that no longer
    /// parses is a `Decode` error, not absence.
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, VaultError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value, best-effort like `put`.
    pub async fn put_item<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.put(key, &raw).await,
            Err(e) => warn!(key, error = %e, "Failed to serialize vault item"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::backend::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose next N puts or gets fail, for scripting the retry
    /// and fallback chains.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        failing_puts: AtomicUsize,
        failing_gets: AtomicUsize,
        gate_failure: bool,
        resets: AtomicUsize,
    }

    impl FlakyBackend {
        fn failing(puts: usize, gets: usize) -> Self {
            Self {
                failing_puts: AtomicUsize::new(puts),
                failing_gets: AtomicUsize::new(gets),
                ..Self::default()
            }
        }

        fn take(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl VaultBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            if Self::take(&self.failing_gets) {
                if self.gate_failure {
                    return Err(BackendError("User canceled the operation".into()));
                }
                return Err(BackendError("keystore unavailable".into()));
            }
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<(), BackendError> {
            if Self::take(&self.failing_puts) {
                return Err(BackendError("keystore unavailable".into()));
            }
            self.inner.put(key, value)
        }

        fn reset(&self, key: &str) -> Result<(), BackendError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.inner.reset(key)
        }
    }

    fn vault_over(backend: Arc<dyn VaultBackend>) -> SecureVault {
        SecureVault::new(backend, None)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let vault = vault_over(Arc::new(MemoryBackend::new()));
        vault.put("k", "secret").await;
        assert_eq!(vault.get("k").await.unwrap(), Some("secret".to_string()));
    }

    #[tokio::test]
    async fn put_failure_resets_and_retries() {
        let backend = Arc::new(FlakyBackend::failing(1, 0));
        let vault = vault_over(Arc::clone(&backend) as Arc<dyn VaultBackend>);

        vault.put("k", "secret").await;

        assert_eq!(backend.resets.load(Ordering::SeqCst), 1);
        assert_eq!(vault.get("k").await.unwrap(), Some("secret".to_string()));
    }

    #[tokio::test]
    async fn put_abandons_after_second_failure() {
        let backend = Arc::new(FlakyBackend::failing(2, 0));
        let vault = vault_over(Arc::clone(&backend) as Arc<dyn VaultBackend>);

        vault.put("k", "secret").await;

        // Nothing persisted; the subsequent read sees absence.
        assert_eq!(vault.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_falls_back_to_secondary() {
        let primary = Arc::new(FlakyBackend::failing(0, usize::MAX));
        let secondary = Arc::new(MemoryBackend::new());
        secondary.put("k", "from-legacy").unwrap();

        let vault = SecureVault::new(primary, Some(secondary));
        assert_eq!(vault.get("k").await.unwrap(), Some("from-legacy".to_string()));
    }

    #[tokio::test]
    async fn get_exhausted_fallbacks_is_absence() {
        let primary = Arc::new(FlakyBackend::failing(0, usize::MAX));
        let secondary = Arc::new(FlakyBackend::failing(0, usize::MAX));
        let vault = SecureVault::new(primary, Some(secondary));

        assert_eq!(vault.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancelled_prompt_is_not_absence() {
        let primary = Arc::new(FlakyBackend {
            failing_gets: AtomicUsize::new(usize::MAX),
            gate_failure: true,
            ..FlakyBackend::default()
        });
        let vault = vault_over(primary);

        assert!(matches!(
            vault.get("k").await,
            Err(VaultError::AuthGateFailed)
        ));
    }

    #[tokio::test]
    async fn slow_backend_is_bounded_by_timeout() {
        struct SlowBackend;
        impl VaultBackend for SlowBackend {
            fn name(&self) -> &'static str {
                "slow"
            }
            fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
                std::thread::sleep(Duration::from_millis(250));
                Ok(Some("late".into()))
            }
            fn put(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
                std::thread::sleep(Duration::from_millis(250));
                Ok(())
            }
            fn reset(&self, _key: &str) -> Result<(), BackendError> {
                std::thread::sleep(Duration::from_millis(250));
                Ok(())
            }
        }

        let vault = vault_over(Arc::new(SlowBackend))
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20));

        // Timed-out read exhausts its (absent) fallback and reads as absence;
        // timed-out writes are silently abandoned.
        assert_eq!(vault.get("k").await.unwrap(), None);
        vault.put("k", "v").await;
    }

    #[tokio::test]
    async fn operations_are_serialized_fifo() {
        struct CountingBackend {
            in_flight: AtomicUsize,
            overlapped: AtomicUsize,
        }
        impl VaultBackend for CountingBackend {
            fn name(&self) -> &'static str {
                "counting"
            }
            fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
                if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    self.overlapped.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(20));
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            }
            fn put(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
                Ok(())
            }
            fn reset(&self, _key: &str) -> Result<(), BackendError> {
                Ok(())
            }
        }

        let backend = Arc::new(CountingBackend {
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
        });
        let vault = Arc::new(vault_over(Arc::clone(&backend) as Arc<dyn VaultBackend>));

        let mut handles = Vec::new();
        for i in 0..4 {
            let vault = Arc::clone(&vault);
            handles.push(tokio::spawn(async move {
                vault.get(&format!("k{i}")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(backend.overlapped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn item_helpers_round_trip_and_flag_corruption() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Entry {
            email: String,
        }

        let backend = Arc::new(MemoryBackend::new());
        let vault = vault_over(Arc::clone(&backend) as Arc<dyn VaultBackend>);

        vault
            .put_item("k", &Entry { email: "a@x.com".into() })
            .await;
        assert_eq!(
            vault.get_item::<Entry>("k").await.unwrap(),
            Some(Entry { email: "a@x.com".into() })
        );

        backend.put("k", "{not json").unwrap();
        assert!(matches!(
            vault.get_item::<Entry>("k").await,
            Err(VaultError::Decode(_))
        ));
    }
}
