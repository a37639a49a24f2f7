//! Session controller: owns the live token pair and its refresh schedule.
//!
//! The controller is the single choke point for authenticated requests:
//! every caller asks `access_token` for a valid token before attaching a
//! bearer header. Out-of-order network completions (a slow login landing
//! after a faster refresh) are handled by the monotonic `iat` guard, not
//! by reordering - highest-`iat`-wins, never last-applied-wins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::AuthClient;
use crate::models::{Session, SignedToken, CLOCK_DRIFT_MS};
use crate::vault::SecureVault;

/// Vault key for the persisted token pair.
pub(crate) const SESSION_KEY: &str = "session";

/// Capacity of the notification channels. Receivers that fall this far
/// behind re-check the live state instead of replaying history.
const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No session exists and authentication was declared impossible.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The caller's cancellation signal fired while waiting.
    #[error("aborted")]
    Aborted,
}

/// Hook invoked when the controller needs a from-scratch re-authentication
/// (refresh token expired or rejected). Wired to the credential store's
/// `unlock` at assembly time so the controller never owns the store.
pub type ReauthHook = Box<dyn Fn() + Send + Sync>;

struct Inner {
    session: Option<Arc<Session>>,
    refresh_timer: Option<JoinHandle<()>>,
}

/// State machine over one variable - the current session - plus a pending
/// refresh timer. Methods must be called from within the Tokio runtime.
pub struct SessionController {
    inner: Mutex<Inner>,
    /// Fires only when the authenticated user changes (null to non-null,
    /// non-null to null, or a different `user_id`).
    identity_tx: broadcast::Sender<Option<Arc<Session>>>,
    /// Fires on every accepted update, including same-user refreshes.
    tokens_tx: broadcast::Sender<Option<Arc<Session>>>,
    reauth: Mutex<Option<ReauthHook>>,
    api: Arc<AuthClient>,
    vault: Arc<SecureVault>,
    drift_ms: i64,
}

impl SessionController {
    pub fn new(api: Arc<AuthClient>, vault: Arc<SecureVault>) -> Arc<Self> {
        Self::with_drift(api, vault, CLOCK_DRIFT_MS)
    }

    /// Build a controller with a custom drift margin. The one margin
    /// covers both the proactive-refresh delay and the refresh-token
    /// usability check.
    pub fn with_drift(api: Arc<AuthClient>, vault: Arc<SecureVault>, drift_ms: i64) -> Arc<Self> {
        let (identity_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (tokens_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                session: None,
                refresh_timer: None,
            }),
            identity_tx,
            tokens_tx,
            reauth: Mutex::new(None),
            api,
            vault,
            drift_ms,
        })
    }

    /// Install the re-authentication hook. Called once during wiring.
    pub fn set_reauth_hook(&self, hook: ReauthHook) {
        *self.reauth.lock().unwrap() = Some(hook);
    }

    /// The current session, if any.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.inner.lock().unwrap().session.clone()
    }

    /// Session-identity notifications: user changed or signed out.
    pub fn subscribe_identity(&self) -> broadcast::Receiver<Option<Arc<Session>>> {
        self.identity_tx.subscribe()
    }

    /// Token-pair notifications: every accepted update, for consumers
    /// that need the freshest token object even without a user change.
    pub fn subscribe_tokens(&self) -> broadcast::Receiver<Option<Arc<Session>>> {
        self.tokens_tx.subscribe()
    }

    /// Install a new session, honoring the monotonic `iat` guard.
    ///
    /// The update is a no-op when `next` is the instance already held, or
    /// when both pairs are present and `next` was not issued strictly
    /// later. Accepting a pair cancels the pending refresh timer, arms a
    /// new one before the access token's real expiry, persists the pair
    /// (best-effort), and notifies subscribers.
    pub fn update_session(self: &Arc<Self>, next: Option<Arc<Session>>) {
        let previous = {
            let mut inner = self.inner.lock().unwrap();

            let same_instance = match (&next, &inner.session) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            let stale = matches!(
                (&next, &inner.session),
                (Some(a), Some(b)) if a.access.payload.iat <= b.access.payload.iat
            );
            if same_instance || stale {
                return;
            }

            if let Some(timer) = inner.refresh_timer.take() {
                timer.abort();
            }
            let previous = inner.session.take();
            inner.session = next.clone();

            if let Some(ref session) = next {
                let delay = session.refresh_delay_ms(self.drift_ms).max(0) as u64;
                debug!(delay_ms = delay, user_id = session.user_id, "Scheduling token refresh");
                let controller = Arc::clone(self);
                inner.refresh_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    controller.refresh().await;
                }));
            }

            previous
        };

        // Persist outside the lock; the vault is best-effort by contract.
        let vault = Arc::clone(&self.vault);
        let persisted = next.clone();
        tokio::spawn(async move {
            match persisted {
                Some(session) => vault.put_item(SESSION_KEY, session.as_ref()).await,
                None => vault.reset(SESSION_KEY).await,
            }
        });

        let identity_changed = match (&previous, &next) {
            (Some(a), Some(b)) => a.user_id != b.user_id,
            _ => true,
        };
        if identity_changed {
            let _ = self.identity_tx.send(next.clone());
        }
        let _ = self.tokens_tx.send(next);
    }

    /// Resolve a valid access token, suspending until one exists.
    ///
    /// Resolves immediately while the current session is outside the
    /// drift margin of expiry. Otherwise the caller parks on the token
    /// notifications: a session resolves it, a signed-out notification
    /// rejects with `Unauthenticated`, and the optional cancellation
    /// signal rejects that caller alone with `Aborted`.
    pub async fn access_token(
        &self,
        signal: Option<&CancellationToken>,
    ) -> Result<SignedToken, SessionError> {
        // Subscribe before inspecting state so no update can slip between
        // the check and the wait.
        let mut rx = self.tokens_tx.subscribe();

        {
            let inner = self.inner.lock().unwrap();
            if let Some(ref session) = inner.session {
                if session.refresh_delay_ms(self.drift_ms) > 0 {
                    return Ok(session.access.clone());
                }
            }
        }

        loop {
            let received = match signal {
                Some(signal) => tokio::select! {
                    _ = signal.cancelled() => return Err(SessionError::Aborted),
                    received = rx.recv() => received,
                },
                None => rx.recv().await,
            };

            match received {
                Ok(Some(session)) => return Ok(session.access.clone()),
                Ok(None) => return Err(SessionError::Unauthenticated),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed intermediate updates; answer from live state.
                    let current = self.current();
                    match current {
                        Some(session) => return Ok(session.access.clone()),
                        None => return Err(SessionError::Unauthenticated),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SessionError::Unauthenticated)
                }
            }
        }
    }

    /// Load the persisted pair on startup; adopt it while its refresh
    /// token is still usable, otherwise fall back to re-authentication
    /// from stored credentials.
    pub async fn initialize(self: &Arc<Self>) {
        match self.vault.get_item::<Session>(SESSION_KEY).await {
            Ok(Some(pair)) if pair.can_refresh(self.drift_ms) => {
                info!(user_id = pair.user_id, "Adopting persisted session");
                self.update_session(Some(Arc::new(pair)));
            }
            Ok(Some(_)) => {
                debug!("Persisted session beyond refresh validity");
                self.request_reauth();
            }
            Ok(None) => {
                debug!("No persisted session");
                self.request_reauth();
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session");
                self.request_reauth();
            }
        }
    }

    /// Cancel the pending refresh timer.
    pub fn shutdown(&self) {
        if let Some(timer) = self.inner.lock().unwrap().refresh_timer.take() {
            timer.abort();
        }
    }

    /// Timer callback: refresh the pair, or hand over to from-scratch
    /// re-authentication when the refresh token is no longer usable.
    async fn refresh(self: Arc<Self>) {
        let session = self.current();
        let Some(session) = session else {
            // Stale timer; the session was replaced or cleared.
            return;
        };

        if !session.can_refresh(self.drift_ms) {
            debug!("Refresh token too old, re-authenticating from stored credentials");
            self.request_reauth();
            return;
        }

        match self.api.refresh_tokens(&session.refresh.token).await {
            Ok(pair) => {
                info!(user_id = pair.user_id, "Session refreshed");
                self.update_session(Some(Arc::new(pair)));
            }
            Err(e) if e.is_offline() => {
                // Keep the session; a later manual or UI-triggered retry
                // will pick it back up.
                warn!(error = %e, "Refresh failed while offline, keeping session");
            }
            Err(e) => {
                warn!(error = %e, "Refresh rejected, dropping session");
                self.update_session(None);
                self.request_reauth();
            }
        }
    }

    fn request_reauth(&self) {
        let hook = self.reauth.lock().unwrap();
        match hook.as_ref() {
            Some(hook) => hook(),
            None => warn!("Re-authentication requested but no hook is wired"),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.lock().unwrap().refresh_timer.take() {
            timer.abort();
        }
    }
}
