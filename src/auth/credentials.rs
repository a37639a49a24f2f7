//! Credential store: the one email/password pair and its vault entry.
//!
//! Persistence is deliberately forgiving: a transient storage hiccup must
//! not force the user to re-enter credentials, so write failures are
//! logged and swallowed while the in-memory state still moves forward.
//! The next successful unlock re-syncs storage.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::{AuthClient, AuthError};
use crate::auth::SessionController;
use crate::vault::SecureVault;

/// Vault key for the persisted credentials.
pub(crate) const CREDENTIALS_KEY: &str = "credentials";

/// Capacity of the change-notification channel.
const CHANNEL_CAPACITY: usize = 16;

/// The login secret. Owned exclusively by the `CredentialStore`,
/// persisted only inside the vault.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

// Manual Debug so the password can never leak into logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Domain layer over the vault holding exactly one credentials pair.
pub struct CredentialStore {
    vault: Arc<SecureVault>,
    api: Arc<AuthClient>,
    session: Arc<SessionController>,
    current: Mutex<Option<Credentials>>,
    changes_tx: broadcast::Sender<Option<Credentials>>,
}

impl CredentialStore {
    pub fn new(
        vault: Arc<SecureVault>,
        api: Arc<AuthClient>,
        session: Arc<SessionController>,
    ) -> Self {
        let (changes_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            vault,
            api,
            session,
            current: Mutex::new(None),
            changes_tx,
        }
    }

    /// The credentials currently held, if any.
    pub fn current(&self) -> Option<Credentials> {
        self.current.lock().unwrap().clone()
    }

    /// Every credential change, including to `None`. Drop the receiver to
    /// unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<Option<Credentials>> {
        self.changes_tx.subscribe()
    }

    /// Replace the stored credentials. A field-equal pair is a no-op.
    ///
    /// The vault write (or reset, for `None`) happens first and is
    /// best-effort; in-memory state and subscribers move forward even
    /// when persistence failed.
    pub async fn update_credentials(&self, next: Option<Credentials>) {
        {
            let current = self.current.lock().unwrap();
            if *current == next {
                return;
            }
        }

        match &next {
            Some(credentials) => self.vault.put_item(CREDENTIALS_KEY, credentials).await,
            None => self.vault.reset(CREDENTIALS_KEY).await,
        }

        self.commit(next);
    }

    /// Read stored credentials and authenticate with them.
    ///
    /// Any vault read failure reads as "no credentials". On a successful
    /// authentication the session is forwarded to the controller; on
    /// failure the credentials that were tried are still committed (so
    /// subscribers see the snapshot of the attempt) and the typed error
    /// propagates for the UI to render. With no credentials at all, the
    /// controller is told the session is gone - its notification path
    /// reports the unauthenticated state.
    pub async fn unlock(&self) -> Result<(), AuthError> {
        let credentials = match self.vault.get_item::<Credentials>(CREDENTIALS_KEY).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Treating unreadable credentials as absent");
                None
            }
        };

        let Some(credentials) = credentials else {
            debug!("No stored credentials");
            self.session.update_session(None);
            self.commit(None);
            return Ok(());
        };

        match self
            .api
            .authenticate(&credentials.email, &credentials.password)
            .await
        {
            Ok(session) => {
                self.session.update_session(Some(Arc::new(session)));
                self.commit(Some(credentials));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Unlock authentication failed");
                self.commit(Some(credentials));
                Err(e)
            }
        }
    }

    fn commit(&self, next: Option<Credentials>) {
        *self.current.lock().unwrap() = next.clone();
        let _ = self.changes_tx.send(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::test_tokens;
    use crate::models::TokenKind;
    use crate::vault::MemoryBackend;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn memory_vault() -> Arc<SecureVault> {
        Arc::new(SecureVault::new(Arc::new(MemoryBackend::new()), None))
    }

    fn store_over(vault: Arc<SecureVault>, base: &str) -> CredentialStore {
        let api = Arc::new(AuthClient::new(base).unwrap());
        let session = SessionController::new(Arc::clone(&api), Arc::clone(&vault));
        CredentialStore::new(vault, api, session)
    }

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn tokens_body(user_id: u64, iat: i64) -> serde_json::Value {
        let sub = user_id.to_string();
        let now = chrono::Utc::now().timestamp();
        serde_json::json!({
            "data": {
                "access_token": test_tokens::encode(TokenKind::Access, iat, now + 900, &sub),
                "refresh_token": test_tokens::encode(TokenKind::Refresh, iat, now + 86_400, &sub),
                "expires": now + 900,
                "user_id": user_id,
            }
        })
    }

    #[tokio::test]
    async fn update_notifies_and_persists() {
        let vault = memory_vault();
        let store = store_over(Arc::clone(&vault), "http://127.0.0.1:9");
        let mut changes = store.subscribe();

        store.update_credentials(Some(creds("a@x.com", "p"))).await;

        assert_eq!(changes.recv().await.unwrap(), Some(creds("a@x.com", "p")));
        assert_eq!(
            vault
                .get_item::<Credentials>(CREDENTIALS_KEY)
                .await
                .unwrap(),
            Some(creds("a@x.com", "p"))
        );

        store.update_credentials(None).await;
        assert_eq!(changes.recv().await.unwrap(), None);
        assert_eq!(
            vault
                .get_item::<Credentials>(CREDENTIALS_KEY)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn field_equal_update_is_a_no_op() {
        let store = store_over(memory_vault(), "http://127.0.0.1:9");
        let mut changes = store.subscribe();

        store.update_credentials(Some(creds("a@x.com", "p"))).await;
        changes.recv().await.unwrap();

        store.update_credentials(Some(creds("a@x.com", "p"))).await;
        assert!(matches!(
            changes.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn unlock_authenticates_with_exactly_the_stored_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .and(body_json(serde_json::json!({
                "email": "a@x.com",
                "password": "p",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tokens_body(7, 1000)))
            .mount(&server)
            .await;

        let vault = memory_vault();

        // First run stores the credentials.
        let store = store_over(Arc::clone(&vault), &server.uri());
        store.update_credentials(Some(creds("a@x.com", "p"))).await;
        drop(store);

        // Simulated restart: a fresh store over the same vault unlocks
        // with what was persisted.
        let store = store_over(Arc::clone(&vault), &server.uri());
        store.unlock().await.unwrap();

        assert_eq!(store.session.current().unwrap().user_id, 7);
        assert_eq!(store.current(), Some(creds("a@x.com", "p")));
    }

    #[tokio::test]
    async fn unlock_without_credentials_clears_the_session() {
        let store = store_over(memory_vault(), "http://127.0.0.1:9");
        store
            .session
            .update_session(Some(Arc::new(test_tokens::session(7, 100, 900, 86_400))));
        let mut changes = store.subscribe();

        store.unlock().await.unwrap();

        assert!(store.session.current().is_none());
        assert_eq!(changes.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unlock_failure_still_commits_the_tried_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let vault = memory_vault();
        vault.put_item(CREDENTIALS_KEY, &creds("a@x.com", "stale")).await;

        let store = store_over(Arc::clone(&vault), &server.uri());
        let mut changes = store.subscribe();

        let err = store.unlock().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // The snapshot of what was tried is visible, session untouched.
        assert_eq!(changes.recv().await.unwrap(), Some(creds("a@x.com", "stale")));
        assert_eq!(store.current(), Some(creds("a@x.com", "stale")));
        assert!(store.session.current().is_none());
    }

    #[test]
    fn debug_never_prints_the_password() {
        let formatted = format!("{:?}", creds("a@x.com", "hunter2"));
        assert!(formatted.contains("a@x.com"));
        assert!(!formatted.contains("hunter2"));
    }
}
