//! Assembly of the authentication core.
//!
//! The controllers are single owned instances constructed once at
//! application start and injected into consumers by reference; the only
//! cross-component wiring that cannot be expressed as a plain field is
//! the session controller's re-authentication hook, which is installed
//! here so the controller never owns the credential store.

use std::sync::Arc;

use tracing::warn;

use crate::api::{AuthClient, AuthError};
use crate::config::Config;
use crate::vault::SecureVault;

use super::credentials::{CredentialStore, Credentials};
use super::multi_factor::{MultiFactorHandoff, MultiFactorState};
use super::session::SessionController;

/// The assembled authentication core, one instance per application.
pub struct AuthStack {
    pub vault: Arc<SecureVault>,
    pub api: Arc<AuthClient>,
    pub session: Arc<SessionController>,
    pub credentials: Arc<CredentialStore>,
    pub multi_factor: Arc<MultiFactorHandoff>,
}

impl AuthStack {
    /// Build the stack against the platform secret store.
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let vault = Arc::new(SecureVault::platform(&config.vault_service));
        let api = Arc::new(AuthClient::new(&config.api_base_url)?);
        Ok(Self::wire(vault, api))
    }

    /// Wire the components together over the given vault and API client.
    pub fn wire(vault: Arc<SecureVault>, api: Arc<AuthClient>) -> Self {
        let session = SessionController::new(Arc::clone(&api), Arc::clone(&vault));
        let credentials = Arc::new(CredentialStore::new(
            Arc::clone(&vault),
            Arc::clone(&api),
            Arc::clone(&session),
        ));

        // Irrecoverable refresh failure cascades into a silent unlock
        // from stored credentials before any unauthenticated state
        // reaches the user.
        let store = Arc::clone(&credentials);
        session.set_reauth_hook(Box::new(move || {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                if let Err(e) = store.unlock().await {
                    warn!(error = %e, "Automatic re-authentication failed");
                }
            });
        }));

        Self {
            vault,
            api,
            session,
            credentials,
            multi_factor: Arc::new(MultiFactorHandoff::new()),
        }
    }

    /// Startup entry point: adopt the persisted session or unlock from
    /// stored credentials.
    pub async fn initialize(&self) {
        self.session.initialize().await;
    }

    /// Interactive login. On success the credentials are committed and
    /// the session installed. A second-factor challenge stashes the
    /// pending state in the hand-off slot before propagating, so the
    /// challenge screen can pick it up; other failures propagate typed
    /// for the UI to render.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        match self.api.authenticate(email, password).await {
            Ok(session) => {
                self.credentials
                    .update_credentials(Some(Credentials {
                        email: email.to_string(),
                        password: password.to_string(),
                    }))
                    .await;
                self.session.update_session(Some(Arc::new(session)));
                Ok(())
            }
            Err(AuthError::SecondFactorRequired { tfa_api_token }) => {
                self.multi_factor.set(MultiFactorState {
                    email: email.to_string(),
                    password: password.to_string(),
                    tfa_api_token: tfa_api_token.clone(),
                });
                Err(AuthError::SecondFactorRequired { tfa_api_token })
            }
            Err(e) => Err(e),
        }
    }

    /// Complete a second-factor challenge with the state popped from the
    /// hand-off slot and the user's one-time code.
    pub async fn second_factor_login(
        &self,
        state: MultiFactorState,
        code: &str,
    ) -> Result<(), AuthError> {
        let session = self
            .api
            .two_factor_authenticate(&state.tfa_api_token, code)
            .await?;

        self.credentials
            .update_credentials(Some(Credentials {
                email: state.email,
                password: state.password,
            }))
            .await;
        self.session.update_session(Some(Arc::new(session)));
        Ok(())
    }

    /// Explicit sign-out: clear both the credentials and the session.
    pub async fn logout(&self) {
        self.credentials.update_credentials(None).await;
        self.session.update_session(None);
    }

    /// Stop the background refresh timer.
    pub fn shutdown(&self) {
        self.session.shutdown();
    }
}
