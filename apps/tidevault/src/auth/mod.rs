//! Authorization lifecycle for the storage provider.
//!
//! `Unauthorized` means no token file exists. `CredentialManager::authenticate`
//! loads a stored token straight into a session, or returns a
//! [`PendingAuthorization`] that must be completed with an operator-supplied
//! code. The pending value holds the manager's flow lock, so only one
//! interactive flow can be in progress per process.

pub mod credentials;
pub mod error;
pub mod prompt;
pub mod provider;
pub mod session;

use crate::cycle::ports::Authenticator;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tracing::{info, warn};
use url::Url;

pub use credentials::{ClientCredentials, PersistedToken, TokenStore};
pub use error::AuthError;
pub use prompt::{CodePrompt, StdinPrompt};
pub use provider::{OAuthProvider, TokenResponse};
pub use session::AuthorizedSession;

/// Create-only access to files this app made; it cannot read anything else.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

pub enum AuthState {
    Authorized(AuthorizedSession),
    Pending(PendingAuthorization),
}

pub struct PendingAuthorization {
    url: Url,
    state: String,
    provider: Arc<OAuthProvider>,
    _flow: OwnedMutexGuard<()>,
}

impl PendingAuthorization {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> &str {
        &self.state
    }
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("url", &self.url.as_str())
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Clone)]
pub struct CredentialManager {
    credentials_path: PathBuf,
    store: TokenStore,
    provider: Arc<OnceCell<Arc<OAuthProvider>>>,
    flow: Arc<Mutex<()>>,
}

impl CredentialManager {
    pub fn new(credentials_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            store: TokenStore::new(token_path),
            provider: Arc::new(OnceCell::new()),
            flow: Arc::new(Mutex::new(())),
        }
    }

    pub fn token_path(&self) -> &Path {
        self.store.path()
    }

    /// Forget the stored token so the next authentication starts over.
    pub async fn discard_token(&self) -> Result<bool, AuthError> {
        let removed = self.store.discard().await?;
        if removed {
            info!(
                target: "tidevault::auth",
                path = %self.store.path().display(),
                "discarded stored token"
            );
        }
        Ok(removed)
    }

    async fn provider(&self) -> Result<Arc<OAuthProvider>, AuthError> {
        self.provider
            .get_or_try_init(|| async {
                let credentials = ClientCredentials::load(&self.credentials_path).await?;
                Ok::<_, AuthError>(Arc::new(OAuthProvider::new(credentials)?))
            })
            .await
            .cloned()
    }

    /// Stored tokens are used as-is; a rejected token only shows up when the
    /// uploader first presents it.
    pub async fn authenticate(&self) -> Result<AuthState, AuthError> {
        let provider = self.provider().await?;
        let flow = self.flow.clone().lock_owned().await;

        if let Some(token) = self.store.load().await? {
            info!(
                target: "tidevault::auth",
                path = %self.store.path().display(),
                "using stored token"
            );
            return Ok(AuthState::Authorized(AuthorizedSession::new(
                provider,
                self.store.clone(),
                token,
            )));
        }

        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = provider.authorization_url(DRIVE_FILE_SCOPE, &state);
        info!(
            target: "tidevault::auth",
            path = %self.store.path().display(),
            "no stored token; interactive authorization required"
        );
        Ok(AuthState::Pending(PendingAuthorization {
            url,
            state,
            provider,
            _flow: flow,
        }))
    }

    /// Exchange `code` for a token. Nothing is written unless the provider
    /// accepts it; on failure the whole flow has to start again.
    pub async fn complete(
        &self,
        pending: PendingAuthorization,
        code: &str,
    ) -> Result<AuthorizedSession, AuthError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::ProviderRejected(
                "no authorization code was entered".into(),
            ));
        }

        let response = match pending.provider.exchange_code(code).await {
            Ok(response) => response,
            Err(err) => {
                warn!(target: "tidevault::auth", error = %err, "authorization code exchange failed");
                return Err(err);
            }
        };
        let token = PersistedToken::from_response(response, None);
        if token.refresh_token.is_none() {
            warn!(
                target: "tidevault::auth",
                "provider issued no refresh token; re-authorization will be needed when it expires"
            );
        }
        self.store.save(&token).await?;
        info!(
            target: "tidevault::auth",
            path = %self.store.path().display(),
            "authorization complete; token stored"
        );
        Ok(AuthorizedSession::new(
            pending.provider.clone(),
            self.store.clone(),
            token,
        ))
    }
}

/// Drives the pending state through a [`CodePrompt`].
pub struct InteractiveAuthenticator<P> {
    manager: CredentialManager,
    prompt: P,
}

impl<P: CodePrompt> InteractiveAuthenticator<P> {
    pub fn new(manager: CredentialManager, prompt: P) -> Self {
        Self { manager, prompt }
    }

    pub async fn authenticate(&self) -> Result<AuthorizedSession, AuthError> {
        match self.manager.authenticate().await? {
            AuthState::Authorized(session) => Ok(session),
            AuthState::Pending(pending) => {
                let code = self.prompt.request_code(pending.url()).await?;
                self.manager.complete(pending, &code).await
            }
        }
    }
}

#[async_trait]
impl<P: CodePrompt> Authenticator for InteractiveAuthenticator<P> {
    async fn authenticate(&self) -> Result<AuthorizedSession, AuthError> {
        InteractiveAuthenticator::authenticate(self).await
    }
}
