use crate::auth::credentials::{PersistedToken, TokenStore};
use crate::auth::error::AuthError;
use crate::auth::provider::OAuthProvider;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A usable capability to call the storage API. Handed to the uploader by
/// reference; only the credential manager writes the token behind it.
#[derive(Debug)]
pub struct AuthorizedSession {
    provider: Arc<OAuthProvider>,
    store: TokenStore,
    token: Mutex<PersistedToken>,
}

impl AuthorizedSession {
    pub fn new(provider: Arc<OAuthProvider>, store: TokenStore, token: PersistedToken) -> Self {
        Self {
            provider,
            store,
            token: Mutex::new(token),
        }
    }

    pub fn token_path(&self) -> &Path {
        self.store.path()
    }

    /// Current access token, refreshed and persisted first when it has
    /// expired.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        let mut token = self.token.lock().await;
        if !token.is_expired() {
            return Ok(token.access_token.clone());
        }

        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            AuthError::InvalidGrant("access token expired and no refresh token is stored".into())
        })?;
        let response = self.provider.refresh(&refresh_token).await?;
        let refreshed = PersistedToken::from_response(response, Some(refresh_token));
        self.store.save(&refreshed).await?;
        info!(
            target: "tidevault::auth",
            path = %self.store.path().display(),
            "access token refreshed"
        );
        *token = refreshed;
        Ok(token.access_token.clone())
    }
}
