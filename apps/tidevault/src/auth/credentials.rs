use crate::auth::error::AuthError;
use crate::auth::provider::TokenResponse;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use url::Url;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_SKEW_SECS: i64 = 30;

/// Installed-app identity issued by the provider console.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_uri: Url,
    pub token_uri: Url,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_uri", &self.auth_uri.as_str())
            .field("token_uri", &self.token_uri.as_str())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<RawClient>,
    web: Option<RawClient>,
}

#[derive(Debug, Deserialize)]
struct RawClient {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ClientCredentials {
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AuthError::MissingCredentialsFile(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let file: CredentialsFile = serde_json::from_str(raw)?;
        let client = file.installed.or(file.web).ok_or_else(|| {
            AuthError::Config("credentials file has neither an `installed` nor a `web` client".into())
        })?;
        let redirect_uri = client
            .redirect_uris
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::Config("credentials file lists no redirect_uris".into()))?;

        Ok(Self {
            client_id: client.client_id,
            client_secret: client.client_secret,
            redirect_uri,
            auth_uri: parse_endpoint("auth_uri", client.auth_uri, DEFAULT_AUTH_URI)?,
            token_uri: parse_endpoint("token_uri", client.token_uri, DEFAULT_TOKEN_URI)?,
        })
    }
}

fn parse_endpoint(field: &str, raw: Option<String>, default: &str) -> Result<Url, AuthError> {
    let raw = raw.unwrap_or_else(|| default.to_string());
    Url::parse(&raw).map_err(|err| AuthError::Config(format!("invalid {field} '{raw}': {err}")))
}

/// Token record kept on disk between runs. Field names match the
/// provider's own client libraries so existing token files keep working.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

impl std::fmt::Debug for PersistedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expiry_date", &self.expiry_date)
            .finish()
    }
}

impl PersistedToken {
    /// Build a record from a token endpoint response. Providers usually omit
    /// the refresh token on refresh, so the previous one is carried over.
    pub fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        let expiry_date = response.expires_in.map(|secs| {
            let expires_at = OffsetDateTime::now_utc() + Duration::seconds(secs as i64);
            (expires_at.unix_timestamp_nanos() / 1_000_000) as i64
        });
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            scope: response.scope,
            token_type: response.token_type,
            expiry_date,
        }
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expiry_date.and_then(|millis| {
            OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()
        })
    }

    /// Tokens without expiry metadata are assumed valid until the provider
    /// says otherwise.
    pub fn is_expired(&self) -> bool {
        match self.expires_at() {
            Some(expires_at) => {
                expires_at <= OffsetDateTime::now_utc() + Duration::seconds(EXPIRY_SKEW_SECS)
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<PersistedToken>, AuthError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Replace the token file wholesale; never appends.
    pub async fn save(&self, token: &PersistedToken) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let serialized = serde_json::to_string_pretty(token)?;
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&self.path).await?;
        file.write_all(serialized.as_bytes()).await?;
        file.flush().await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file.metadata().await?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    pub async fn discard(&self) -> Result<bool, AuthError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
