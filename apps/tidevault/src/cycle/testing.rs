//! In-memory stand-ins for the cycle ports.

use super::ports::{Authenticator, Dumper, Uploader};
use crate::auth::{
    AuthError, AuthorizedSession, ClientCredentials, OAuthProvider, PersistedToken, TokenStore,
};
use crate::dump::{BackupArtifact, DumpError};
use crate::upload::UploadError;
use async_trait::async_trait;
use chrono::Utc;
use drive_sdk::DriveFile;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn session() -> AuthorizedSession {
    let credentials = ClientCredentials::parse(
        r#"{"installed":{"client_id":"c","client_secret":"s","redirect_uris":["urn:ietf:wg:oauth:2.0:oob"]}}"#,
    )
    .unwrap();
    AuthorizedSession::new(
        Arc::new(OAuthProvider::new(credentials).unwrap()),
        TokenStore::new("unused-token.json"),
        PersistedToken {
            access_token: "ya29.test".into(),
            refresh_token: None,
            scope: None,
            token_type: None,
            expiry_date: None,
        },
    )
}

#[derive(Default)]
pub struct FakeDumper {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub hold: Option<Duration>,
}

#[async_trait]
impl Dumper for FakeDumper {
    async fn produce(&self) -> Result<BackupArtifact, DumpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = self.hold {
            tokio::time::sleep(hold).await;
        }
        if self.fail {
            return Err(DumpError::Process {
                program: "mysqldump".into(),
                detail: "exit status: 2".into(),
            });
        }
        Ok(BackupArtifact {
            source: "orders".into(),
            created_at: Utc::now(),
            path: PathBuf::from("/tmp/b/orders_20240305_101530.sql"),
            size_bytes: 12,
        })
    }
}

#[derive(Default)]
pub struct FakeAuth {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl Authenticator for FakeAuth {
    async fn authenticate(&self) -> Result<AuthorizedSession, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AuthError::ProviderRejected("invalid_grant (400 Bad Request)".into()));
        }
        Ok(session())
    }
}

/// Replays scripted failures, then succeeds with increasing ids.
#[derive(Default)]
pub struct FakeUploader {
    failures: Mutex<Vec<UploadError>>,
    pub calls: AtomicUsize,
}

impl FakeUploader {
    pub fn failing_with(failures: Vec<UploadError>) -> Self {
        Self {
            failures: Mutex::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        _session: &AuthorizedSession,
        artifact: &Path,
        _folder_id: &str,
    ) -> Result<DriveFile, UploadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop() {
            return Err(err);
        }
        Ok(DriveFile {
            id: format!("file{}", 123 + call),
            name: artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: Some(12),
            created_time: None,
            modified_time: None,
        })
    }
}
