//! Seams between the cycle runner and the components it sequences.

use crate::auth::{AuthError, AuthorizedSession};
use crate::dump::{BackupArtifact, DumpError};
use crate::upload::UploadError;
use async_trait::async_trait;
use drive_sdk::DriveFile;
use std::path::Path;

#[async_trait]
pub trait Dumper: Send + Sync {
    async fn produce(&self) -> Result<BackupArtifact, DumpError>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<AuthorizedSession, AuthError>;
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        session: &AuthorizedSession,
        artifact: &Path,
        folder_id: &str,
    ) -> Result<DriveFile, UploadError>;
}
