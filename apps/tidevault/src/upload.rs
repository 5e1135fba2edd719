use crate::auth::{AuthError, AuthorizedSession};
use crate::cycle::ports::Uploader;
use crate::dump::format_size;
use async_trait::async_trait;
use drive_sdk::{DriveClient, DriveError, DriveFile, FileUpload};
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const BACKUP_CONTENT_TYPE: &str = "application/sql";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("artifact {} does not exist", .0.display())]
    MissingArtifact(PathBuf),
    #[error("destination folder '{0}' was not found or is not shared with this app; check GOOGLE_DRIVE_FOLDER_ID")]
    FolderNotFound(String),
    #[error("authorization has expired or was revoked; delete {} and re-authorize", .0.display())]
    ExpiredGrant(PathBuf),
    #[error("upload failed: {0}")]
    Transport(String),
}

impl UploadError {
    /// Only transport failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transport(_))
    }
}

#[derive(Debug, Clone)]
pub struct DriveUploader {
    client: DriveClient,
}

impl DriveUploader {
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }

    pub async fn upload(
        &self,
        session: &AuthorizedSession,
        artifact: &Path,
        folder_id: &str,
    ) -> Result<DriveFile, UploadError> {
        if !tokio::fs::try_exists(artifact).await.unwrap_or(false) {
            return Err(UploadError::MissingArtifact(artifact.to_path_buf()));
        }
        let name = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::MissingArtifact(artifact.to_path_buf()))?;

        let token = bearer(session).await?;
        let upload = FileUpload {
            name,
            parent: folder_id.to_string(),
            content_type: BACKUP_CONTENT_TYPE.to_string(),
            path: artifact.to_path_buf(),
        };
        let file = self
            .client
            .create_file(&token, &upload)
            .await
            .map_err(|err| classify(err, session.token_path(), Some(folder_id)))?;

        info!(
            target: "tidevault::upload",
            id = %file.id,
            name = %file.name,
            size = %file.size.map(format_size).unwrap_or_else(|| "unknown".into()),
            "backup uploaded"
        );
        Ok(file)
    }

    pub async fn list_backups(
        &self,
        session: &AuthorizedSession,
        folder_id: &str,
    ) -> Result<Vec<DriveFile>, UploadError> {
        let token = bearer(session).await?;
        self.client
            .list_files(&token, folder_id)
            .await
            .map_err(|err| classify(err, session.token_path(), Some(folder_id)))
    }

    pub async fn delete_backup(
        &self,
        session: &AuthorizedSession,
        file_id: &str,
    ) -> Result<(), UploadError> {
        let token = bearer(session).await?;
        self.client
            .delete_file(&token, file_id)
            .await
            .map_err(|err| classify(err, session.token_path(), None))?;
        info!(target: "tidevault::upload", id = %file_id, "backup deleted");
        Ok(())
    }
}

#[async_trait]
impl Uploader for DriveUploader {
    async fn upload(
        &self,
        session: &AuthorizedSession,
        artifact: &Path,
        folder_id: &str,
    ) -> Result<DriveFile, UploadError> {
        DriveUploader::upload(self, session, artifact, folder_id).await
    }
}

async fn bearer(session: &AuthorizedSession) -> Result<String, UploadError> {
    session.bearer().await.map_err(|err| match err {
        AuthError::InvalidGrant(_) => UploadError::ExpiredGrant(session.token_path().to_path_buf()),
        other => UploadError::Transport(other.to_string()),
    })
}

/// Map a provider failure onto the upload taxonomy. A 404 only means a
/// missing folder when a folder was part of the request.
fn classify(err: DriveError, token_path: &Path, folder_id: Option<&str>) -> UploadError {
    let message = err.message();
    if let Some(folder) = folder_id {
        if err.status() == Some(StatusCode::NOT_FOUND) || message.contains("File not found") {
            return UploadError::FolderNotFound(folder.to_string());
        }
    }
    if err.status() == Some(StatusCode::UNAUTHORIZED) || message.contains("invalid_grant") {
        return UploadError::ExpiredGrant(token_path.to_path_buf());
    }
    UploadError::Transport(message)
}
