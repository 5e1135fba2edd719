use crate::{check_status, DriveClient, DriveError};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::Body;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing::debug;

const CREATE_FIELDS: &str = "id,name,size,createdTime";
const LIST_FIELDS: &str = "files(id,name,size,createdTime,modifiedTime)";

/// Metadata returned by Drive for a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub modified_time: Option<OffsetDateTime>,
}

/// A local file to be created inside a Drive folder.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub parent: String,
    pub content_type: String,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Serialize)]
struct CreateMetadata<'a> {
    name: &'a str,
    parents: [&'a str; 1],
}

// Drive encodes int64 fields as JSON strings.
fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(value)) => Ok(Some(value)),
        Some(Raw::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl DriveClient {
    /// Create a file with a resumable upload: the metadata request opens an
    /// upload session, then the body is streamed from disk to it.
    pub async fn create_file(
        &self,
        token: &str,
        upload: &FileUpload,
    ) -> Result<DriveFile, DriveError> {
        let file = tokio::fs::File::open(&upload.path).await?;
        let length = file.metadata().await?.len();

        let url = format!("{}/files", self.endpoints.upload_base);
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("uploadType", "resumable"), ("fields", CREATE_FIELDS)])
            .header("X-Upload-Content-Type", upload.content_type.as_str())
            .header("X-Upload-Content-Length", length)
            .json(&CreateMetadata {
                name: &upload.name,
                parents: [&upload.parent],
            })
            .send()
            .await?;
        let response = check_status(response).await?;

        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                DriveError::Protocol("resumable upload response carried no Location header".into())
            })?;
        debug!(
            target: "drive_sdk",
            name = %upload.name,
            bytes = length,
            "resumable upload session opened"
        );

        let response = self
            .http
            .put(session_url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, upload.content_type.as_str())
            .header(CONTENT_LENGTH, length)
            .body(Body::from(file))
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Files directly inside `folder_id`, newest first. Trashed files are
    /// excluded.
    pub async fn list_files(
        &self,
        token: &str,
        folder_id: &str,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let query = format!("'{}' in parents and trashed=false", folder_id.replace('\'', "\\'"));
        let url = format!("{}/files", self.endpoints.api_base);
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("orderBy", "createdTime desc"),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        let listing: FileList = response.json().await?;
        Ok(listing.files)
    }

    pub async fn delete_file(&self, token: &str, file_id: &str) -> Result<(), DriveError> {
        let url = format!("{}/files/{}", self.endpoints.api_base, file_id);
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        check_status(response).await?;
        Ok(())
    }
}
