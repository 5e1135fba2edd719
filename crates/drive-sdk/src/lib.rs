//! Asynchronous client for the Google Drive v3 REST API.
//!
//! Only the calls the backup daemon needs are wrapped: resumable file
//! creation, folder listing and deletion. Token handling stays with the
//! caller; every request takes a bearer token.

mod files;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub use files::{DriveFile, FileUpload};

const GOOGLE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const GOOGLE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Base URLs for the metadata and media endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl DriveEndpoints {
    pub fn google() -> Self {
        Self::new(GOOGLE_API_BASE, GOOGLE_UPLOAD_BASE)
    }

    pub fn new(api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self::google()
    }
}

#[derive(Debug, Clone)]
pub struct DriveClient {
    http: Client,
    endpoints: DriveEndpoints,
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorDetail {
    Structured { message: String },
    Code(String),
}

impl DriveError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DriveError::UnexpectedStatus { status, .. } => Some(*status),
            DriveError::Http(err) => err.status(),
            _ => None,
        }
    }

    /// Human-readable provider message, falling back to the raw error text.
    ///
    /// Drive wraps failures as `{"error": {"message": ...}}` while the OAuth
    /// layer in front of it answers `{"error": "invalid_grant", ...}`; both
    /// shapes are flattened here.
    pub fn message(&self) -> String {
        match self {
            DriveError::UnexpectedStatus { body, .. } => {
                match serde_json::from_str::<ApiErrorBody>(body) {
                    Ok(parsed) => match parsed.error {
                        ApiErrorDetail::Structured { message } => message,
                        ApiErrorDetail::Code(code) => match parsed.error_description {
                            Some(description) => format!("{code}: {description}"),
                            None => code,
                        },
                    },
                    Err(_) if body.trim().is_empty() => self.to_string(),
                    Err(_) => body.trim().to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

impl DriveClient {
    pub fn new(endpoints: DriveEndpoints) -> Result<Self, DriveError> {
        // No overall timeout: backup bodies can take minutes to stream.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &DriveEndpoints {
        &self.endpoints
    }
}

async fn check_status(response: Response) -> Result<Response, DriveError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(DriveError::UnexpectedStatus { status, body })
}
