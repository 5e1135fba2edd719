use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("client credentials file not found at {}", .0.display())]
    MissingCredentialsFile(PathBuf),
    #[error("authorization rejected by provider: {0}")]
    ProviderRejected(String),
    #[error("grant expired or revoked: {0}")]
    InvalidGrant(String),
    #[error("authorization prompt failed: {0}")]
    Prompt(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
