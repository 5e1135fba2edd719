use crate::auth::error::AuthError;
use async_trait::async_trait;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use url::Url;

/// Where an interactive authorization flow suspends for the operator.
#[async_trait]
pub trait CodePrompt: Send + Sync {
    async fn request_code(&self, url: &Url) -> Result<String, AuthError>;
}

#[async_trait]
impl<P: CodePrompt + ?Sized> CodePrompt for Arc<P> {
    async fn request_code(&self, url: &Url) -> Result<String, AuthError> {
        (**self).request_code(url).await
    }
}

/// Prints the consent URL and reads the code from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl CodePrompt for StdinPrompt {
    async fn request_code(&self, url: &Url) -> Result<String, AuthError> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            println!();
            println!("🔑 Google Drive authorization required");
            println!();
            println!("  1. Open this URL in a browser:");
            println!("     {url}");
            println!("  2. Approve access and copy the code you are given.");
            println!();
            print!("  Authorization code: ");
            io::stdout().flush()?;

            let mut line = String::new();
            let read = io::stdin().lock().read_line(&mut line)?;
            if read == 0 {
                return Err(AuthError::Prompt(
                    "stdin closed before an authorization code was entered".into(),
                ));
            }
            Ok(line.trim().to_string())
        })
        .await
        .map_err(|err| AuthError::Prompt(err.to_string()))?
    }
}
