use crate::auth::credentials::ClientCredentials;
use crate::auth::error::AuthError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Talks to the provider's OAuth endpoints on behalf of one installed app.
#[derive(Debug, Clone)]
pub struct OAuthProvider {
    client: Client,
    credentials: ClientCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

impl ErrorBody {
    fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(ErrorBody {
            error: None,
            error_description: Some(text.to_string()),
        })
    }

    fn is_invalid_grant(&self) -> bool {
        self.error.as_deref() == Some("invalid_grant")
    }

    fn describe(self, status: StatusCode) -> String {
        let detail = match (self.error, self.error_description) {
            (Some(code), Some(description)) if !description.is_empty() => {
                format!("{code}: {description}")
            }
            (Some(code), _) => code,
            (None, Some(description)) if !description.is_empty() => description,
            _ => "unknown error".to_string(),
        };
        format!("{detail} ({status})")
    }
}

impl OAuthProvider {
    pub fn new(credentials: ClientCredentials) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| AuthError::Config(err.to_string()))?;
        Ok(Self { client, credentials })
    }

    /// Consent URL for `scope`, requesting offline access so the exchange
    /// yields a refresh token.
    pub fn authorization_url(&self, scope: &str, state: &str) -> Url {
        let mut url = self.credentials.auth_uri.clone();
        url.query_pairs_mut()
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", &self.credentials.redirect_uri)
            .append_pair("scope", scope)
            .append_pair("state", state);
        url
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AuthError> {
        #[derive(Serialize)]
        struct ExchangeRequest<'a> {
            grant_type: &'static str,
            code: &'a str,
            client_id: &'a str,
            client_secret: &'a str,
            redirect_uri: &'a str,
        }

        let response = self
            .client
            .post(self.credentials.token_uri.clone())
            .form(&ExchangeRequest {
                grant_type: "authorization_code",
                code,
                client_id: &self.credentials.client_id,
                client_secret: &self.credentials.client_secret,
                redirect_uri: &self.credentials.redirect_uri,
            })
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(AuthError::ProviderRejected(
            ErrorBody::parse(&text).describe(status),
        ))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            grant_type: &'static str,
            refresh_token: &'a str,
            client_id: &'a str,
            client_secret: &'a str,
        }

        let response = self
            .client
            .post(self.credentials.token_uri.clone())
            .form(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token,
                client_id: &self.credentials.client_id,
                client_secret: &self.credentials.client_secret,
            })
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = ErrorBody::parse(&text);
        if body.is_invalid_grant() || status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidGrant(body.describe(status)));
        }
        Err(AuthError::ProviderRejected(format!(
            "token refresh failed: {}",
            body.describe(status)
        )))
    }
}
