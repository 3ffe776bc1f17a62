use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    /// The token endpoint takes the refresh token in the `code` field.
    code: &'a str,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

/// Tokens handed back by a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// `None` when the server kept the previous refresh token.
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for a new access token. Never retries.
pub struct TokenRefresher {
    client: reqwest::Client,
    auth_base: String,
}

impl TokenRefresher {
    pub fn new(client: reqwest::Client, auth_base: impl Into<String>) -> Self {
        Self {
            client,
            auth_base: auth_base.into(),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.auth_base.trim_end_matches('/'))
    }

    pub async fn refresh(&self, refresh_token: &str, client_id: &str) -> Result<RefreshedTokens> {
        let request = RefreshRequest {
            grant_type: "refresh_token",
            code: refresh_token,
            client_id,
        };

        let response = self
            .client
            .post(self.token_url())
            .form(&request)
            .send()
            .await
            .map_err(|e| Error::RefreshFailed {
                body: format!("request to token endpoint failed: {}", e),
            })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| Error::RefreshFailed {
            body: format!("failed to read token response: {}", e),
        })?;
        debug!("Token endpoint answered with status: {}", status);

        parse_refresh_response(&response_text)
    }
}

fn parse_refresh_response(body: &str) -> Result<RefreshedTokens> {
    let parsed = serde_json::from_str::<RefreshResponse>(body).map_err(|e| {
        debug!("Failed to parse token response: {}", e);
        Error::RefreshFailed {
            body: body.to_string(),
        }
    })?;

    match parsed.access_token {
        Some(access_token) if !access_token.is_empty() => Ok(RefreshedTokens {
            access_token,
            refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
        }),
        _ => Err(Error::RefreshFailed {
            body: body.to_string(),
        }),
    }
}
