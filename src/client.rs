use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{PreparedRequest, RawResponse};

/// Build the shared HTTP client, bounded by `timeout` per request.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Headers for an authenticated API call.
pub fn bearer_headers(access_token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json;charset=UTF-8"),
    );

    let auth_value = format!("Bearer {}", access_token);
    let auth_value = HeaderValue::from_str(&auth_value).map_err(|_| {
        Error::ConfigInvalid("access_token contains characters not allowed in a header".to_string())
    })?;
    headers.insert(AUTHORIZATION, auth_value);

    Ok(headers)
}

/// Performs single HTTP exchanges. Any status code is a response; only
/// connection-level failures are errors.
pub struct RequestExecutor {
    client: reqwest::Client,
}

impl RequestExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<RawResponse> {
        debug!("{} {}", method, url.path());

        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("Response status: {} ({} bytes)", status, body.len());

        Ok(RawResponse { status, body })
    }

    pub async fn send_prepared(
        &self,
        request: &PreparedRequest,
        access_token: &str,
    ) -> Result<RawResponse> {
        let headers = bearer_headers(access_token)?;
        self.send(
            request.method.clone(),
            request.url.clone(),
            headers,
            request.body.clone(),
        )
        .await
    }
}
