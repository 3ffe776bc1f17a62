//! Request/retry protocol on top of the credential lifecycle.
//!
//! A run goes `Sent -> {done | expired}`; an expired response triggers at most
//! one `refresh -> (persist) -> resend` cycle. The retried response is final.

use log::debug;

use crate::auth::TokenRefresher;
use crate::client::{build_http_client, RequestExecutor};
use crate::config::{ClientSettings, CredentialStore, Credentials};
use crate::error::{Error, Result};
use crate::types::{
    Envelope, ModeCommand, Operation, RawResponse, RequestOutcome, Thermostat, ThermostatResponse,
};

/// Body fragments the API uses when the access token is no longer accepted.
const EXPIRY_MARKERS: [&str; 3] = ["invalid access token", "expired", "unauthorized"];

/// Whether a response means the access token must be refreshed.
///
/// True on HTTP 401, or when the body mentions an invalid/expired token in any
/// case. The API sometimes reports expiry inside a 200 response with a
/// non-zero status code, so both signals are checked. This over-approximates:
/// any unrelated message containing "expired" also matches.
pub fn is_token_expired(http_status: u16, body: &str) -> bool {
    if http_status == 401 {
        return true;
    }
    let body = body.to_lowercase();
    EXPIRY_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Decide whether a final response counts as success.
///
/// Success is HTTP 200 with `status.code == 0`. A parsed non-zero code is an
/// API error whatever the HTTP status; anything else is a protocol error
/// carrying the raw status and body.
pub fn classify(outcome: &RequestOutcome) -> Result<()> {
    let protocol_error = || Error::Protocol {
        status: outcome.http_status,
        body: outcome.body.clone(),
    };

    match serde_json::from_str::<Envelope>(&outcome.body) {
        Ok(Envelope {
            status: Some(status),
        }) => {
            if status.code != 0 {
                Err(Error::Api {
                    code: status.code,
                    message: status.message,
                })
            } else if outcome.http_status == 200 {
                Ok(())
            } else {
                Err(protocol_error())
            }
        }
        _ => Err(protocol_error()),
    }
}

/// Classify a read response and pull out its thermostat list.
pub fn thermostats_from(outcome: &RequestOutcome) -> Result<Vec<Thermostat>> {
    classify(outcome)?;

    let response: ThermostatResponse =
        serde_json::from_str(&outcome.body).map_err(|_| Error::Protocol {
            status: outcome.http_status,
            body: outcome.body.clone(),
        })?;

    if response.thermostat_list.is_empty() {
        return Err(Error::NotFound(
            "no thermostats matched the selection".to_string(),
        ));
    }
    Ok(response.thermostat_list)
}

/// Credentials plus the collaborators needed to run one operation.
pub struct Session {
    executor: RequestExecutor,
    refresher: TokenRefresher,
    store: CredentialStore,
    credentials: Credentials,
    api_base: String,
}

impl Session {
    pub fn new(
        settings: &ClientSettings,
        store: CredentialStore,
        credentials: Credentials,
    ) -> Result<Self> {
        let http = build_http_client(settings.timeout)?;
        Ok(Self {
            executor: RequestExecutor::new(http.clone()),
            refresher: TokenRefresher::new(http, settings.auth_base.clone()),
            store,
            credentials,
            api_base: settings.api_base.clone(),
        })
    }

    /// Load credentials from `store` and build a session around them.
    pub fn open(settings: &ClientSettings, store: CredentialStore) -> Result<Self> {
        let credentials = store.load()?;
        Self::new(settings, store, credentials)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Send `operation`, refreshing and resending once if the token expired.
    ///
    /// Makes at most three outbound calls: the request, one refresh, one
    /// retry. The returned outcome is not yet classified.
    pub async fn run(&mut self, operation: &Operation) -> Result<RequestOutcome> {
        let request = operation.prepare(&self.api_base)?;

        debug!("Sending {:?} request", operation.kind);
        let first = self
            .executor
            .send_prepared(&request, &self.credentials.access_token)
            .await?;

        if !is_token_expired(first.status, &first.body) {
            return Ok(RequestOutcome::new(first, false));
        }
        debug!("Access token rejected (HTTP {})", first.status);

        let refresh_token = self
            .credentials
            .refresh_token
            .clone()
            .ok_or(Error::TokenUnavailable)?;

        debug!("Refreshing access token");
        let tokens = self
            .refresher
            .refresh(&refresh_token, &self.credentials.client_id)
            .await?;

        self.credentials.access_token = tokens.access_token;
        if let Some(rotated) = tokens.refresh_token {
            self.credentials.refresh_token = Some(rotated);
        }

        if operation.allow_persist_refresh {
            self.store.persist(&self.credentials)?;
        } else {
            debug!("Read-only operation, refreshed credentials kept in memory only");
        }

        debug!("Resending request with refreshed token");
        let retried: RawResponse = self
            .executor
            .send_prepared(&request, &self.credentials.access_token)
            .await?;
        Ok(RequestOutcome::new(retried, true))
    }

    /// Set the HVAC mode of one thermostat.
    pub async fn set_mode(
        &mut self,
        thermostat_id: &str,
        mode: ModeCommand,
    ) -> Result<RequestOutcome> {
        let outcome = self.run(&Operation::set_mode(thermostat_id, mode)).await?;
        classify(&outcome)?;
        Ok(outcome)
    }

    /// Read one thermostat (or all registered ones) without persisting anything.
    pub async fn read(&mut self, operation: &Operation) -> Result<Vec<Thermostat>> {
        let outcome = self.run(operation).await?;
        thermostats_from(&outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: u16, body: &str) -> RequestOutcome {
        RequestOutcome::new(
            RawResponse {
                status,
                body: body.to_string(),
            },
            false,
        )
    }

    #[test]
    fn test_expiry_on_401_regardless_of_body() {
        assert!(is_token_expired(401, ""));
        assert!(is_token_expired(401, r#"{"status":{"code":0}}"#));
    }

    #[test]
    fn test_expiry_markers_in_200_body() {
        assert!(is_token_expired(
            200,
            r#"{"status":{"code":14,"message":"Authentication token has expired. Refresh your tokens. API Key: abc"}}"#
        ));
        assert!(is_token_expired(500, "Invalid Access Token"));
        assert!(is_token_expired(403, "UNAUTHORIZED"));
    }

    #[test]
    fn test_no_expiry_on_plain_responses() {
        assert!(!is_token_expired(200, r#"{"status":{"code":0,"message":""}}"#));
        assert!(!is_token_expired(
            500,
            r#"{"status":{"code":3,"message":"Processing error."}}"#
        ));
    }

    #[test]
    fn test_classify_success() {
        assert!(classify(&outcome(200, r#"{"status":{"code":0,"message":""}}"#)).is_ok());
    }

    #[test]
    fn test_classify_nonzero_code_is_api_error() {
        let err = classify(&outcome(
            200,
            r#"{"status":{"code":3,"message":"Validation error. Invalid hvacMode."}}"#,
        ))
        .unwrap_err();

        match err {
            Error::Api { code, message } => {
                assert_eq!(code, 3);
                assert!(message.contains("Invalid hvacMode"));
            }
            other => panic!("expected Api error, got {:?}", other),
        }

        let err = classify(&outcome(500, r#"{"status":{"code":3,"message":"x"}}"#)).unwrap_err();
        assert!(matches!(err, Error::Api { code: 3, .. }));
    }

    #[test]
    fn test_classify_unparseable_is_protocol_error() {
        let err = classify(&outcome(502, "<html>Bad Gateway</html>")).unwrap_err();
        match err {
            Error::Protocol { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "<html>Bad Gateway</html>");
            }
            other => panic!("expected Protocol error, got {:?}", other),
        }

        assert!(matches!(
            classify(&outcome(200, "{}")).unwrap_err(),
            Error::Protocol { status: 200, .. }
        ));
        assert!(matches!(
            classify(&outcome(503, r#"{"status":{"code":0}}"#)).unwrap_err(),
            Error::Protocol { status: 503, .. }
        ));
    }

    #[test]
    fn test_empty_thermostat_list_is_not_found() {
        let err = thermostats_from(&outcome(
            200,
            r#"{"thermostatList":[],"status":{"code":0,"message":""}}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_thermostat_list_parsed() {
        let thermostats = thermostats_from(&outcome(
            200,
            r#"{"thermostatList":[{"identifier":"311000000001","name":"Hallway","settings":{"hvacMode":"cool"}}],"status":{"code":0,"message":""}}"#,
        ))
        .unwrap();
        assert_eq!(thermostats.len(), 1);
        assert_eq!(thermostats[0].hvac_mode(), "cool");
    }
}
