use std::fmt;
use std::path::PathBuf;

/// Process exit codes reported to whoever scheduled the run.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_OR_USAGE: i32 = 2;
    pub const TOKEN_UNAVAILABLE: i32 = 3;
    pub const REFRESH_FAILED: i32 = 4;
    pub const API_FAILURE: i32 = 5;
    pub const TRANSPORT_OR_OTHER: i32 = 6;
}

#[derive(Debug)]
pub enum Error {
    /// Credential file does not exist.
    ConfigMissing(PathBuf),
    /// Credential file exists but is empty, unparseable or lacks a required field.
    ConfigInvalid(String),
    /// Refreshed credentials could not be written back.
    ConfigWrite(String),
    /// Bad user input caught before any network activity.
    Usage(String),
    /// The access token expired and no refresh token is stored.
    TokenUnavailable,
    /// The token endpoint did not hand back a usable access token.
    RefreshFailed { body: String },
    /// DNS, TCP, TLS or timeout failure.
    Transport(reqwest::Error),
    /// Response could not be interpreted as an API envelope.
    Protocol { status: u16, body: String },
    /// API answered with a non-zero status code.
    Api { code: i64, message: String },
    /// A diagnostic read came back with an empty thermostat list.
    NotFound(String),
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigMissing(_)
            | Error::ConfigInvalid(_)
            | Error::ConfigWrite(_)
            | Error::Usage(_)
            | Error::Yaml(_) => exit_code::CONFIG_OR_USAGE,
            Error::TokenUnavailable => exit_code::TOKEN_UNAVAILABLE,
            Error::RefreshFailed { .. } => exit_code::REFRESH_FAILED,
            Error::Api { .. } | Error::NotFound(_) => exit_code::API_FAILURE,
            Error::Transport(_) | Error::Protocol { .. } | Error::Json(_) => {
                exit_code::TRANSPORT_OR_OTHER
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigMissing(path) => write!(
                f,
                "Configuration file not found: {}. Create it with client_id, access_token and refresh_token.",
                path.display()
            ),
            Error::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::ConfigWrite(msg) => write!(f, "Failed to save configuration: {}", msg),
            Error::Usage(msg) => write!(f, "{}", msg),
            Error::TokenUnavailable => write!(
                f,
                "Access token expired and no refresh token is available. Re-authorize the application."
            ),
            Error::RefreshFailed { body } => write!(f, "Token refresh failed: {}", body),
            Error::Transport(err) => write!(f, "HTTP error: {}", err),
            Error::Protocol { status, body } => {
                write!(f, "Unexpected response (HTTP {}): {}", status, body)
            }
            Error::Api { code, message } => write!(f, "API error {}: {}", code, message),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Yaml(err) => write!(f, "YAML parsing error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_failure_class() {
        assert_eq!(
            Error::ConfigMissing(PathBuf::from("/nope")).exit_code(),
            2
        );
        assert_eq!(Error::ConfigInvalid("empty".into()).exit_code(), 2);
        assert_eq!(Error::Usage("bad mode".into()).exit_code(), 2);
        assert_eq!(Error::TokenUnavailable.exit_code(), 3);
        assert_eq!(
            Error::RefreshFailed {
                body: "{}".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            Error::Api {
                code: 3,
                message: "Processing error".into()
            }
            .exit_code(),
            5
        );
        assert_eq!(
            Error::Protocol {
                status: 502,
                body: "<html>".into()
            }
            .exit_code(),
            6
        );
    }

    #[test]
    fn test_failure_messages_carry_raw_body() {
        let err = Error::Protocol {
            status: 502,
            body: "Bad Gateway".into(),
        };
        assert_eq!(err.to_string(), "Unexpected response (HTTP 502): Bad Gateway");

        let err = Error::RefreshFailed {
            body: r#"{"error":"invalid_grant"}"#.into(),
        };
        assert!(err.to_string().contains("invalid_grant"));
    }
}
