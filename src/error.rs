// Error taxonomy shared by the library modules. Command handlers wrap these
// in `anyhow` for reporting; the enums stay typed so callers can tell an
// expired token apart from a flaky network.

use std::path::PathBuf;

/// Errors reading or writing the local config file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Cannot determine a config directory for this user")]
    NoConfigDir,

    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("API token must not be empty")]
    EmptyToken,

    #[error("No API token configured")]
    MissingToken,
}

/// Errors talking to the parsing service or handling its results.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service error: {message} (code: {code})")]
    Service { code: String, message: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// Only connectivity failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            ApiError::Network(e.to_string())
        } else if e.is_decode() {
            ApiError::InvalidResponse(e.to_string())
        } else {
            ApiError::Service {
                code: e
                    .status()
                    .map(|s| s.as_u16().to_string())
                    .unwrap_or_else(|| "http".into()),
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(ApiError::Network("reset".into()).is_retryable());
        assert!(!ApiError::Auth("expired".into()).is_retryable());
        assert!(!ApiError::Service {
            code: "-500".into(),
            message: "boom".into()
        }
        .is_retryable());
        assert!(!ApiError::Download("truncated".into()).is_retryable());
    }

    #[test]
    fn service_error_message_carries_code() {
        let err = ApiError::Service {
            code: "-60012".into(),
            message: "task not found".into(),
        };
        assert_eq!(err.to_string(), "Service error: task not found (code: -60012)");
    }
}
