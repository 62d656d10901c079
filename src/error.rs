//! Error taxonomy for the funnel.
//!
//! Every failure a pipeline stage can observe is one of these variants.
//! The variant decides what the caller does with it:
//!
//! | Variant | Retried | Caller behavior |
//! |---------|---------|-----------------|
//! | [`TransientRemote`](FunnelError::TransientRemote) | yes | degrade to a stage-local skip once retries run out |
//! | [`RemoteRejected`](FunnelError::RemoteRejected) | no | stage-local skip |
//! | [`MalformedResponse`](FunnelError::MalformedResponse) | no | zero / empty default |
//! | [`DuplicateConflict`](FunnelError::DuplicateConflict) | no | swallowed as a no-op |
//! | [`Configuration`](FunnelError::Configuration) | no | fatal at startup |
//! | [`Store`](FunnelError::Store) | no | stage-local skip |

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FunnelError>;

#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("transient failure calling {service}: {message}")]
    TransientRemote { service: String, message: String },

    #[error("{service} rejected the request (status {status}): {message}")]
    RemoteRejected {
        service: String,
        status: u16,
        message: String,
    },

    #[error("malformed response from {service}: {message}")]
    MalformedResponse { service: String, message: String },

    #[error("duplicate {entity}: {key}")]
    DuplicateConflict { entity: &'static str, key: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(String),
}

impl FunnelError {
    pub fn transient(service: impl Into<String>, message: impl ToString) -> Self {
        Self::TransientRemote {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(service: impl Into<String>, message: impl ToString) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRemote { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateConflict { .. })
    }

    /// Classify a `reqwest` failure for `service`.
    ///
    /// Timeouts, connection failures, 429 and 5xx responses are transient;
    /// body decode failures are malformed responses; anything else is a
    /// non-retryable rejection.
    pub fn from_http(service: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::malformed(service, err);
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                Self::transient(service, err)
            }
            Some(status) => Self::RemoteRejected {
                service: service.to_string(),
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::transient(service, err),
        }
    }

    /// Classify an HTTP status that came back without a transport error.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            Self::transient(service, format!("HTTP {}: {}", status, body))
        } else {
            Self::RemoteRejected {
                service: service.to_string(),
                status: status.as_u16(),
                message: body,
            }
        }
    }
}

impl From<sqlx::Error> for FunnelError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::DuplicateConflict {
                entity: "row",
                key: db.message().to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::transient("store", err.to_string())
            }
            sqlx::Error::Database(db) if db.message().contains("database is locked") => {
                Self::transient("store", err.to_string())
            }
            _ => Self::Store(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for FunnelError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed("json", err)
    }
}
