use serde::Deserialize;
use thiserror::Error;

/// Classified backend failures. Every error leaving the backend client is one
/// of these; raw transport errors never cross this boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Preconditions unmet (dependency not accepted, revision budget spent,
    /// report in the wrong phase). Never retried; no state was mutated.
    #[error("request rejected: {message}")]
    Validation { message: String },

    /// Someone or something else is already handling this (duplicate generate,
    /// finalize while finalizing). Resynchronize and show current truth.
    #[error("already in progress: {message}")]
    Conflict { message: String },

    /// The report does not exist for this session. A valid observation on
    /// `get_state`, an error on every command.
    #[error("no report exists for session {session_id}")]
    NotFound { session_id: String },

    /// The backend cannot produce this artifact format.
    #[error("export format '{format}' is not supported by the backend")]
    UnsupportedFormat { format: String },

    /// Any other backend-declared HTTP failure.
    #[error("backend returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// Network-level failure; the request may never have reached the backend.
    #[error("transport failure: {message}")]
    Transport { message: String },
}

/// Error payload the backend attaches to non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl BackendError {
    /// Map an HTTP status plus parsed error body onto the taxonomy.
    pub fn classify(session_id: &str, status: u16, body: ErrorBody) -> Self {
        let message = if body.error.is_empty() {
            format!("HTTP {status}")
        } else {
            body.error
        };
        match status {
            404 => BackendError::NotFound {
                session_id: session_id.to_string(),
            },
            409 => BackendError::Conflict { message },
            400 | 422 => match body.code.as_deref() {
                Some("unsupported_format") => BackendError::UnsupportedFormat { format: message },
                _ => BackendError::Validation { message },
            },
            _ => BackendError::Api { status, message },
        }
    }

    /// Transient failures are logged and swallowed by the polling loop once
    /// a first successful sync has happened.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Transport { .. } | BackendError::Api { status: 500..=599, .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Conflict { .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport {
            message: err.to_string(),
        }
    }
}
