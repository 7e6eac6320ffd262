//! Error types shared across the engine.
//!
//! Each component owns one enum; the orchestrator folds item-scoped errors
//! into failed summary records and only surfaces [`SyncError`] for the
//! conditions that must stop a course pass.

use thiserror::Error;

/// Failure of a single remote exchange, after classification.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The remote answered with a non-success status.
    #[error("remote returned status {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    /// Connection could not be established or was reset mid-exchange.
    #[error("connection error for {url}: {message}")]
    Connection { url: String, message: String },

    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The response body did not have the expected shape.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Local I/O while streaming a body to disk.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Building the client or request failed before anything was sent.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl TransportError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 429, 5xx, connection resets and timeouts are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            TransportError::Connection { .. } | TransportError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// 401/403: the credentials were refused.
    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let url = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if e.is_timeout() {
            TransportError::Timeout { url }
        } else if e.is_connect() || e.is_request() || e.is_body() {
            TransportError::Connection {
                url,
                message: e.to_string(),
            }
        } else if e.is_decode() {
            TransportError::Decode {
                url,
                message: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            TransportError::Status {
                status: status.as_u16(),
                url,
                message: e.to_string(),
            }
        } else {
            TransportError::Invalid(e.to_string())
        }
    }
}

/// Storage backend failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The storage API rejected a call.
    #[error("storage API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to parse storage response: {0}")]
    Parse(String),

    /// A resumable upload ended in an unexpected state.
    #[error("upload of '{filename}' failed: {message}")]
    Upload { filename: String, message: String },
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Rendering failures. Body-level failures never escape the renderer (they
/// trigger the plain-text fallback); these cover document assembly.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("markup nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    #[error("document '{0}' has no content to lay out")]
    Empty(String),

    #[error("failed to encode manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Conditions that abort a course pass.
#[derive(Error, Debug)]
pub enum SyncError {
    /// 401/403 on the session-establishing course call.
    #[error("authentication refused by remote: {0}")]
    Auth(#[source] TransportError),

    #[error("remote unavailable: {0}")]
    Remote(#[source] TransportError),

    /// The course's own destination folder could not be provisioned.
    #[error("could not provision destination folder '{folder}': {source}")]
    Destination {
        folder: String,
        #[source]
        source: StorageError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            url: "https://lms.example/api/v1/courses".into(),
            message: String::new(),
        }
    }

    #[test]
    fn classifies_transient_statuses() {
        assert!(status(429).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
        assert!(TransportError::Timeout { url: "x".into() }.is_transient());
    }

    #[test]
    fn classifies_auth_statuses() {
        assert!(status(401).is_auth());
        assert!(status(403).is_auth());
        assert!(!status(404).is_auth());
        assert!(!TransportError::Invalid("bad".into()).is_auth());
    }

    #[test]
    fn error_display_names_the_url() {
        assert_eq!(
            status(404).to_string(),
            "remote returned status 404 for https://lms.example/api/v1/courses: "
        );
    }
}
