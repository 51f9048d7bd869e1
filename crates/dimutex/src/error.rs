//! Error types and result aliases for dimutex.
//!
//! Lock conflicts are modeled as distinct variants so callers can tell a held
//! lock apart from a failing store without inspecting status codes.

use http::StatusCode;

/// The result type used throughout dimutex.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lock operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The lock is held by a live lease, or a concurrent reclaim won the race.
    #[error("lock already acquired: gs://{bucket}/{key}")]
    AlreadyAcquired {
        /// Bucket holding the lock object.
        bucket: String,
        /// Lock object key.
        key: String,
    },

    /// Release or refresh was called while no lock record exists.
    #[error("lock already released: gs://{bucket}/{key}")]
    AlreadyReleased {
        /// Bucket holding the lock object.
        bucket: String,
        /// Lock object key.
        key: String,
    },

    /// The store answered with an unexpected status, or the request itself failed.
    #[error("{}", transport_message(*status, body))]
    Transport {
        /// Response status, absent when no response was received.
        status: Option<StatusCode>,
        /// Response body, or a description of the request failure.
        body: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A successful response carried a body that could not be decoded.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the malformed response.
        message: String,
    },

    /// A lock handle was closed without ever attempting acquisition.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// Configuration is missing or invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// The authenticator could not produce a credential.
    #[error("authentication error: {message}")]
    Auth {
        /// Description of the authentication failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn transport_message(status: Option<StatusCode>, body: &str) -> String {
    match status {
        Some(status) => format!("transport error ({status}): {body}"),
        None => format!("transport error: {body}"),
    }
}

impl Error {
    /// Creates a transport error for an unexpected response status.
    #[must_use]
    pub fn unexpected_status(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            body: body.into(),
            source: None,
        }
    }

    /// Creates a transport error for a request that produced no response.
    #[must_use]
    pub fn request_failed(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            status: None,
            body: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a lock held by someone else.
    #[must_use]
    pub fn is_already_acquired(&self) -> bool {
        matches!(self, Self::AlreadyAcquired { .. })
    }

    /// Returns true if this error reports a lock that no longer exists.
    #[must_use]
    pub fn is_already_released(&self) -> bool {
        matches!(self, Self::AlreadyReleased { .. })
    }

    /// Returns the response status for transport errors that carried one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_includes_status_and_body() {
        let err = Error::unexpected_status(StatusCode::FORBIDDEN, "denied");
        assert_eq!(err.to_string(), "transport error (403 Forbidden): denied");
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn request_failure_has_no_status() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = Error::request_failed("request timed out", io);
        assert_eq!(err.status(), None);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn predicates_match_variants() {
        let acquired = Error::AlreadyAcquired {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert!(acquired.is_already_acquired());
        assert!(!acquired.is_already_released());
        assert_eq!(acquired.to_string(), "lock already acquired: gs://b/k");
    }
}
