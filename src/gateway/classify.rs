//! Failure classification for model backend errors.

use std::fmt;
use thiserror::Error;

/// What went wrong on a single backend attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// The provider throttled the request (HTTP 429 or equivalent).
    RateLimited,
    /// The connection failed or was reset.
    Connection,
    /// Server-side failure with the given status (5xx or equivalent).
    Server(u16),
    /// The attempt exceeded its timeout.
    Timeout,
    /// The request was malformed (4xx other than auth or throttling).
    BadRequest,
    /// Credentials were rejected.
    Unauthorized,
}

impl BackendErrorKind {
    /// Maps an HTTP-style status code onto a kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::gateway::BackendErrorKind;
    ///
    /// assert_eq!(BackendErrorKind::from_status(429), BackendErrorKind::RateLimited);
    /// assert_eq!(BackendErrorKind::from_status(503), BackendErrorKind::Server(503));
    /// assert_eq!(BackendErrorKind::from_status(401), BackendErrorKind::Unauthorized);
    /// assert_eq!(BackendErrorKind::from_status(422), BackendErrorKind::BadRequest);
    /// ```
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            401 | 403 => Self::Unauthorized,
            408 => Self::Timeout,
            500..=599 => Self::Server(status),
            _ => Self::BadRequest,
        }
    }

    /// The retry class of this kind.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited | Self::Connection | Self::Server(_) | Self::Timeout => {
                FailureClass::Transient
            },
            Self::BadRequest | Self::Unauthorized => FailureClass::NonRecoverable,
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::Connection => write!(f, "connection failure"),
            Self::Server(status) => write!(f, "server error {status}"),
            Self::Timeout => write!(f, "timed out"),
            Self::BadRequest => write!(f, "bad request"),
            Self::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retried with backoff until attempts run out.
    Transient,
    /// Surfaced immediately.
    NonRecoverable,
}

/// A failure reported by a [`ModelBackend`](super::ModelBackend).
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::gateway::{BackendError, FailureClass};
///
/// let err = BackendError::server(502, "bad gateway");
/// assert_eq!(err.class(), FailureClass::Transient);
/// assert_eq!(err.to_string(), "server error 502: bad gateway");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// Failure kind.
    pub kind: BackendErrorKind,
    /// Provider message.
    pub message: String,
}

impl BackendError {
    /// Creates an error of the given kind.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Rate-limit failure.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::RateLimited, message)
    }

    /// Connection failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connection, message)
    }

    /// Server-side failure.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Server(status), message)
    }

    /// Malformed request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::BadRequest, message)
    }

    /// Authentication failure.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unauthorized, message)
    }

    /// The retry class of this error.
    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        for kind in [
            BackendErrorKind::RateLimited,
            BackendErrorKind::Connection,
            BackendErrorKind::Server(500),
            BackendErrorKind::Timeout,
        ] {
            assert_eq!(kind.class(), FailureClass::Transient, "{kind}");
        }
    }

    #[test]
    fn non_recoverable_kinds() {
        assert_eq!(
            BackendErrorKind::BadRequest.class(),
            FailureClass::NonRecoverable
        );
        assert_eq!(
            BackendErrorKind::Unauthorized.class(),
            FailureClass::NonRecoverable
        );
        assert_eq!(
            BackendErrorKind::from_status(403).class(),
            FailureClass::NonRecoverable
        );
    }
}
