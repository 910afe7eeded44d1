//! Error model for the `cloudstack` crate.

use std::time::Duration;

use thiserror::Error;

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed lower-level error kept as the source of a network failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// High-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid client configuration (empty keys, bad base URL).
    Config,
    /// Transport-level failure (connect, DNS, TLS, body read).
    Network,
    /// A single HTTP request exceeded its timeout.
    Timeout,
    /// Unexpected or malformed response shape.
    Protocol,
    /// The platform rejected the request.
    Api,
    /// An async job did not reach a terminal state before the deadline.
    JobTimeout,
    /// Polling an async job gave up.
    Aborted,
    /// The caller cancelled the wait.
    Cancelled,
}

/// Structured error type.
///
/// `Display` never contains credentials, signatures or request URLs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The client could not be built from the supplied settings.
    #[error("invalid client configuration: {message}")]
    Config {
        /// Human readable message.
        message: String,
    },

    /// The request never produced a complete HTTP response.
    #[error("network error: {message}")]
    Network {
        /// Human readable message.
        message: String,
        /// Lower-level error, when one exists.
        #[source]
        source: Option<BoxError>,
    },

    /// The HTTP request did not complete within its timeout.
    #[error("request timed out after {timeout:?}")]
    Timeout {
        /// Timeout value.
        timeout: Duration,
    },

    /// The platform answered with something that is not a valid envelope.
    #[error("protocol error: {message}")]
    Protocol {
        /// Human readable message.
        message: String,
    },

    /// The platform returned an error object, or an async job failed.
    #[error("{command} failed ({code}): {message}")]
    Api {
        /// Command name.
        command: String,
        /// Error code (`errorcode`, or the HTTP status when no body was present).
        code: i64,
        /// Internal platform error code (`cserrorcode`), when supplied.
        cs_error_code: Option<i64>,
        /// Error text.
        message: String,
        /// Job id, when the failure was reported by an async job.
        job_id: Option<String>,
    },

    /// An async job was still pending when the deadline elapsed.
    ///
    /// The job keeps running server-side; it can be re-attached to with
    /// [`crate::Client::await_job`].
    #[error("async job {job_id} still pending after {waited:?}")]
    JobTimeout {
        /// Job id to re-poll with.
        job_id: String,
        /// How long the client waited.
        waited: Duration,
    },

    /// Polling an async job failed for good.
    #[error("polling async job {job_id} aborted: {cause}")]
    Aborted {
        /// Job id.
        job_id: String,
        /// The failure that ended polling.
        #[source]
        cause: Box<Error>,
    },

    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,
}

impl Error {
    /// Returns a coarse error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Api { .. } => ErrorKind::Api,
            Self::JobTimeout { .. } => ErrorKind::JobTimeout,
            Self::Aborted { .. } => ErrorKind::Aborted,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error is a transient transport failure.
    ///
    /// Only these are retried by the job poller. API errors are semantic
    /// ("resource not found") and protocol errors indicate a contract break,
    /// so neither is ever retried by the crate.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Timeout)
    }

    /// The platform error code, for [`ErrorKind::Api`] errors.
    #[must_use]
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The job id this error refers to, if any.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Api { job_id, .. } => job_id.as_deref(),
            Self::JobTimeout { job_id, .. } | Self::Aborted { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn network(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::Network {
            message: message.into(),
            source,
        }
    }

    pub(crate) fn api(
        command: impl Into<String>,
        code: i64,
        cs_error_code: Option<i64>,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            command: command.into(),
            code,
            cs_error_code,
            message: message.into(),
            job_id: None,
        }
    }
}
