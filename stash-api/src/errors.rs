//! Error type for every Rest Client operation.
//!
//! The client surfaces the four failure kinds of a REST call, plus a worker
//! failure that only occurs on panic or runtime shutdown. None of them is
//! retried internally: callers decide whether to give up for this poll cycle.

use std::time::Duration;

use thiserror::Error;

/// Convenient alias for client results.
pub type StashApiResult<T> = Result<T, StashApiError>;

/// Failure of a single REST call against the review server.
#[derive(Debug, Error)]
pub enum StashApiError {
    /// The call did not finish within the request deadline; the in-flight
    /// request was aborted.
    #[error("request to {url} did not complete within {after:?}")]
    Timeout { url: String, after: Duration },

    /// I/O, TLS, DNS or connection failure (including connect/read timeouts
    /// enforced by the transport itself).
    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request worker panicked or was cancelled by runtime shutdown
    /// before the deadline.
    #[error("request worker for {url} ended abnormally: {source}")]
    Worker {
        url: String,
        #[source]
        source: tokio::task::JoinError,
    },

    /// The server answered with a status code outside the success allow-list.
    #[error("unexpected HTTP status {status} ({reason}) from {url}")]
    Protocol {
        status: u16,
        reason: String,
        url: String,
    },

    /// The response body was malformed or had an unexpected shape.
    #[error("cannot parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StashApiError {
    /// HTTP status carried by a [`StashApiError::Protocol`] failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
