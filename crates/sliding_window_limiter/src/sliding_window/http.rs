// src/sliding_window/http.rs
use crate::Error as CrateError; // Crate-level error type
use snafu::Snafu;

/// A generic error enumeration for HTTP transport issues.
///
/// These cover failures *before* a response was obtained. A response with a non-2xx
/// status is not an `HttpError`; interpreting the status is left to the API client
/// that owns the endpoint.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    /// An error occurred during the transport of the request (e.g., network issue, DNS).
    #[snafu(display("HTTP transport error: {}", source))]
    Transport { source: CrateError },

    /// The request itself was malformed or invalid before sending.
    #[snafu(display("Invalid HTTP request: {}", details))]
    InvalidRequest { details: String },

    /// A timeout occurred.
    #[snafu(display("HTTP request timed out"))]
    Timeout,

    /// Other, unspecified HTTP client errors (e.g. the body could not be read).
    #[snafu(display("Generic HTTP client error: {}", source))]
    ClientError { source: CrateError },
}

impl HttpError {
    /// Whether the failure happened on the wire (connection, timeout, body read)
    /// rather than while preparing the request.
    pub const fn is_network(&self) -> bool {
        matches!(
            self,
            HttpError::Transport { .. } | HttpError::Timeout | HttpError::ClientError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_classification() {
        assert!(HttpError::Timeout.is_network());
        assert!(
            HttpError::Transport {
                source: "connection refused".into()
            }
            .is_network()
        );
        assert!(
            !HttpError::InvalidRequest {
                details: "bad url".to_string()
            }
            .is_network()
        );
    }
}
