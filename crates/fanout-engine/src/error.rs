//! Error types for individual delivery attempts.
//!
//! Categorizes transport-level failures for retry decisions. These errors
//! never reach the caller of `trigger_event`; they are absorbed into the
//! delivery record's state and surfaced through queries and metrics.

use std::fmt;

use fanout_core::models::RetryPolicy;
use thiserror::Error;

/// Failure modes of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network error: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// The endpoint's configured timeout elapsed before a response.
    #[error("request timed out after {seconds}s")]
    Timeout {
        /// Seconds before the request was aborted.
        seconds: u64,
    },

    /// The endpoint responded with a non-2xx status.
    #[error("endpoint returned HTTP {status}")]
    HttpStatus {
        /// HTTP status code from the endpoint.
        status: u16,
    },

    /// Payload signing failed; fatal for this delivery.
    #[error("signature generation failed: {message}")]
    Signature {
        /// Description of the signing failure.
        message: String,
    },

    /// The endpoint configuration could not be turned into a request.
    #[error("invalid endpoint configuration: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Creates a status error from a non-2xx response.
    pub fn http_status(status: u16) -> Self {
        Self::HttpStatus { status }
    }

    /// Creates a signature error.
    pub fn signature(message: impl Into<String>) -> Self {
        Self::Signature { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// The HTTP status carried by this error, when it has one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether this failure should be retried under the given policy.
    ///
    /// Network failures and timeouts are always retryable. Status errors
    /// consult the policy's retryable set when configured, otherwise 5xx
    /// and 429 are retryable and other 4xx are not. Signature and
    /// configuration failures are deterministic and never retried.
    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status } => match &policy.retryable_statuses {
                Some(statuses) => statuses.contains(status),
                None => *status == 429 || (500..600).contains(status),
            },
            Self::Signature { .. } | Self::Configuration { .. } => false,
        }
    }
}

/// Coarse failure category for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity or timeout failure.
    Network,
    /// HTTP 4xx response.
    Client,
    /// HTTP 5xx response.
    Server,
    /// Signing failure.
    Signature,
    /// Configuration problem.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Network { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::HttpStatus { status } if (400..500).contains(status) => Self::Client,
            DeliveryError::HttpStatus { .. } => Self::Server,
            DeliveryError::Signature { .. } => Self::Signature,
            DeliveryError::Configuration { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Signature => write!(f, "signature"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn default_policy_retries_server_errors_only() {
        let policy = RetryPolicy::default();

        assert!(DeliveryError::network("connection refused").is_retryable(&policy));
        assert!(DeliveryError::timeout(30).is_retryable(&policy));
        assert!(DeliveryError::http_status(500).is_retryable(&policy));
        assert!(DeliveryError::http_status(503).is_retryable(&policy));
        assert!(DeliveryError::http_status(429).is_retryable(&policy));

        assert!(!DeliveryError::http_status(404).is_retryable(&policy));
        assert!(!DeliveryError::http_status(400).is_retryable(&policy));
        assert!(!DeliveryError::signature("bad key").is_retryable(&policy));
        assert!(!DeliveryError::configuration("bad url").is_retryable(&policy));
    }

    #[test]
    fn retryable_status_set_overrides_defaults() {
        let policy = RetryPolicy {
            retryable_statuses: Some(HashSet::from([404, 500])),
            ..RetryPolicy::default()
        };

        assert!(DeliveryError::http_status(404).is_retryable(&policy));
        assert!(DeliveryError::http_status(500).is_retryable(&policy));
        assert!(!DeliveryError::http_status(502).is_retryable(&policy));
        // Transport failures ignore the status set entirely.
        assert!(DeliveryError::timeout(5).is_retryable(&policy));
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("x")), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from(&DeliveryError::timeout(1)), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from(&DeliveryError::http_status(404)), ErrorCategory::Client);
        assert_eq!(ErrorCategory::from(&DeliveryError::http_status(500)), ErrorCategory::Server);
        assert_eq!(ErrorCategory::from(&DeliveryError::signature("x")), ErrorCategory::Signature);
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timed out after 30s");
        assert_eq!(DeliveryError::http_status(502).to_string(), "endpoint returned HTTP 502");
    }
}
