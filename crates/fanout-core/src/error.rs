//! Error types and result handling for engine operations.
//!
//! Defines the synchronous error taxonomy returned directly to callers of
//! the engine's API. Delivery-time transport failures are never raised
//! through these types; they are absorbed into delivery records and
//! surfaced through queries, metrics, and notifications.

use thiserror::Error;

use crate::models::{DeliveryId, EndpointId};

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned synchronously by engine operations.
///
/// All of these fail fast with no partial mutation of engine state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// An endpoint with this identifier is already registered.
    #[error("endpoint already registered: {id}")]
    DuplicateEndpoint {
        /// Identifier that collided at registration time.
        id: EndpointId,
    },

    /// No endpoint with this identifier exists.
    #[error("endpoint not found: {id}")]
    EndpointNotFound {
        /// The missing endpoint identifier.
        id: EndpointId,
    },

    /// No delivery with this identifier exists.
    #[error("delivery not found: {id}")]
    DeliveryNotFound {
        /// The missing delivery identifier.
        id: DeliveryId,
    },

    /// An import document did not have the expected shape.
    #[error("invalid import format: {reason}")]
    InvalidImportFormat {
        /// What was wrong with the document.
        reason: String,
    },

    /// A caller-supplied value failed validation.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Validation failure description.
        message: String,
    },
}

impl EngineError {
    /// Creates a duplicate-endpoint error.
    pub fn duplicate_endpoint(id: EndpointId) -> Self {
        Self::DuplicateEndpoint { id }
    }

    /// Creates an endpoint-not-found error.
    pub fn endpoint_not_found(id: EndpointId) -> Self {
        Self::EndpointNotFound { id }
    }

    /// Creates a delivery-not-found error.
    pub fn delivery_not_found(id: DeliveryId) -> Self {
        Self::DeliveryNotFound { id }
    }

    /// Creates an invalid-import-format error.
    pub fn invalid_import(reason: impl Into<String>) -> Self {
        Self::InvalidImportFormat { reason: reason.into() }
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }
}
