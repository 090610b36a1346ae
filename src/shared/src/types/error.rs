//! Error taxonomy for backend service calls
//!
//! Leaf clients translate transport failures and HTTP statuses into one of
//! these variants. The web layer only ever sees `ApiError`; the original kind
//! is preserved so it can decide between a message, a 404 or a login redirect.

use serde::Serialize;
use thiserror::Error;

/// Result alias used across the aggregation layer
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors produced while talking to backend services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Field not present on a wrapped payload
    #[error("Missing attribute '{attr}' on {kind}")]
    MissingAttribute { kind: String, attr: String },

    /// Transport failure or 5xx from a service
    #[error("Service unavailable: {service} - {message}")]
    BackendUnavailable {
        service: String,
        status: Option<u16>,
        message: String,
    },

    /// Identity rejected the token
    #[error("Not authorized: {reason}")]
    NotAuthorized { reason: String },

    /// Addressed resource absent
    #[error("Not found: {service} - {resource}")]
    NotFound { service: String, resource: String },

    /// Precondition violated on the backend
    #[error("Conflict: {service} - {message}")]
    Conflict { service: String, message: String },

    /// Deadline exceeded or caller cancellation
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// Request rejected by the backend as malformed
    #[error("Bad request: {service} - {message}")]
    BadRequest { service: String, message: String },

    /// Service type absent from the catalog
    #[error("No endpoint for service '{service}' in the service catalog")]
    EndpointNotFound { service: String },

    /// Controlled redirect raised by a leaf operation
    #[error("Redirect to {location}: {message}")]
    Redirect { location: String, message: String },

    /// Invalid local configuration (CA bundle, endpoint URL, ...)
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Coarse classification the error handler dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The UI can continue with an empty or default value
    Recoverable,
    /// The token was rejected; the user must log in again
    NotAuthorized,
    /// Translates to an HTTP 404
    NotFound,
    /// Translates to a controlled redirect
    Redirect,
    /// Programming or configuration error; always propagated
    Fatal,
}

impl ApiError {
    /// Build a `MissingAttribute` error
    pub fn missing(kind: impl Into<String>, attr: impl Into<String>) -> Self {
        ApiError::MissingAttribute {
            kind: kind.into(),
            attr: attr.into(),
        }
    }

    /// Build a `BackendUnavailable` error without an HTTP status
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::BackendUnavailable {
            service: service.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Build a `NotFound` error
    pub fn not_found(service: impl Into<String>, resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            service: service.into(),
            resource: resource.into(),
        }
    }

    /// Build a `Cancelled` error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        ApiError::Cancelled {
            reason: reason.into(),
        }
    }

    /// Classify the error for the handler
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BackendUnavailable { .. }
            | ApiError::Conflict { .. }
            | ApiError::Cancelled { .. }
            | ApiError::BadRequest { .. } => ErrorKind::Recoverable,
            ApiError::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::Redirect { .. } => ErrorKind::Redirect,
            ApiError::MissingAttribute { .. }
            | ApiError::EndpointNotFound { .. }
            | ApiError::Configuration { .. } => ErrorKind::Fatal,
        }
    }

    /// Whether the error may be swallowed by an aggregator
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Recoverable
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotAuthorized { .. } => 401,
            ApiError::NotFound { .. } => 404,
            ApiError::Conflict { .. } => 409,
            ApiError::BadRequest { .. } => 400,
            ApiError::Redirect { .. } => 302,
            ApiError::Cancelled { .. } => 504,
            ApiError::BackendUnavailable { .. } => 503,
            _ => 500,
        }
    }

    /// Short message suitable for a user-facing notification.
    ///
    /// The strings are message-catalog keys in their default language; the
    /// web layer owns translation.
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::MissingAttribute { .. } => "Unable to read resource details.",
            ApiError::BackendUnavailable { .. } => "The service is currently unavailable.",
            ApiError::NotAuthorized { .. } => "Your session has expired. Please log in again.",
            ApiError::NotFound { .. } => "The requested resource could not be found.",
            ApiError::Conflict { .. } => "The request conflicts with the current resource state.",
            ApiError::Cancelled { .. } => "The request took too long and was cancelled.",
            ApiError::BadRequest { .. } => "The request was rejected by the service.",
            ApiError::EndpointNotFound { .. } => "The service is not available in this region.",
            ApiError::Redirect { .. } => "Redirecting.",
            ApiError::Configuration { .. } => "The dashboard is misconfigured.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ApiError::unavailable("compute", "boom").kind(),
            ErrorKind::Recoverable
        );
        assert_eq!(
            ApiError::cancelled("deadline").kind(),
            ErrorKind::Recoverable
        );
        assert_eq!(
            ApiError::NotAuthorized {
                reason: "expired".to_string()
            }
            .kind(),
            ErrorKind::NotAuthorized
        );
        assert_eq!(
            ApiError::not_found("image", "img-1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ApiError::missing("Server", "flavor").kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::not_found("volume", "v1").status_code(), 404);
        assert_eq!(
            ApiError::NotAuthorized {
                reason: "bad token".to_string()
            }
            .status_code(),
            401
        );
        assert_eq!(
            ApiError::EndpointNotFound {
                service: "metering".to_string()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_user_message_is_short() {
        let err = ApiError::unavailable("network", "connection refused: 10.0.0.1:9696");
        assert!(!err.user_message().contains("10.0.0.1"));
    }
}
