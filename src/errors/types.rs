//! Error type definitions for the EnergyMe sync engine
//!
//! This module defines all error types used throughout the engine, split the
//! same way failures are handled: device/transport failures that a poll run
//! reports to its coordinator, and application-level failures raised while
//! configuring or starting the engine.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Device transport and protocol errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A coordinator could not complete its first refresh
    #[error("Coordinator '{coordinator}' not ready: {source}")]
    NotReady {
        coordinator: String,
        #[source]
        source: DeviceError,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Filesystem errors (config file handling)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the device
///
/// Every variant carries the endpoint path so a log line alone identifies which
/// sub-fetch of a pipeline failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Request exceeded the configured timeout
    #[error("Timeout requesting {endpoint}")]
    Timeout { endpoint: String },

    /// Connection refused, DNS failure, host unreachable
    #[error("Device unreachable at {endpoint}: {message}")]
    Unreachable { endpoint: String, message: String },

    /// HTTP 401 after the digest challenge, credentials must be re-entered
    #[error("Authentication failed for {endpoint}")]
    AuthenticationFailed { endpoint: String },

    /// Any other non-success HTTP status
    #[error("HTTP {status} from {endpoint}")]
    Protocol { endpoint: String, status: u16 },

    /// Response body present but not valid JSON
    #[error("Malformed payload from {endpoint}: {message}")]
    MalformedPayload { endpoint: String, message: String },

    /// Anything else
    #[error("Unexpected error requesting {endpoint}: {message}")]
    Unexpected { endpoint: String, message: String },
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not-ready error for a coordinator
    pub fn not_ready<S: Into<String>>(coordinator: S, source: DeviceError) -> Self {
        Self::NotReady {
            coordinator: coordinator.into(),
            source,
        }
    }

    /// True when the underlying cause requires credential re-entry
    pub fn requires_reauth(&self) -> bool {
        match self {
            Self::Device(e) | Self::NotReady { source: e, .. } => e.is_auth_failure(),
            _ => false,
        }
    }
}

impl DeviceError {
    pub fn timeout<E: Into<String>>(endpoint: E) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
        }
    }

    pub fn unreachable<E: Into<String>, M: Into<String>>(endpoint: E, message: M) -> Self {
        Self::Unreachable {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn auth_failed<E: Into<String>>(endpoint: E) -> Self {
        Self::AuthenticationFailed {
            endpoint: endpoint.into(),
        }
    }

    pub fn protocol<E: Into<String>>(endpoint: E, status: u16) -> Self {
        Self::Protocol {
            endpoint: endpoint.into(),
            status,
        }
    }

    pub fn malformed<E: Into<String>, M: Into<String>>(endpoint: E, message: M) -> Self {
        Self::MalformedPayload {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn unexpected<E: Into<String>, M: Into<String>>(endpoint: E, message: M) -> Self {
        Self::Unexpected {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Build the error for a non-success HTTP status, 401 is always an auth failure
    pub fn from_status<E: Into<String>>(endpoint: E, status: u16) -> Self {
        if status == 401 {
            Self::auth_failed(endpoint)
        } else {
            Self::protocol(endpoint, status)
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Whether this error aborts a pipeline run wherever it occurs.
    ///
    /// Malformed payloads degrade per item on endpoints that supply per-item
    /// values, and fail the run on endpoints the run cannot do without.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedPayload { .. })
    }

    /// Short machine-readable classification used in status reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unreachable { .. } => "unreachable",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::Protocol { .. } => "protocol_error",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::Unexpected { .. } => "unexpected_error",
        }
    }
}
