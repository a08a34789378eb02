//! Error types for the provider core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use inpage_provider::{Request, Result};
//!
//! async fn example(provider: &Provider) -> Result<()> {
//!     let chain_id = provider.call(Request::new("eth_chainId", None)).await?;
//!     println!("{chain_id}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Caller | [`Error::InvalidRequest`], [`Error::UnsupportedSyncMethod`] |
//! | Remote | [`Error::Rpc`], [`Error::Protocol`] |
//! | Connection | [`Error::Disconnected`], [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::RequestTimeout`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;
use crate::protocol::RpcError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Codes
// ============================================================================

/// JSON-RPC: the request object is not valid.
pub const INVALID_REQUEST: i64 = -32600;

/// JSON-RPC: internal error.
pub const INTERNAL_ERROR: i64 = -32603;

/// EIP-1193: the requested method is not supported.
pub const UNSUPPORTED_METHOD: i64 = 4200;

/// EIP-1193: the provider is disconnected from all chains.
pub const DISCONNECTED: i64 = 4900;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when provider configuration or channel setup is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// Malformed call.
    ///
    /// Returned before anything is written to the wire.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the shape violation.
        message: String,
    },

    /// Method invoked synchronously that cannot be answered from local state.
    #[error("Synchronous method not supported: {method}")]
    UnsupportedSyncMethod {
        /// The rejected method.
        method: String,
    },

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// Error object carried by a response, or a normalized transport failure.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The provider lost its connection to the backend.
    ///
    /// Terminal for the provider instance.
    #[error("Provider disconnected")]
    Disconnected,

    /// The underlying duplex failed with a cause.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The underlying duplex closed while writing or reading.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A request did not receive a response within the configured timeout.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The wire id of the request that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    #[inline]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an unsupported synchronous method error.
    #[inline]
    pub fn unsupported_sync_method(method: impl Into<String>) -> Self {
        Self::UnsupportedSyncMethod {
            method: method.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error means the backend connection is gone.
    #[inline]
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected
            | Self::Connection { .. }
            | Self::ConnectionClosed
            | Self::WebSocket(_) => true,
            Self::Rpc(err) => err.code == DISCONNECTED,
            _ => false,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this error was caused by the caller's input.
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. } | Self::UnsupportedSyncMethod { .. }
        )
    }
}

// ============================================================================
// Canonical Shape
// ============================================================================

impl Error {
    /// Maps this error onto the canonical `{code, message, data?}` shape.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Rpc(err) => err.clone(),
            Self::InvalidRequest { message } => RpcError::new(INVALID_REQUEST, message.clone()),
            Self::UnsupportedSyncMethod { .. } => {
                RpcError::new(UNSUPPORTED_METHOD, self.to_string())
            }
            Self::Disconnected
            | Self::Connection { .. }
            | Self::ConnectionClosed
            | Self::WebSocket(_) => RpcError::new(DISCONNECTED, "Provider disconnected"),
            _ => RpcError::new(INTERNAL_ERROR, self.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
