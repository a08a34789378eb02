//! Message types carried over the connection.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Channel | Purpose |
//! |---------|-----------|---------|---------|
//! | [`MuxFrame`] | both | all | Tags a payload with its logical channel |
//! | [`Request`] | Local → Remote | `provider` | JSON-RPC call |
//! | [`Response`] | Remote → Local | `provider` | Result or [`RpcError`] |
//! | notification | Remote → Local | `provider` | `{method, params}` without a pending id |
//! | snapshot | Remote → Local | `publicConfig` | Pushed public state |
//!
//! Batches are arrays of requests (or responses) sent as one frame.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Multiplexer framing and inbound classification |
//! | `message` | JSON-RPC request/response types |

// ============================================================================
// Submodules
// ============================================================================

/// Multiplexer framing and inbound classification.
pub mod frame;

/// JSON-RPC request and response types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Inbound, MuxFrame, notification_parts};
pub use message::{Call, JSONRPC_VERSION, Reply, Request, Response, RpcError};
