//! Transport layer: the duplex boundary, channel multiplexing and JSON-RPC
//! correlation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Provider                                    │
//! │   ├─ RpcTransport ◄── Channel "provider"     │
//! │   └─ PublicStateStore ◄── Channel "publicConfig"
//! │                 ▲                            │
//! │            Multiplexer  ("phishing" ignored) │
//! └─────────────────┬────────────────────────────┘
//!                   │ one Duplex (JSON frames)
//!                   ▼
//!               backend
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `memory` | In-process duplex pair |
//! | `mux` | Channel multiplexer and event loop |
//! | `rpc` | Request/response correlation over one channel |
//! | `websocket` | Duplex adapter over a WebSocket stream |

// ============================================================================
// Imports
// ============================================================================

use futures_util::{Sink, Stream};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// In-process duplex pair.
pub mod memory;

/// Channel multiplexer.
pub mod mux;

/// JSON-RPC correlation over a logical channel.
pub mod rpc;

/// WebSocket duplex adapter.
pub mod websocket;

// ============================================================================
// Duplex
// ============================================================================

/// The physical connection: a stream of inbound JSON frames and a sink for
/// outbound ones.
///
/// Any type with these capabilities qualifies; the multiplexer takes
/// exclusive ownership of it.
pub trait Duplex:
    Stream<Item = Result<Value>> + Sink<Value, Error = Error> + Send + Unpin + 'static
{
}

impl<T> Duplex for T where
    T: Stream<Item = Result<Value>> + Sink<Value, Error = Error> + Send + Unpin + 'static
{
}

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::MemoryDuplex;
pub use mux::{Channel, ChannelItem, Multiplexer};
pub use rpc::{NotificationHandler, RpcTransport};
