//! In-page RPC provider core.
//!
//! Exposes one request/response API to callers while talking to a
//! privileged backend over a single duplex stream of JSON frames.
//!
//! # Architecture
//!
//! The connection is split into named logical channels:
//!
//! - **`provider`**: JSON-RPC requests, responses and notifications
//! - **`publicConfig`**: backend-pushed public state snapshots
//! - **`phishing`**: read off the wire and discarded
//!
//! Key design principles:
//!
//! - One event loop owns the connection; writes interleave per whole frame
//! - Caller ids are remapped to unique wire ids and restored on the reply
//! - Connection loss is terminal: pending calls fail, `close` fires once
//! - Events are delivered through an owned emitter, not inheritance
//!
//! # Quick Start
//!
//! ```no_run
//! use inpage_provider::{EventKind, Provider, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let provider = Provider::builder()
//!         .connect("ws://127.0.0.1:8546")
//!         .await?;
//!
//!     provider.on(EventKind::AccountsChanged, |event| {
//!         println!("{event:?}");
//!     });
//!
//!     let chain_id = provider.request("eth_chainId", None).await?;
//!     println!("Chain: {chain_id}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`provider`] | Caller-facing [`Provider`] |
//! | [`middleware`] | Request pipeline stages |
//! | [`store`] | Public state store |
//! | [`events`] | Provider events and emitter |
//! | [`config`] | [`ProviderConfig`] |
//! | [`builder`] | [`ProviderBuilder`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Duplex adapters, multiplexer, RPC correlation |

// ============================================================================
// Modules
// ============================================================================

/// Provider builder.
pub mod builder;

/// Provider configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Provider events and the emitter.
pub mod events;

/// Type-safe identifiers.
pub mod identifiers;

/// Middleware pipeline.
pub mod middleware;

/// Wire message types.
pub mod protocol;

/// Caller-facing provider.
pub mod provider;

/// Public state store.
pub mod store;

/// Transport layer.
///
/// Duplex adapters, the channel multiplexer and JSON-RPC correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Provider types
pub use builder::ProviderBuilder;
pub use config::ProviderConfig;
pub use provider::{Callback, ConnectionState, Experimental, Provider, ProviderState};

// Event types
pub use events::{EventEmitter, EventKind, ProviderEvent};

// State types
pub use store::{PublicState, PublicStateStore, StateChange, StateKey, StateUpdate};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelName, IdGenerator, RequestId, SubscriptionId};

// Protocol types
pub use protocol::{Call, Reply, Request, Response, RpcError};

// Transport types
pub use transport::{Channel, Duplex, MemoryDuplex, Multiplexer, RpcTransport};
