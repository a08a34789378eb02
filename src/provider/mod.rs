//! Caller-facing provider.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Provider struct, construction, `call`, lifecycle handlers |
//! | `legacy` | `send_async`, `send`, `send_sync`, `enable` |
//! | `shim` | Synchronous dispatch table |
//! | `experimental` | `is_unlocked`, `send_batch` |
//! | `state` | Facade-owned state |
//!
//! # Example
//!
//! ```ignore
//! let provider = Provider::new(duplex)?;
//!
//! // Async call
//! let block = provider.request("eth_blockNumber", None).await?;
//!
//! // Legacy synchronous call, answered from cached state
//! let accounts = provider.send_sync(Request::new("eth_accounts", None))?;
//!
//! // Experimental surface
//! let unlocked = provider.experimental().is_unlocked().await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod core;
mod experimental;
mod legacy;
mod shim;
mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::Provider;
pub use experimental::Experimental;
pub use legacy::Callback;
pub use state::{ConnectionState, ProviderState};
