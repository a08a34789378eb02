//! Synchronous dispatch table over cached provider state.
//!
//! | Method | Answer |
//! |--------|--------|
//! | `eth_accounts` | `[selectedAddress]` or `[]` |
//! | `eth_coinbase` | selected address or `null` |
//! | `net_version` | network id or `null` |
//! | `eth_uninstallFilter` | `true`, real call fired in the background |
//!
//! Anything else is rejected without touching the transport.

use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::protocol::{Request, Response};

use super::ProviderState;

/// Outcome of a synchronous call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SyncAction {
    /// Answer locally.
    Respond(Response),
    /// Answer locally and also fire the request asynchronously.
    Forward(Response),
}

/// Answers `request` from `state` without suspending.
pub(crate) fn dispatch(state: &ProviderState, request: &Request) -> Result<SyncAction> {
    let id = request.id.clone();

    let result = match request.method.as_str() {
        "eth_accounts" => match &state.selected_address {
            Some(address) => json!([address]),
            None => json!([]),
        },
        "eth_coinbase" => state
            .selected_address
            .clone()
            .map_or(Value::Null, Value::String),
        "net_version" => state
            .network_version
            .clone()
            .map_or(Value::Null, Value::String),
        // Reports success before the backend has answered.
        "eth_uninstallFilter" => {
            return Ok(SyncAction::Forward(Response::success(id, Value::Bool(true))));
        }
        method => return Err(Error::unsupported_sync_method(method)),
    };

    Ok(SyncAction::Respond(Response::success(id, result)))
}
