//! Provider-owned state.

use std::fmt;

/// Connection state of a provider.
///
/// `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, `connect` not yet emitted.
    #[default]
    Unknown,
    /// `connect` emitted, connection open.
    Connected,
    /// Connection lost, `close` emitted.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// State the facade owns and the synchronous shim reads.
///
/// Written only by the state store listener, account bookkeeping and the
/// disconnect handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderState {
    /// Connection lifecycle.
    pub connection: ConnectionState,
    /// Selected account.
    pub selected_address: Option<String>,
    /// Last account list seen, `None` until first observed.
    pub accounts: Option<Vec<String>>,
    /// Hex chain id.
    pub chain_id: Option<String>,
    /// Decimal network id.
    pub network_version: Option<String>,
    /// Wallet unlock status.
    pub is_unlocked: Option<bool>,
}

impl ProviderState {
    /// Replaces the account list.
    ///
    /// Returns the new list if it differs from the held one. The selected
    /// address follows the first account.
    pub(crate) fn replace_accounts(&mut self, accounts: Vec<String>) -> Option<Vec<String>> {
        if self.accounts.as_ref() == Some(&accounts) {
            return None;
        }
        self.selected_address = accounts.first().cloned();
        self.accounts = Some(accounts.clone());
        Some(accounts)
    }
}
