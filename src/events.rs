//! Provider events and the emitter that delivers them.
//!
//! | Event | Payload | Raised when |
//! |-------|---------|-------------|
//! | `connect` | chain id, if known | once, after construction |
//! | `close` | code and reason | once, when the connection is lost |
//! | `data` | raw notification frame | backend notification |
//! | `notification` | `params.result` | `eth_subscription` notification |
//! | `chainChanged` | new chain id | chain changed from a known value |
//! | `chainIdChanged` | new chain id | same as `chainChanged` (legacy name) |
//! | `networkChanged` | new network id | network changed from a known value |
//! | `accountsChanged` | account list | account list changed |
//! | `update` | public state | any state snapshot altered state |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::identifiers::SubscriptionId;
use crate::store::PublicState;

// ============================================================================
// EventKind
// ============================================================================

/// Event name, used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `connect`
    Connect,
    /// `close`
    Close,
    /// `data`
    Data,
    /// `notification`
    Notification,
    /// `chainChanged`
    ChainChanged,
    /// `chainIdChanged`
    ChainIdChanged,
    /// `networkChanged`
    NetworkChanged,
    /// `accountsChanged`
    AccountsChanged,
    /// `update`
    Update,
}

impl EventKind {
    /// Returns the event name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Close => "close",
            Self::Data => "data",
            Self::Notification => "notification",
            Self::ChainChanged => "chainChanged",
            Self::ChainIdChanged => "chainIdChanged",
            Self::NetworkChanged => "networkChanged",
            Self::AccountsChanged => "accountsChanged",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ProviderEvent
// ============================================================================

/// An event emitted by the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// The provider is ready for calls.
    Connect {
        /// Chain id at connect time, if already known.
        chain_id: Option<String>,
    },

    /// The connection was lost. Terminal.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Raw backend notification frame.
    Data(Value),

    /// Subscription result from an `eth_subscription` notification.
    Notification(Value),

    /// New chain id.
    ChainChanged(String),

    /// New chain id, legacy event name.
    ChainIdChanged(String),

    /// New network id.
    NetworkChanged(String),

    /// New account list.
    AccountsChanged(Vec<String>),

    /// Public state after an altering snapshot.
    Update(PublicState),
}

impl ProviderEvent {
    /// Returns the event's kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect { .. } => EventKind::Connect,
            Self::Close { .. } => EventKind::Close,
            Self::Data(_) => EventKind::Data,
            Self::Notification(_) => EventKind::Notification,
            Self::ChainChanged(_) => EventKind::ChainChanged,
            Self::ChainIdChanged(_) => EventKind::ChainIdChanged,
            Self::NetworkChanged(_) => EventKind::NetworkChanged,
            Self::AccountsChanged(_) => EventKind::AccountsChanged,
            Self::Update(_) => EventKind::Update,
        }
    }
}

// ============================================================================
// EventEmitter
// ============================================================================

/// Event listener callback type.
pub type EventListener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

struct Registration {
    id: SubscriptionId,
    kind: EventKind,
    listener: EventListener,
}

/// Owned publish/subscribe registry.
///
/// Listeners run synchronously on the emitting task, outside the
/// registry lock, in registration order.
#[derive(Default)]
pub struct EventEmitter {
    registrations: Mutex<Vec<Registration>>,
}

impl EventEmitter {
    /// Creates an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.registrations.lock().push(Registration {
            id,
            kind,
            listener: Arc::new(listener),
        });
        id
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        registrations.len() != before
    }

    /// Delivers `event` to its listeners and returns how many ran.
    pub fn emit(&self, event: &ProviderEvent) -> usize {
        let kind = event.kind();
        let listeners: Vec<EventListener> = self
            .registrations
            .lock()
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| Arc::clone(&registration.listener))
            .collect();

        trace!(event = %kind, listeners = listeners.len(), "Emitting event");

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    /// Returns the number of listeners for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registrations
            .lock()
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.registrations.lock().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
