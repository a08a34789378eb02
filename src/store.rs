//! Public state pushed by the backend over the `publicConfig` channel.
//!
//! The backend sends full or partial snapshots; the store keeps the last
//! value per key and reports what changed.
//!
//! # Keys
//!
//! | Key | Type |
//! |-----|------|
//! | `selectedAddress` | string or `null` |
//! | `chainId` | string |
//! | `networkVersion` | string |
//! | `isUnlocked` | boolean |
//!
//! # Change Rules
//!
//! - A key seen for the first time populates silently (no [`StateChange`]).
//! - A key whose value differs by deep equality produces a [`StateChange`].
//! - A snapshot that altered anything produces one [`StateUpdate`].
//! - The first update marks the store initialized.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::transport::Channel;

// ============================================================================
// StateKey
// ============================================================================

/// A recognized public state key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    /// `selectedAddress`
    SelectedAddress,
    /// `chainId`
    ChainId,
    /// `networkVersion`
    NetworkVersion,
    /// `isUnlocked`
    IsUnlocked,
}

impl StateKey {
    /// Every key, in application order.
    pub const ALL: [Self; 4] = [
        Self::SelectedAddress,
        Self::ChainId,
        Self::NetworkVersion,
        Self::IsUnlocked,
    ];

    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SelectedAddress => "selectedAddress",
            Self::ChainId => "chainId",
            Self::NetworkVersion => "networkVersion",
            Self::IsUnlocked => "isUnlocked",
        }
    }

    /// Returns `true` if `value` has the type this key carries.
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::SelectedAddress => value.is_string() || value.is_null(),
            Self::ChainId | Self::NetworkVersion => value.is_string(),
            Self::IsUnlocked => value.is_boolean(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Views
// ============================================================================

/// Typed view of the held public state. `None` means not yet known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicState {
    /// Selected account, if any.
    pub selected_address: Option<String>,
    /// Hex chain id.
    pub chain_id: Option<String>,
    /// Decimal network id.
    pub network_version: Option<String>,
    /// Wallet unlock status.
    pub is_unlocked: Option<bool>,
}

impl PublicState {
    fn from_values(values: &FxHashMap<StateKey, Value>) -> Self {
        let string = |key: StateKey| {
            values
                .get(&key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            selected_address: string(StateKey::SelectedAddress),
            chain_id: string(StateKey::ChainId),
            network_version: string(StateKey::NetworkVersion),
            is_unlocked: values.get(&StateKey::IsUnlocked).and_then(Value::as_bool),
        }
    }
}

/// A known key whose value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// The key.
    pub key: StateKey,
    /// Value before the snapshot.
    pub previous: Value,
    /// Value after the snapshot.
    pub current: Value,
}

/// Outcome of a snapshot that altered held state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    /// Held state after the snapshot.
    pub state: PublicState,
    /// Keys that changed from a known value.
    pub changes: Vec<StateChange>,
    /// Keys seen for the first time.
    pub populated: Vec<StateKey>,
}

impl StateUpdate {
    /// Returns the change for `key`, if it changed.
    #[must_use]
    pub fn change(&self, key: StateKey) -> Option<&StateChange> {
        self.changes.iter().find(|change| change.key == key)
    }

    /// Returns `true` if `key` was changed or populated.
    #[must_use]
    pub fn touched(&self, key: StateKey) -> bool {
        self.populated.contains(&key) || self.change(key).is_some()
    }
}

// ============================================================================
// Store
// ============================================================================

/// Update listener callback type.
pub type StateListener = Arc<dyn Fn(&StateUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Init {
    Pending,
    Ready,
    Ended,
}

struct StoreInner {
    values: Mutex<FxHashMap<StateKey, Value>>,
    listeners: Mutex<Vec<(SubscriptionId, StateListener)>>,
    init_tx: watch::Sender<Init>,
}

/// Holds backend-pushed public state and reports changes to listeners.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct PublicStateStore {
    inner: Arc<StoreInner>,
}

impl Default for PublicStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicStateStore {
    /// Creates an empty, uninitialized store.
    #[must_use]
    pub fn new() -> Self {
        let (init_tx, _) = watch::channel(Init::Pending);
        Self {
            inner: Arc::new(StoreInner {
                values: Mutex::new(FxHashMap::default()),
                listeners: Mutex::new(Vec::new()),
                init_tx,
            }),
        }
    }

    /// Registers an update listener.
    pub fn subscribe(&self, listener: StateListener) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner.listeners.lock().push((id, listener));
        id
    }

    /// Removes an update listener. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Spawns a task applying every frame read from `channel`.
    ///
    /// When the channel ends, waiters on initialization that are still
    /// pending fail with [`Error::Disconnected`].
    pub fn attach(&self, channel: Channel) {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some(item) = channel.recv().await {
                match item {
                    Ok(frame) => {
                        store.apply(&frame);
                    }
                    Err(e) => {
                        debug!(channel = %channel.name(), error = %e, "State channel ended");
                        break;
                    }
                }
            }
            store.mark_ended();
        });
    }

    /// Merges one snapshot into held state.
    ///
    /// Listeners run before this returns. Returns `None` when the snapshot
    /// altered nothing.
    pub fn apply(&self, snapshot: &Value) -> Option<StateUpdate> {
        let Some(object) = snapshot.as_object() else {
            warn!(snapshot = %snapshot, "Ignoring non-object state snapshot");
            return None;
        };

        let update = {
            let mut values = self.inner.values.lock();
            let mut changes = Vec::new();
            let mut populated = Vec::new();

            for key in StateKey::ALL {
                let Some(current) = object.get(key.as_str()) else {
                    continue;
                };
                if !key.accepts(current) {
                    warn!(key = %key, value = %current, "Ignoring mistyped state value");
                    continue;
                }

                match values.insert(key, current.clone()) {
                    None => populated.push(key),
                    Some(previous) if previous != *current => changes.push(StateChange {
                        key,
                        previous,
                        current: current.clone(),
                    }),
                    Some(_) => {}
                }
            }

            if changes.is_empty() && populated.is_empty() {
                trace!("State snapshot unchanged");
                return None;
            }

            StateUpdate {
                state: PublicState::from_values(&values),
                changes,
                populated,
            }
        };

        debug!(
            changed = update.changes.len(),
            populated = update.populated.len(),
            "Public state updated"
        );

        let listeners: Vec<StateListener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&update);
        }

        self.inner.init_tx.send_if_modified(|init| {
            if *init == Init::Pending {
                *init = Init::Ready;
                true
            } else {
                false
            }
        });

        Some(update)
    }

    /// Returns the typed current state.
    #[must_use]
    pub fn snapshot(&self) -> PublicState {
        PublicState::from_values(&self.inner.values.lock())
    }

    /// Returns `true` once any snapshot has altered state.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        *self.inner.init_tx.borrow() == Init::Ready
    }

    /// Waits until the first state update has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the channel ended first.
    pub async fn wait_initialized(&self) -> Result<()> {
        let mut init_rx = self.inner.init_tx.subscribe();
        let init = *init_rx
            .wait_for(|init| *init != Init::Pending)
            .await
            .map_err(|_| Error::Disconnected)?;

        match init {
            Init::Ready => Ok(()),
            Init::Pending | Init::Ended => Err(Error::Disconnected),
        }
    }

    fn mark_ended(&self) {
        self.inner.init_tx.send_if_modified(|init| {
            if *init == Init::Pending {
                *init = Init::Ended;
                true
            } else {
                false
            }
        });
    }
}

impl fmt::Debug for PublicStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicStateStore")
            .field("state", &self.snapshot())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::SinkExt;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::transport::{MemoryDuplex, Multiplexer};

    fn full_snapshot() -> Value {
        json!({
            "selectedAddress": "0xabc",
            "chainId": "0x1",
            "networkVersion": "1",
            "isUnlocked": true
        })
    }

    #[test]
    fn test_first_snapshot_populates_silently() {
        let store = PublicStateStore::new();
        let update = store.apply(&full_snapshot()).expect("update");

        assert!(update.changes.is_empty());
        assert_eq!(update.populated, StateKey::ALL.to_vec());
        assert_eq!(update.state.selected_address.as_deref(), Some("0xabc"));
        assert_eq!(update.state.is_unlocked, Some(true));
        assert!(store.is_initialized());
    }

    #[test]
    fn test_identical_snapshot_is_silent() {
        let store = PublicStateStore::new();
        store.apply(&full_snapshot());
        assert!(store.apply(&full_snapshot()).is_none());
    }

    #[test]
    fn test_change_reports_previous_and_current() {
        let store = PublicStateStore::new();
        store.apply(&full_snapshot());

        let update = store.apply(&json!({"chainId": "0x5"})).expect("update");
        assert_eq!(
            update.change(StateKey::ChainId),
            Some(&StateChange {
                key: StateKey::ChainId,
                previous: json!("0x1"),
                current: json!("0x5"),
            })
        );
        assert!(update.populated.is_empty());
        assert_eq!(store.snapshot().network_version.as_deref(), Some("1"));
    }

    #[test]
    fn test_mistyped_and_non_object_ignored() {
        let store = PublicStateStore::new();
        assert!(store.apply(&json!("nope")).is_none());
        assert!(store.apply(&json!({"chainId": 1, "isUnlocked": "yes"})).is_none());
        assert!(!store.is_initialized());
    }

    #[test]
    fn test_listeners_see_update_and_unsubscribe() {
        let store = PublicStateStore::new();
        let seen = Arc::new(Mutex::new(0usize));
        let id = store.subscribe({
            let seen = Arc::clone(&seen);
            Arc::new(move |_| *seen.lock() += 1)
        });

        store.apply(&json!({"chainId": "0x1"}));
        assert!(store.unsubscribe(id));
        store.apply(&json!({"chainId": "0x2"}));

        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_waiter_woken_by_first_update() {
        use tokio_test::{assert_pending, assert_ready_ok, task};

        let store = PublicStateStore::new();
        let mut wait = task::spawn(store.wait_initialized());
        assert_pending!(wait.poll());

        store.apply(&json!({"networkVersion": "1"}));

        assert!(wait.is_woken());
        assert_ready_ok!(wait.poll());
    }

    #[tokio::test]
    async fn test_attach_applies_frames_and_releases_waiters() {
        let (local, mut remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let store = PublicStateStore::new();
        store.attach(mux.create_channel("publicConfig").expect("channel"));

        let waiter = tokio::spawn({
            let store = store.clone();
            async move { store.wait_initialized().await }
        });

        remote
            .send(json!({"name": "publicConfig", "data": {"isUnlocked": false}}))
            .await
            .expect("send");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("released")
            .expect("join")
            .expect("initialized");
        assert_eq!(store.snapshot().is_unlocked, Some(false));
    }

    #[tokio::test]
    async fn test_channel_end_fails_waiters() {
        let (local, remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let store = PublicStateStore::new();
        store.attach(mux.create_channel("publicConfig").expect("channel"));

        drop(remote);

        let result = tokio::time::timeout(Duration::from_secs(1), store.wait_initialized())
            .await
            .expect("resolved");
        assert!(matches!(result, Err(Error::Disconnected)));
    }

    fn state_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            "0x[0-9a-f]{1,4}".prop_map(Value::from),
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn prop_change_iff_deep_unequal(
            first in proptest::collection::vec(state_value(), 4),
            second in proptest::collection::vec(state_value(), 4),
        ) {
            let to_snapshot = |values: &[Value]| {
                let mut object = serde_json::Map::new();
                for (key, value) in StateKey::ALL.iter().zip(values) {
                    object.insert(key.as_str().to_string(), value.clone());
                }
                Value::Object(object)
            };

            let store = PublicStateStore::new();
            let a = to_snapshot(&first);
            let b = to_snapshot(&second);

            store.apply(&a);
            let before = store.inner.values.lock().clone();
            let update = store.apply(&b);
            let after = store.inner.values.lock().clone();

            for key in StateKey::ALL {
                let changed = update.as_ref().is_some_and(|u| u.change(key).is_some());
                let deep_unequal = match (before.get(&key), after.get(&key)) {
                    (Some(old), Some(new)) => old != new,
                    _ => false,
                };
                prop_assert_eq!(changed, deep_unequal);
            }

            // Replaying the same snapshot yields nothing further.
            prop_assert!(store.apply(&b).is_none());
        }
    }
}
