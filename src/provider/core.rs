//! Provider struct, construction and lifecycle.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::builder::ProviderBuilder;
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::events::{EventEmitter, EventKind, ProviderEvent};
use crate::identifiers::SubscriptionId;
use crate::middleware::{ErrorNormalizer, IdRemapper, Pipeline, TransportDispatch};
use crate::protocol::{Call, Reply, Request, notification_parts};
use crate::store::{PublicState, PublicStateStore, StateKey, StateUpdate};
use crate::transport::{Channel, Duplex, Multiplexer, RpcTransport};

use super::{ConnectionState, ProviderState};

// ============================================================================
// Constants
// ============================================================================

/// Methods whose responses carry the account list.
const ACCOUNT_METHODS: [&str; 2] = ["eth_accounts", "eth_requestAccounts"];

/// Backend notification carrying a new account list.
const ACCOUNTS_CHANGED_NOTIFICATION: &str = "wallet_accountsChanged";

/// Backend notification carrying a subscription result.
const SUBSCRIPTION_NOTIFICATION: &str = "eth_subscription";

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for a provider.
pub(crate) struct ProviderInner {
    /// Settings fixed at construction.
    pub config: ProviderConfig,
    /// Owns the connection.
    mux: Multiplexer,
    /// Correlation over the provider channel.
    transport: Arc<RpcTransport>,
    /// Remap, normalize, dispatch.
    pub pipeline: Arc<Pipeline>,
    /// Pushed public state.
    pub store: PublicStateStore,
    /// Facade-owned state.
    pub state: Mutex<ProviderState>,
    /// Listener registry.
    pub events: EventEmitter,
    /// Runtime captured at construction, used by non-async entry points.
    pub runtime: Handle,
    /// Set once the experimental notice has been logged.
    pub experimental_notice: AtomicBool,
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        self.mux.shutdown();
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Caller-facing RPC provider.
///
/// Cheap to clone; clones share one connection.
///
/// # Example
///
/// ```ignore
/// use inpage_provider::{EventKind, Provider, MemoryDuplex};
///
/// let (local, backend) = MemoryDuplex::pair();
/// let provider = Provider::new(local)?;
///
/// provider.on(EventKind::ChainChanged, |event| println!("{event:?}"));
/// let chain_id = provider.request("eth_chainId", None).await?;
/// ```
#[derive(Clone)]
pub struct Provider {
    /// Shared inner state.
    pub(crate) inner: Arc<ProviderInner>,
}

// ============================================================================
// Provider - Display
// ============================================================================

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("state", &*self.inner.state.lock())
            .field("pending", &self.inner.transport.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Provider - Constructor
// ============================================================================

impl Provider {
    /// Creates a provider with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn new<D: Duplex>(duplex: D) -> Result<Self> {
        ProviderBuilder::new().build(duplex)
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::new()
    }

    /// Wires every component over `duplex`.
    pub(crate) fn with_config<D: Duplex>(config: ProviderConfig, duplex: D) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("Provider must be created inside a tokio runtime"))?;

        let mux = Multiplexer::new(duplex);
        let (rpc_channel, state_channel) =
            open_channels(&mux, &config).inspect_err(|_| mux.shutdown())?;

        let transport = Arc::new(RpcTransport::new(rpc_channel, config.request_timeout));

        let mut pipeline = Pipeline::new();
        pipeline
            .push(IdRemapper::new())
            .push(ErrorNormalizer)
            .push(TransportDispatch::new(Arc::clone(&transport)));

        let provider = Self {
            inner: Arc::new(ProviderInner {
                config,
                mux,
                transport,
                pipeline: Arc::new(pipeline),
                store: PublicStateStore::new(),
                state: Mutex::new(ProviderState::default()),
                events: EventEmitter::new(),
                runtime,
                experimental_notice: AtomicBool::new(false),
            }),
        };

        provider.wire(state_channel);

        debug!(pipeline = ?provider.inner.pipeline, "Provider created");

        Ok(provider)
    }

    /// Installs handlers and spawns the lifecycle tasks.
    fn wire(&self, state_channel: Channel) {
        let inner = &self.inner;
        let weak = Arc::downgrade(inner);

        inner.transport.set_notification_handler(Arc::new({
            let weak = Weak::clone(&weak);
            move |frame| {
                if let Some(provider) = upgrade(&weak) {
                    provider.handle_notification(frame);
                }
            }
        }));

        inner.store.subscribe(Arc::new({
            let weak = Weak::clone(&weak);
            move |update| {
                if let Some(provider) = upgrade(&weak) {
                    provider.handle_state_update(update);
                }
            }
        }));

        inner.transport.start();
        inner.store.attach(state_channel);

        // Listeners registered right after construction still see `connect`.
        inner.runtime.spawn({
            let weak = Weak::clone(&weak);
            async move {
                tokio::task::yield_now().await;
                if let Some(provider) = upgrade(&weak) {
                    provider.handle_connect();
                }
            }
        });

        let mux = inner.mux.clone();
        inner.runtime.spawn(async move {
            mux.closed().await;
            if let Some(provider) = upgrade(&weak) {
                provider.handle_disconnect();
            }
        });
    }
}

fn open_channels(mux: &Multiplexer, config: &ProviderConfig) -> Result<(Channel, Channel)> {
    for name in &config.ignored_channels {
        mux.ignore_channel(name.clone())?;
    }
    let rpc = mux.create_channel(config.provider_channel.clone())?;
    let state = mux.create_channel(config.public_config_channel.clone())?;
    Ok((rpc, state))
}

fn upgrade(weak: &Weak<ProviderInner>) -> Option<Provider> {
    weak.upgrade().map(|inner| Provider { inner })
}

// ============================================================================
// Provider - Accessors
// ============================================================================

impl Provider {
    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// Returns `true` once `connect` has fired and until the connection
    /// is lost. `false` while the state is still [`ConnectionState::Unknown`].
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Returns the selected account.
    #[must_use]
    pub fn selected_address(&self) -> Option<String> {
        self.inner.state.lock().selected_address.clone()
    }

    /// Returns the last account list seen.
    #[must_use]
    pub fn accounts(&self) -> Option<Vec<String>> {
        self.inner.state.lock().accounts.clone()
    }

    /// Returns the hex chain id.
    #[must_use]
    pub fn chain_id(&self) -> Option<String> {
        self.inner.state.lock().chain_id.clone()
    }

    /// Returns the decimal network id.
    #[must_use]
    pub fn network_version(&self) -> Option<String> {
        self.inner.state.lock().network_version.clone()
    }

    /// Returns the public state as last pushed by the backend.
    #[must_use]
    pub fn public_state(&self) -> PublicState {
        self.inner.store.snapshot()
    }

    /// Returns a copy of the facade-owned state.
    #[must_use]
    pub fn state(&self) -> ProviderState {
        self.inner.state.lock().clone()
    }

    /// Returns the active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.transport.pending_count()
    }
}

// ============================================================================
// Provider - Events
// ============================================================================

impl Provider {
    /// Registers a listener for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.events.off(id)
    }

    fn emit(&self, event: ProviderEvent) {
        self.inner.events.emit(&event);
    }
}

// ============================================================================
// Provider - Requests
// ============================================================================

impl Provider {
    /// Sends a request and returns its result.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if the request is malformed (nothing is sent)
    /// - [`Error::Rpc`] if the backend answers with an error
    /// - [`Error::Disconnected`] if the connection is or becomes lost
    pub async fn call(&self, request: Request) -> Result<Value> {
        request.validate()?;
        self.dispatch(Call::Single(request))
            .await?
            .into_single()
            .ok_or_else(|| Error::protocol("expected a single response"))?
            .into_result()
    }

    /// Sends `method` with `params` and returns its result.
    ///
    /// # Errors
    ///
    /// Same as [`Provider::call`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call(Request::new(method, params)).await
    }

    /// Runs a validated call through the pipeline.
    ///
    /// Account-bearing responses update the cached account list before the
    /// reply is returned.
    pub(crate) async fn dispatch(&self, call: Call) -> Result<Reply> {
        if self.connection_state() == ConnectionState::Disconnected {
            return Err(Error::Disconnected);
        }

        let tracks_accounts = call
            .method()
            .is_some_and(|method| ACCOUNT_METHODS.contains(&method));

        let reply = self.inner.pipeline.handle(call).await?;

        if tracks_accounts
            && let Reply::Single(response) = &reply
            && let Some(result) = &response.result
        {
            match parse_accounts(result) {
                Some(accounts) => self.handle_accounts_changed(accounts),
                None => warn!(result = %result, "Account response is not a list of strings"),
            }
        }

        Ok(reply)
    }
}

/// Reads a JSON array of strings.
pub(crate) fn parse_accounts(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|account| account.as_str().map(str::to_string))
        .collect()
}

// ============================================================================
// Provider - Lifecycle Handlers
// ============================================================================

impl Provider {
    /// Emits `connect` once, unless the connection was already lost.
    fn handle_connect(&self) {
        let chain_id = {
            let mut state = self.inner.state.lock();
            if state.connection != ConnectionState::Unknown {
                return;
            }
            state.connection = ConnectionState::Connected;
            state.chain_id.clone()
        };

        debug!(chain_id = ?chain_id, "Provider connected");
        self.emit(ProviderEvent::Connect { chain_id });
    }

    /// Marks the provider disconnected and emits `close` once.
    fn handle_disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.connection == ConnectionState::Disconnected {
                return;
            }
            state.connection = ConnectionState::Disconnected;
        }

        let code = self.inner.config.close_code;
        let reason = self.inner.config.close_reason.clone();

        warn!(code, reason = %reason, "Lost connection to backend");
        self.emit(ProviderEvent::Close { code, reason });
    }

    /// Replaces the account list and emits `accountsChanged` if it changed.
    pub(crate) fn handle_accounts_changed(&self, accounts: Vec<String>) {
        let changed = self.inner.state.lock().replace_accounts(accounts);

        if let Some(accounts) = changed {
            debug!(count = accounts.len(), "Accounts changed");
            self.emit(ProviderEvent::AccountsChanged(accounts));
        }
    }

    /// Routes a backend notification.
    fn handle_notification(&self, frame: Value) {
        match notification_parts(&frame) {
            Some((ACCOUNTS_CHANGED_NOTIFICATION, params)) => {
                match params.and_then(parse_accounts) {
                    Some(accounts) => self.handle_accounts_changed(accounts),
                    None => warn!(frame = %frame, "Malformed accounts notification"),
                }
            }
            Some((SUBSCRIPTION_NOTIFICATION, params)) => {
                let result = params.and_then(|params| params.get("result")).cloned();
                self.emit(ProviderEvent::Data(frame));
                if let Some(result) = result {
                    self.emit(ProviderEvent::Notification(result));
                }
            }
            Some((method, _)) => {
                trace!(method, "Forwarding notification");
                self.emit(ProviderEvent::Data(frame));
            }
            None => self.emit(ProviderEvent::Data(frame)),
        }
    }

    /// Mirrors a state snapshot into facade state and emits change events.
    fn handle_state_update(&self, update: &StateUpdate) {
        let mut events = vec![ProviderEvent::Update(update.state.clone())];
        let mut lock_accounts = false;
        let mut refresh_accounts = false;

        {
            let mut state = self.inner.state.lock();
            let public = &update.state;

            if update.touched(StateKey::SelectedAddress) {
                state.selected_address = public.selected_address.clone();
            }
            if update.touched(StateKey::ChainId) {
                state.chain_id = public.chain_id.clone();
            }
            if update.touched(StateKey::NetworkVersion) {
                state.network_version = public.network_version.clone();
            }
            if update.touched(StateKey::IsUnlocked) {
                state.is_unlocked = public.is_unlocked;
            }
        }

        if let Some(chain_id) = changed_string(update, StateKey::ChainId) {
            events.push(ProviderEvent::ChainChanged(chain_id.clone()));
            events.push(ProviderEvent::ChainIdChanged(chain_id));
        }
        if let Some(network) = changed_string(update, StateKey::NetworkVersion) {
            events.push(ProviderEvent::NetworkChanged(network));
        }
        if let Some(change) = update.change(StateKey::IsUnlocked) {
            match change.current.as_bool() {
                Some(false) => lock_accounts = true,
                Some(true) => refresh_accounts = true,
                None => {}
            }
        }

        for event in events {
            self.emit(event);
        }

        if lock_accounts {
            debug!("Wallet locked");
            self.handle_accounts_changed(Vec::new());
        }

        if refresh_accounts {
            debug!("Wallet unlocked, refreshing accounts");
            let provider = self.clone();
            self.inner.runtime.spawn(async move {
                if let Err(e) = provider.request("eth_accounts", None).await {
                    debug!(error = %e, "Account refresh failed");
                }
            });
        }
    }

    /// Closes the connection from this side.
    ///
    /// Pending and later requests fail with [`Error::Disconnected`] and
    /// `close` is emitted once, as for a remote close.
    pub fn shutdown(&self) {
        info!("Shutting down provider");
        self.inner.mux.shutdown();
    }
}

fn changed_string(update: &StateUpdate, key: StateKey) -> Option<String> {
    update
        .change(key)
        .and_then(|change| change.current.as_str())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
