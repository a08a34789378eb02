//! Channel multiplexer and its event loop.
//!
//! One [`Multiplexer`] owns the physical connection. It splits it into
//! named logical [`Channel`]s: outbound writes are wrapped in a
//! [`MuxFrame`] tagged with the channel name, inbound frames are routed by
//! that tag.
//!
//! # Event Loop
//!
//! The multiplexer spawns a tokio task that handles:
//!
//! - Incoming frames from the connection, routed per channel
//! - Outgoing frames from every channel, written one whole frame at a time
//! - Connection end, propagated to every channel as an error item
//!   followed by end-of-stream

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ChannelName;
use crate::protocol::MuxFrame;

use super::Duplex;

// ============================================================================
// Types
// ============================================================================

/// Item delivered on a logical channel.
///
/// An `Err` item is always the last one before end-of-stream.
pub type ChannelItem = Result<Value>;

/// Internal commands for the event loop.
enum MuxCommand {
    /// Write one frame onto the connection.
    Write(MuxFrame),
    /// Close the connection from the local side.
    Shutdown,
}

/// Where inbound frames for a channel go.
enum Route {
    /// Delivered to the channel's inbound queue.
    Active {
        tx: mpsc::UnboundedSender<ChannelItem>,
        channel: Channel,
    },
    /// Read off the wire and discarded.
    Ignored,
}

/// Routing table shared with the event loop.
#[derive(Default)]
struct MuxState {
    routes: FxHashMap<ChannelName, Route>,
    closed: bool,
}

// ============================================================================
// Channel
// ============================================================================

/// A named logical duplex stream over the shared connection.
///
/// Clones share one inbound queue: each inbound frame is delivered to
/// exactly one `recv` call.
#[derive(Clone)]
pub struct Channel {
    name: ChannelName,
    command_tx: mpsc::UnboundedSender<MuxCommand>,
    inbound: Arc<AsyncMutex<mpsc::UnboundedReceiver<ChannelItem>>>,
}

impl Channel {
    fn new(
        name: ChannelName,
        command_tx: mpsc::UnboundedSender<MuxCommand>,
    ) -> (Self, mpsc::UnboundedSender<ChannelItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            name,
            command_tx,
            inbound: Arc::new(AsyncMutex::new(rx)),
        };
        (channel, tx)
    }

    /// Returns the channel name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Queues one frame for writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection has ended.
    pub fn send(&self, data: Value) -> Result<()> {
        self.command_tx
            .send(MuxCommand::Write(MuxFrame::new(self.name.as_str(), data)))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Receives the next inbound item.
    ///
    /// Returns `None` once the connection has ended and the queue is
    /// drained.
    pub async fn recv(&self) -> Option<ChannelItem> {
        self.inbound.lock().await.recv().await
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("name", &self.name).finish()
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Demultiplexes one connection into named logical channels.
///
/// # Thread Safety
///
/// `Multiplexer` is `Send + Sync` and cheap to clone.
#[derive(Clone)]
pub struct Multiplexer {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<MuxCommand>,
    /// Routing table (shared with event loop).
    state: Arc<Mutex<MuxState>>,
    /// Flips to `true` when the connection has ended.
    closed_rx: watch::Receiver<bool>,
}

impl Multiplexer {
    /// Takes ownership of `connection` and spawns the event loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<D: Duplex>(connection: D) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(MuxState::default()));

        tokio::spawn(Self::run_event_loop(
            connection,
            command_rx,
            Arc::clone(&state),
            closed_tx,
        ));

        Self {
            command_tx,
            state,
            closed_rx,
        }
    }

    /// Creates the named channel, or returns it if it already exists.
    ///
    /// A channel created after the connection ended yields one error item
    /// and then ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the name is empty or ignored.
    pub fn create_channel(&self, name: impl Into<ChannelName>) -> Result<Channel> {
        let name = name.into();
        if name.as_str().is_empty() {
            return Err(Error::config("channel name must not be empty"));
        }

        let mut state = self.state.lock();

        match state.routes.get(&name) {
            Some(Route::Active { channel, .. }) => return Ok(channel.clone()),
            Some(Route::Ignored) => {
                return Err(Error::config(format!("channel '{name}' is ignored")));
            }
            None => {}
        }

        let (channel, tx) = Channel::new(name.clone(), self.command_tx.clone());

        if state.closed {
            let _ = tx.send(Err(Error::ConnectionClosed));
            debug!(channel = %name, "Channel created on closed connection");
            return Ok(channel);
        }

        state.routes.insert(
            name.clone(),
            Route::Active {
                tx,
                channel: channel.clone(),
            },
        );
        debug!(channel = %name, "Channel created");

        Ok(channel)
    }

    /// Discards all inbound traffic for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a channel with that name was already
    /// created.
    pub fn ignore_channel(&self, name: impl Into<ChannelName>) -> Result<()> {
        let name = name.into();
        let mut state = self.state.lock();

        if matches!(state.routes.get(&name), Some(Route::Active { .. })) {
            return Err(Error::config(format!(
                "cannot ignore channel '{name}': already created"
            )));
        }

        state.routes.insert(name.clone(), Route::Ignored);
        debug!(channel = %name, "Channel ignored");
        Ok(())
    }

    /// Returns the number of created (non-ignored) channels still routed.
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.state
            .lock()
            .routes
            .values()
            .filter(|route| matches!(route, Route::Active { .. }))
            .count()
    }

    /// Returns `true` once the connection has ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves when the connection has ended.
    pub async fn closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    /// Closes the connection from the local side.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(MuxCommand::Shutdown);
    }

    /// Event loop that owns the connection.
    async fn run_event_loop<D: Duplex>(
        connection: D,
        mut command_rx: mpsc::UnboundedReceiver<MuxCommand>,
        state: Arc<Mutex<MuxState>>,
        closed_tx: watch::Sender<bool>,
    ) {
        let (mut write, mut read) = connection.split();

        let cause = loop {
            tokio::select! {
                // Inbound frames from the backend
                frame = read.next() => {
                    match frame {
                        Some(Ok(value)) => Self::route_frame(value, &state),

                        Some(Err(e)) => {
                            error!(error = %e, "Connection error");
                            break Some(e.to_string());
                        }

                        None => {
                            debug!("Connection stream ended");
                            break None;
                        }
                    }
                }

                // Outbound frames from channels
                command = command_rx.recv() => {
                    match command {
                        Some(MuxCommand::Write(frame)) => {
                            let name = frame.name.clone();
                            let value = match serde_json::to_value(&frame) {
                                Ok(value) => value,
                                Err(e) => {
                                    warn!(channel = %name, error = %e, "Failed to encode frame");
                                    continue;
                                }
                            };

                            if let Err(e) = write.send(value).await {
                                warn!(channel = %name, error = %e, "Failed to write frame");
                                break Some(e.to_string());
                            }

                            trace!(channel = %name, "Frame written");
                        }

                        Some(MuxCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = write.close().await;
                            break None;
                        }

                        None => {
                            debug!("Command channel closed");
                            break None;
                        }
                    }
                }
            }
        };

        Self::close_channels(&state, cause);
        let _ = closed_tx.send(true);

        debug!("Multiplexer event loop terminated");
    }

    /// Routes one inbound frame to its channel.
    fn route_frame(value: Value, state: &Mutex<MuxState>) {
        let frame: MuxFrame = match serde_json::from_value(value) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping untagged frame");
                return;
            }
        };

        let name = ChannelName::new(frame.name);
        let state = state.lock();

        match state.routes.get(&name) {
            Some(Route::Active { tx, .. }) => {
                if tx.send(Ok(frame.data)).is_err() {
                    trace!(channel = %name, "Channel receiver dropped");
                }
            }
            Some(Route::Ignored) => {
                trace!(channel = %name, "Discarded frame for ignored channel");
            }
            None => {
                warn!(channel = %name, "Orphaned frame for unknown channel");
            }
        }
    }

    /// Ends every channel, delivering the close cause first.
    fn close_channels(state: &Mutex<MuxState>, cause: Option<String>) {
        let routes: Vec<_> = {
            let mut state = state.lock();
            state.closed = true;
            state.routes.drain().collect()
        };

        let mut count = 0usize;
        for (_, route) in routes {
            if let Route::Active { tx, .. } = route {
                let error = match &cause {
                    Some(message) => Error::connection(message.clone()),
                    None => Error::ConnectionClosed,
                };
                let _ = tx.send(Err(error));
                count += 1;
            }
        }

        if count > 0 {
            debug!(count, "Ended channels on connection close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::MemoryDuplex;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;

    #[tokio::test]
    async fn test_outbound_frames_are_tagged() {
        let (local, mut remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let channel = mux.create_channel("provider").expect("create");

        channel.send(json!({"id": 1})).expect("send");

        let frame = remote.next().await.expect("frame").expect("ok");
        assert_eq!(frame, json!({"name": "provider", "data": {"id": 1}}));
    }

    #[tokio::test]
    async fn test_inbound_frames_routed_by_name() {
        let (local, mut remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let a = mux.create_channel("a").expect("a");
        let b = mux.create_channel("b").expect("b");

        remote.send(json!({"name": "b", "data": 2})).await.expect("send");
        remote.send(json!({"name": "a", "data": 1})).await.expect("send");

        assert_eq!(a.recv().await.expect("item").expect("ok"), json!(1));
        assert_eq!(b.recv().await.expect("item").expect("ok"), json!(2));
    }

    #[tokio::test]
    async fn test_create_channel_returns_existing() {
        let (local, mut remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let first = mux.create_channel("provider").expect("first");
        let second = mux.create_channel("provider").expect("second");
        assert_eq!(mux.channel_count(), 1);

        remote
            .send(json!({"name": "provider", "data": "x"}))
            .await
            .expect("send");

        // Shared queue: the frame is visible through either handle.
        assert_eq!(second.recv().await.expect("item").expect("ok"), json!("x"));
        drop(first);
    }

    #[tokio::test]
    async fn test_ignored_channel_never_surfaces() {
        let (local, mut remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        mux.ignore_channel("phishing").expect("ignore");
        let provider = mux.create_channel("provider").expect("create");

        remote
            .send(json!({"name": "phishing", "data": {"blocked": true}}))
            .await
            .expect("send");
        remote
            .send(json!({"name": "provider", "data": "after"}))
            .await
            .expect("send");

        assert_eq!(provider.recv().await.expect("item").expect("ok"), json!("after"));
        assert!(mux.create_channel("phishing").is_err());
    }

    #[tokio::test]
    async fn test_cannot_ignore_created_channel() {
        let (local, _remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        mux.create_channel("provider").expect("create");
        assert!(matches!(
            mux.ignore_channel("provider"),
            Err(Error::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_close_ends_every_channel() {
        let (local, remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let a = mux.create_channel("a").expect("a");
        let b = mux.create_channel("b").expect("b");

        drop(remote);
        mux.closed().await;

        for channel in [a, b] {
            assert!(matches!(
                channel.recv().await,
                Some(Err(Error::ConnectionClosed))
            ));
            assert!(channel.recv().await.is_none());
            assert!(channel.send(json!(1)).is_err());
        }
        assert!(mux.is_closed());
    }

    #[tokio::test]
    async fn test_channel_after_close_is_ended() {
        let (local, remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        drop(remote);
        mux.closed().await;

        let late = mux.create_channel("late").expect("create");
        assert!(matches!(late.recv().await, Some(Err(_))));
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_remote() {
        let (local, mut remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        mux.shutdown();
        mux.closed().await;
        assert!(remote.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_untagged_frames_dropped() {
        let (local, mut remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let provider = mux.create_channel("provider").expect("create");

        remote.send(json!({"name": "nobody", "data": 1})).await.expect("send");
        remote.send(json!("no tag")).await.expect("send");
        remote
            .send(json!({"name": "provider", "data": 3}))
            .await
            .expect("send");

        assert_eq!(provider.recv().await.expect("item").expect("ok"), json!(3));
    }
}
