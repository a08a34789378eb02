//! Fake backend and event helpers shared by integration tests.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use inpage_provider::{EventKind, MemoryDuplex, Provider, ProviderEvent};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// How long a test waits for something that should happen.
pub const WAIT: Duration = Duration::from_secs(2);

/// How long a test waits to conclude something did not happen.
pub const QUIET: Duration = Duration::from_millis(100);

pub const ALL_EVENTS: [EventKind; 9] = [
    EventKind::Connect,
    EventKind::Close,
    EventKind::Data,
    EventKind::Notification,
    EventKind::ChainChanged,
    EventKind::ChainIdChanged,
    EventKind::NetworkChanged,
    EventKind::AccountsChanged,
    EventKind::Update,
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The far end of the connection.
pub struct Backend {
    duplex: MemoryDuplex,
}

impl Backend {
    /// Reads the next frame from any channel.
    pub async fn next_frame(&mut self) -> Value {
        timeout(WAIT, self.duplex.next())
            .await
            .expect("backend waited too long for a frame")
            .expect("connection ended")
            .expect("frame")
    }

    /// Reads the next frame, returning `None` if nothing arrives shortly.
    pub async fn try_next_frame(&mut self) -> Option<Value> {
        match timeout(QUIET, self.duplex.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    /// Reads the next `provider` payload.
    pub async fn next_request(&mut self) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame["name"], "provider", "unexpected frame: {frame}");
        frame["data"].clone()
    }

    /// Sends a payload on `channel`.
    pub async fn push(&mut self, channel: &str, data: Value) {
        self.duplex
            .send(json!({"name": channel, "data": data}))
            .await
            .expect("backend send");
    }

    /// Sends a payload on the `provider` channel.
    pub async fn reply(&mut self, data: Value) {
        self.push("provider", data).await;
    }

    /// Sends a public state snapshot.
    pub async fn push_state(&mut self, state: Value) {
        self.push("publicConfig", state).await;
    }

    /// Answers the next request with `result`, returning the request.
    pub async fn answer_next(&mut self, result: Value) -> Value {
        let request = self.next_request().await;
        self.reply(json!({"id": request["id"], "jsonrpc": "2.0", "result": result}))
            .await;
        request
    }

    /// Closes the connection from the backend side.
    pub fn disconnect(self) {
        drop(self.duplex);
    }
}

/// Builds a provider over an in-memory connection.
pub fn setup() -> (Provider, Backend) {
    init_tracing();
    let (local, remote) = MemoryDuplex::pair();
    let provider = Provider::new(local).expect("provider");
    (provider, Backend { duplex: remote })
}

/// Records every event the provider emits.
pub fn record(provider: &Provider) -> EventLog {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in ALL_EVENTS {
        let tx = tx.clone();
        provider.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    EventLog { rx }
}

pub struct EventLog {
    rx: mpsc::UnboundedReceiver<ProviderEvent>,
}

impl EventLog {
    /// Waits for the next event.
    pub async fn next(&mut self) -> ProviderEvent {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("waited too long for an event")
            .expect("emitter dropped")
    }

    /// Waits for the next event of `kind`, returning it and everything
    /// skipped on the way.
    pub async fn next_of(&mut self, kind: EventKind) -> (ProviderEvent, Vec<ProviderEvent>) {
        let mut skipped = Vec::new();
        loop {
            let event = self.next().await;
            if event.kind() == kind {
                return (event, skipped);
            }
            skipped.push(event);
        }
    }

    /// Returns events already emitted without waiting.
    pub fn drain(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
