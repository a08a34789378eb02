//! JSON-RPC correlation over one logical channel.
//!
//! [`RpcTransport`] writes requests onto its channel and matches inbound
//! responses to pending requests by id. Everything that is not a response
//! to a pending request and carries a `method` is handed to the
//! notification handler.
//!
//! # Event Loop
//!
//! [`RpcTransport::start`] spawns a tokio task that handles:
//!
//! - Responses, resolving the matching pending request exactly once
//! - Batch response arrays, resolving the batch that owns their ids
//! - Error responses without an id, resolving the sole pending request
//! - Notifications, forwarded to the handler
//! - Channel end, failing every pending request with a disconnect error

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Call, Inbound, Reply, Response};

use super::Channel;

// ============================================================================
// Types
// ============================================================================

/// Notification handler callback type.
///
/// Called with the raw frame for each inbound notification.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A caller waiting for a response.
struct PendingRequest {
    response_tx: oneshot::Sender<Result<Reply>>,
    /// Member ids when this entry is a batch.
    members: Option<Vec<RequestId>>,
}

/// Pending requests keyed by wire id. Batches are keyed by their first
/// member's id, with every member indexed back to that key.
#[derive(Default)]
struct Correlation {
    pending: FxHashMap<RequestId, PendingRequest>,
    batch_index: FxHashMap<RequestId, RequestId>,
    closed: bool,
}

impl Correlation {
    fn is_in_flight(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id) || self.batch_index.contains_key(id)
    }

    fn register(
        &mut self,
        key: RequestId,
        members: Option<Vec<RequestId>>,
        response_tx: oneshot::Sender<Result<Reply>>,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::Disconnected);
        }

        let ids = members.as_deref().unwrap_or(std::slice::from_ref(&key));
        let mut seen = FxHashSet::default();
        for id in ids {
            if self.is_in_flight(id) || !seen.insert(id) {
                return Err(Error::protocol(format!("request id {id} is already in flight")));
            }
        }

        if let Some(members) = &members {
            for id in members {
                self.batch_index.insert(id.clone(), key.clone());
            }
        }

        self.pending.insert(
            key,
            PendingRequest {
                response_tx,
                members,
            },
        );
        Ok(())
    }

    fn remove(&mut self, key: &RequestId) -> Option<PendingRequest> {
        let entry = self.pending.remove(key)?;
        if let Some(members) = &entry.members {
            for id in members {
                self.batch_index.remove(id);
            }
        }
        Some(entry)
    }

    fn drain(&mut self) -> Vec<PendingRequest> {
        self.closed = true;
        self.batch_index.clear();
        self.pending.drain().map(|(_, entry)| entry).collect()
    }
}

/// Returns the correlation key and, for batches, the member ids.
fn correlation_key(call: &Call) -> Result<(RequestId, Option<Vec<RequestId>>)> {
    match call {
        Call::Single(request) => request
            .id
            .clone()
            .map(|id| (id, None))
            .ok_or_else(|| Error::protocol("request has no id")),
        Call::Batch(requests) => {
            let members = requests
                .iter()
                .map(|request| request.id.clone())
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| Error::protocol("batch member has no id"))?;
            let key = members
                .first()
                .cloned()
                .ok_or_else(|| Error::protocol("batch is empty"))?;
            Ok((key, Some(members)))
        }
    }
}

// ============================================================================
// RpcTransport
// ============================================================================

/// Request/response correlation over a logical channel.
///
/// # Thread Safety
///
/// `RpcTransport` is `Send + Sync`; share it behind an `Arc`.
pub struct RpcTransport {
    /// The wrapped logical channel.
    channel: Channel,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<Correlation>>,
    /// Notification handler (shared with event loop).
    notification_handler: Arc<Mutex<Option<NotificationHandler>>>,
    /// Optional per-request response timeout.
    request_timeout: Option<Duration>,
    /// Set once the event loop has been spawned.
    started: AtomicBool,
}

impl RpcTransport {
    /// Creates a transport over `channel`. Call [`start`](Self::start) to
    /// begin reading.
    #[must_use]
    pub fn new(channel: Channel, request_timeout: Option<Duration>) -> Self {
        Self {
            channel,
            correlation: Arc::new(Mutex::new(Correlation::default())),
            notification_handler: Arc::new(Mutex::new(None)),
            request_timeout,
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the event loop. Subsequent calls are no-ops.
    ///
    /// Inbound frames queue on the channel until this is called, so
    /// handlers installed beforehand see every notification.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(channel = %self.channel.name(), "RPC transport already started");
            return;
        }

        tokio::spawn(Self::run_event_loop(
            self.channel.clone(),
            Arc::clone(&self.correlation),
            Arc::clone(&self.notification_handler),
        ));
    }

    /// Sets the notification handler callback.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.lock() = Some(handler);
    }

    /// Clears the notification handler.
    pub fn clear_notification_handler(&self) {
        *self.notification_handler.lock() = None;
    }

    /// Writes `call` and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::Disconnected`] if the channel has ended, before or while waiting
    /// - [`Error::Protocol`] if an id is missing or already in flight
    /// - [`Error::RequestTimeout`] if a timeout is configured and expires
    pub async fn dispatch(&self, call: Call) -> Result<Reply> {
        let (key, members) = correlation_key(&call)?;
        let frame = serde_json::to_value(&call)?;

        // Create response channel
        let (response_tx, response_rx) = oneshot::channel();

        // Store correlation before sending
        self.correlation
            .lock()
            .register(key.clone(), members, response_tx)?;

        if let Err(e) = self.channel.send(frame) {
            self.correlation.lock().remove(&key);
            debug!(id = %key, error = %e, "Write failed, connection gone");
            return Err(Error::Disconnected);
        }

        trace!(id = %key, "Request sent");

        let outcome = match self.request_timeout {
            Some(limit) => match timeout(limit, response_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.correlation.lock().remove(&key);
                    debug!(id = %key, "Removed timed-out correlation");
                    return Err(Error::request_timeout(key, limit.as_millis() as u64));
                }
            },
            None => response_rx.await,
        };

        outcome.unwrap_or(Err(Error::Disconnected))
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().pending.len()
    }

    /// Returns `true` once the channel has ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.correlation.lock().closed
    }

    /// Event loop reading the channel.
    async fn run_event_loop(
        channel: Channel,
        correlation: Arc<Mutex<Correlation>>,
        notification_handler: Arc<Mutex<Option<NotificationHandler>>>,
    ) {
        while let Some(item) = channel.recv().await {
            match item {
                Ok(frame) => {
                    Self::handle_incoming_frame(frame, &correlation, &notification_handler);
                }
                Err(e) => {
                    debug!(channel = %channel.name(), error = %e, "Channel ended");
                    break;
                }
            }
        }

        // Fail all pending requests on channel end
        Self::fail_pending_requests(&correlation);

        debug!(channel = %channel.name(), "RPC event loop terminated");
    }

    /// Handles one inbound frame.
    fn handle_incoming_frame(
        frame: Value,
        correlation: &Mutex<Correlation>,
        notification_handler: &Mutex<Option<NotificationHandler>>,
    ) {
        match Inbound::classify(frame) {
            Inbound::Response(response) => Self::resolve_single(response, correlation),

            Inbound::Batch(responses) => Self::resolve_batch(responses, correlation),

            Inbound::Notification(frame) => {
                let handler = notification_handler.lock().clone();
                match handler {
                    Some(handler) => handler(frame),
                    None => trace!("Notification dropped, no handler"),
                }
            }

            Inbound::Malformed(frame) => {
                warn!(frame = %frame, "Failed to classify incoming frame");
            }
        }
    }

    fn resolve_single(response: Response, correlation: &Mutex<Correlation>) {
        let Some(id) = response.id.clone() else {
            Self::resolve_unattributed(response, correlation);
            return;
        };

        let entry = {
            let mut correlation = correlation.lock();
            match correlation.pending.get(&id) {
                Some(entry) if entry.members.is_none() => correlation.remove(&id),
                Some(_) => {
                    warn!(id = %id, "Single response for a batch request");
                    None
                }
                None => {
                    warn!(id = %id, "Response for unknown request");
                    None
                }
            }
        };

        if let Some(entry) = entry {
            let _ = entry.response_tx.send(Ok(Reply::Single(response)));
        }
    }

    fn resolve_batch(responses: Vec<Response>, correlation: &Mutex<Correlation>) {
        let entry = {
            let mut correlation = correlation.lock();
            let key = responses
                .iter()
                .filter_map(|response| response.id.as_ref())
                .find_map(|id| correlation.batch_index.get(id).cloned());

            match key {
                Some(key) => correlation.remove(&key),
                None => {
                    warn!(len = responses.len(), "Batch response for unknown request");
                    None
                }
            }
        };

        let Some(entry) = entry else {
            return;
        };

        if let Some(members) = &entry.members {
            let unexpected = responses
                .iter()
                .filter(|response| response.id.as_ref().is_none_or(|id| !members.contains(id)))
                .count();
            if unexpected > 0 || members.len() != responses.len() {
                warn!(
                    expected = members.len(),
                    received = responses.len(),
                    unexpected,
                    "Batch response does not match request ids"
                );
            }
        }

        let _ = entry.response_tx.send(Ok(Reply::Batch(responses)));
    }

    /// Delivers an error response that carries no id, as sent for a
    /// request or batch the peer could not parse.
    ///
    /// With exactly one request outstanding the error is its reply.
    /// Otherwise every pending batch fails with a protocol error and
    /// single requests keep waiting for their own responses.
    fn resolve_unattributed(response: Response, correlation: &Mutex<Correlation>) {
        let Some(error) = response.error.clone() else {
            warn!("Response without id or error dropped");
            return;
        };

        let (sole, targets) = {
            let mut correlation = correlation.lock();
            let sole = correlation.pending.len() == 1;
            let keys: Vec<RequestId> = correlation
                .pending
                .iter()
                .filter(|(_, entry)| sole || entry.members.is_some())
                .map(|(key, _)| key.clone())
                .collect();
            let targets: Vec<PendingRequest> = keys
                .iter()
                .filter_map(|key| correlation.remove(key))
                .collect();
            (sole, targets)
        };

        if targets.is_empty() {
            warn!(code = error.code, "Error response matches no request");
            return;
        }

        if sole {
            debug!(code = error.code, "Error response without id delivered");
        } else {
            warn!(
                code = error.code,
                count = targets.len(),
                "Error response without id failed every pending batch"
            );
        }

        for entry in targets {
            let outcome = match (&entry.members, sole) {
                (None, _) => Ok(Reply::Single(response.clone())),
                (Some(_), true) => Err(Error::Rpc(error.clone())),
                (Some(_), false) => Err(Error::protocol(format!(
                    "uncorrelated error response {}: {}",
                    error.code, error.message
                ))),
            };
            let _ = entry.response_tx.send(outcome);
        }
    }

    /// Fails all pending requests with a disconnect error.
    fn fail_pending_requests(correlation: &Mutex<Correlation>) {
        let pending = correlation.lock().drain();
        let count = pending.len();

        for entry in pending {
            let _ = entry.response_tx.send(Err(Error::Disconnected));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on channel end");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;

    use crate::protocol::Request;
    use crate::transport::{MemoryDuplex, Multiplexer};

    fn setup() -> (Arc<RpcTransport>, MemoryDuplex) {
        let (local, remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let channel = mux.create_channel("provider").expect("channel");
        let transport = Arc::new(RpcTransport::new(channel, None));
        transport.start();
        (transport, remote)
    }

    async fn next_request(remote: &mut MemoryDuplex) -> Value {
        let frame = remote.next().await.expect("frame").expect("ok");
        assert_eq!(frame["name"], "provider");
        frame["data"].clone()
    }

    async fn reply(remote: &mut MemoryDuplex, data: Value) {
        remote
            .send(json!({"name": "provider", "data": data}))
            .await
            .expect("reply");
    }

    fn request(id: i64, method: &str) -> Call {
        Call::Single(Request::new(method, None).with_id(id))
    }

    #[tokio::test]
    async fn test_dispatch_resolves_matching_response() {
        let (transport, mut remote) = setup();

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(request(1, "eth_chainId")).await }
        });

        let sent = next_request(&mut remote).await;
        assert_eq!(sent["method"], "eth_chainId");
        reply(&mut remote, json!({"id": 1, "jsonrpc": "2.0", "result": "0x1"})).await;

        let response = task.await.expect("join").expect("reply").into_single().expect("single");
        assert_eq!(response.result, Some(json!("0x1")));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (transport, mut remote) = setup();
        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();

        for (id, label) in [(1, "A"), (2, "B")] {
            let transport = Arc::clone(&transport);
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let reply = transport.dispatch(request(id, "m")).await;
                let _ = order_tx.send((label, reply.is_ok()));
            });
            next_request(&mut remote).await;
        }

        reply(&mut remote, json!({"id": 2, "jsonrpc": "2.0", "result": "b"})).await;
        assert_eq!(order_rx.recv().await, Some(("B", true)));

        reply(&mut remote, json!({"id": 1, "jsonrpc": "2.0", "result": "a"})).await;
        assert_eq!(order_rx.recv().await, Some(("A", true)));
    }

    #[tokio::test]
    async fn test_duplicate_response_delivered_once() {
        let (transport, mut remote) = setup();
        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();
        transport.set_notification_handler(Arc::new(move |frame| {
            let _ = notify_tx.send(frame);
        }));

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(request(9, "m")).await }
        });
        next_request(&mut remote).await;

        reply(&mut remote, json!({"id": 9, "jsonrpc": "2.0", "result": 1})).await;
        reply(&mut remote, json!({"id": 9, "jsonrpc": "2.0", "result": 2})).await;
        reply(&mut remote, json!({"jsonrpc": "2.0", "method": "tick", "params": {}})).await;

        let response = task.await.expect("join").expect("reply").into_single().expect("single");
        assert_eq!(response.result, Some(json!(1)));

        // The duplicate is dropped; only the notification reaches the handler.
        let forwarded = notify_rx.recv().await.expect("notification");
        assert_eq!(forwarded["method"], "tick");
    }

    #[tokio::test]
    async fn test_rejects_in_flight_id() {
        let (transport, mut remote) = setup();

        let _first = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(request(5, "m")).await }
        });
        next_request(&mut remote).await;

        let second = transport.dispatch(request(5, "m")).await;
        assert!(matches!(second, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_rejects_missing_id() {
        let (transport, _remote) = setup();
        let result = transport
            .dispatch(Call::Single(Request::new("m", None)))
            .await;
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_batch_round_trip_keeps_order() {
        let (transport, mut remote) = setup();
        let call = Call::Batch(vec![
            Request::new("a", None).with_id(10),
            Request::new("b", None).with_id(11),
            Request::new("c", None).with_id(12),
        ]);

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(call).await }
        });

        let sent = next_request(&mut remote).await;
        assert_eq!(sent.as_array().map(Vec::len), Some(3));

        reply(
            &mut remote,
            json!([
                {"id": 10, "jsonrpc": "2.0", "result": "a"},
                {"id": 11, "jsonrpc": "2.0", "result": "b"},
                {"id": 12, "jsonrpc": "2.0", "result": "c"}
            ]),
        )
        .await;

        let responses = task.await.expect("join").expect("reply").into_batch().expect("batch");
        let results: Vec<_> = responses.into_iter().filter_map(|r| r.result).collect();
        assert_eq!(results, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_without_outcome_resolves_request() {
        let (transport, mut remote) = setup();

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(request(4, "m")).await }
        });
        next_request(&mut remote).await;

        reply(&mut remote, json!({"id": 4, "jsonrpc": "2.0"})).await;

        let response = task.await.expect("join").expect("reply").into_single().expect("single");
        assert!(response.is_malformed());
        assert_eq!(transport.pending_count(), 0);
    }

    fn batch(ids: [i64; 2]) -> Call {
        Call::Batch(vec![
            Request::new("a", None).with_id(ids[0]),
            Request::new("b", None).with_id(ids[1]),
        ])
    }

    fn invalid_request_error() -> Value {
        json!({
            "id": null,
            "jsonrpc": "2.0",
            "error": {"code": -32600, "message": "Invalid Request"}
        })
    }

    #[tokio::test]
    async fn test_null_id_error_resolves_sole_batch() {
        let (transport, mut remote) = setup();

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(batch([20, 21])).await }
        });
        next_request(&mut remote).await;

        reply(&mut remote, invalid_request_error()).await;

        match task.await.expect("join") {
            Err(Error::Rpc(error)) => assert_eq!(error.code, -32600),
            other => panic!("expected rpc error, got {other:?}"),
        }
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_null_id_error_resolves_sole_request() {
        let (transport, mut remote) = setup();

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(request(30, "m")).await }
        });
        next_request(&mut remote).await;

        reply(&mut remote, invalid_request_error()).await;

        let response = task.await.expect("join").expect("reply").into_single().expect("single");
        assert_eq!(response.error.map(|e| e.code), Some(-32600));
    }

    #[tokio::test]
    async fn test_null_id_error_fails_batches_when_ambiguous() {
        let (transport, mut remote) = setup();

        let batch_task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(batch([40, 41])).await }
        });
        next_request(&mut remote).await;

        let single_task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(request(42, "m")).await }
        });
        next_request(&mut remote).await;

        reply(&mut remote, invalid_request_error()).await;

        assert!(matches!(batch_task.await.expect("join"), Err(Error::Protocol { .. })));
        assert_eq!(transport.pending_count(), 1);

        reply(&mut remote, json!({"id": 42, "jsonrpc": "2.0", "result": "ok"})).await;
        let response = single_task
            .await
            .expect("join")
            .expect("reply")
            .into_single()
            .expect("single");
        assert_eq!(response.result, Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_channel_end_fails_pending_and_later_dispatch() {
        let (transport, mut remote) = setup();

        let task = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.dispatch(request(1, "m")).await }
        });
        next_request(&mut remote).await;

        drop(remote);

        assert!(matches!(task.await.expect("join"), Err(Error::Disconnected)));
        assert!(transport.is_closed());
        assert!(matches!(
            transport.dispatch(request(2, "m")).await,
            Err(Error::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_request_timeout_removes_correlation() {
        let (local, _remote) = MemoryDuplex::pair();
        let mux = Multiplexer::new(local);
        let channel = mux.create_channel("provider").expect("channel");
        let transport = RpcTransport::new(channel, Some(Duration::from_millis(20)));
        transport.start();

        let result = transport.dispatch(request(1, "m")).await;
        assert!(matches!(result, Err(Error::RequestTimeout { .. })));
        assert_eq!(transport.pending_count(), 0);
    }
}
