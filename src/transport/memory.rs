//! In-process duplex pair.
//!
//! Two connected endpoints backed by unbounded channels. Dropping or
//! closing one side ends the other side's stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Sink, Stream};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// One end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryDuplex {
    tx: Option<mpsc::UnboundedSender<Value>>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl MemoryDuplex {
    /// Creates two connected endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

impl Stream for MemoryDuplex {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<Value> for MemoryDuplex {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        match &self.tx {
            Some(tx) if !tx.is_closed() => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(Error::ConnectionClosed)),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Value) -> Result<()> {
        self.get_mut()
            .tx
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send(item)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.get_mut().tx = None;
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// Tests
// ============================================================================
