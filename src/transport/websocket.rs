//! WebSocket duplex adapter.
//!
//! Carries one JSON document per text (or binary) message. Undecodable
//! messages are logged and skipped; a close frame ends the connection.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use futures_util::future::ready;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

use super::Duplex;

// ============================================================================
// Adapter
// ============================================================================

/// Wraps an established WebSocket stream as a [`Duplex`].
pub fn duplex<S>(ws_stream: WebSocketStream<S>) -> impl Duplex
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    ws_stream
        .with(|frame: Value| ready(encode(&frame)))
        .filter_map(|message| ready(decode(message)))
}

/// Connects to a backend WebSocket endpoint.
///
/// # Errors
///
/// Returns [`Error::WebSocket`] if the handshake fails.
pub async fn connect(url: &Url) -> Result<impl Duplex> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    debug!(%url, "WebSocket connection established");
    Ok(duplex(ws_stream))
}

fn encode(frame: &Value) -> Result<Message> {
    let json = serde_json::to_string(frame)?;
    Ok(Message::Text(json.into()))
}

fn decode(message: StdResult<Message, WsError>) -> Option<Result<Value>> {
    match message {
        Ok(Message::Text(text)) => parse(serde_json::from_str(text.as_str())),
        Ok(Message::Binary(bytes)) => parse(serde_json::from_slice(&bytes)),
        Ok(Message::Close(_)) => {
            debug!("WebSocket closed by remote");
            Some(Err(Error::ConnectionClosed))
        }
        // Ping, Pong, raw frames
        Ok(_) => None,
        Err(e) => Some(Err(Error::WebSocket(e))),
    }
}

fn parse(decoded: serde_json::Result<Value>) -> Option<Result<Value>> {
    match decoded {
        Ok(value) => Some(Ok(value)),
        Err(e) => {
            warn!(error = %e, "Skipping undecodable WebSocket message");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_text_message() {
        let message = encode(&json!({"name": "provider"})).expect("encode");
        assert_eq!(message, Message::Text(r#"{"name":"provider"}"#.into()));
    }

    #[test]
    fn test_decode_text_and_binary() {
        let text = decode(Ok(Message::Text(r#"{"a":1}"#.into())));
        assert_eq!(text.expect("item").expect("ok"), json!({"a": 1}));

        let binary = decode(Ok(Message::Binary(br#"[1,2]"#.to_vec().into())));
        assert_eq!(binary.expect("item").expect("ok"), json!([1, 2]));
    }

    #[test]
    fn test_decode_skips_garbage_and_control() {
        assert!(decode(Ok(Message::Text("not json".into()))).is_none());
        assert!(decode(Ok(Message::Ping(Vec::new().into()))).is_none());
    }

    #[test]
    fn test_decode_close_ends_connection() {
        let item = decode(Ok(Message::Close(None))).expect("item");
        assert!(matches!(item, Err(Error::ConnectionClosed)));
    }
}
