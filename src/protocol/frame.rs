//! Wire framing on the shared connection, and inbound frame classification
//! for the `provider` channel.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Response;

// ============================================================================
// MuxFrame
// ============================================================================

/// One frame on the physical connection, tagged with its logical channel.
///
/// # Format
///
/// ```json
/// { "name": "provider", "data": { "id": 1, "jsonrpc": "2.0", "result": "0x1" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxFrame {
    /// Logical channel name.
    pub name: String,

    /// Channel payload.
    pub data: Value,
}

impl MuxFrame {
    /// Creates a frame for the given channel.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Classification of a frame read from the `provider` channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to a single request.
    Response(Response),
    /// Response array for a batch.
    Batch(Vec<Response>),
    /// Anything carrying a `method` and no result: forwarded out of band.
    Notification(Value),
    /// Shape not recognized.
    Malformed(Value),
}

impl Inbound {
    /// Classifies a raw frame.
    ///
    /// An object is a response when it has an `id` and a `result` or
    /// `error` field, or when it has no `method` and either a non-null `id`
    /// or an `error`. Responses missing both `result` and `error` are left
    /// for the error normalizer. An object with a string `method` is
    /// otherwise a notification. An array is a batch response when every
    /// element is a response.
    #[must_use]
    pub fn classify(frame: Value) -> Self {
        let shape = match &frame {
            Value::Object(map) if is_response(map) => Shape::Response,
            Value::Object(map) if map.get("method").is_some_and(Value::is_string) => {
                Shape::Notification
            }
            Value::Array(items)
                if !items.is_empty()
                    && items
                        .iter()
                        .all(|item| item.as_object().is_some_and(is_response)) =>
            {
                Shape::Batch
            }
            _ => Shape::Unknown,
        };

        match shape {
            Shape::Response => match Response::deserialize(&frame) {
                Ok(response) => Self::Response(response),
                Err(_) => Self::Malformed(frame),
            },
            Shape::Batch => match Vec::<Response>::deserialize(&frame) {
                Ok(responses) => Self::Batch(responses),
                Err(_) => Self::Malformed(frame),
            },
            Shape::Notification => Self::Notification(frame),
            Shape::Unknown => Self::Malformed(frame),
        }
    }
}

enum Shape {
    Response,
    Batch,
    Notification,
    Unknown,
}

fn is_response(map: &Map<String, Value>) -> bool {
    let has_id = map.get("id").is_some_and(|id| !id.is_null());
    let has_outcome = map.contains_key("result") || map.contains_key("error");

    let has_method = map.contains_key("method");

    (has_id && has_outcome) || (!has_method && (has_id || map.contains_key("error")))
}

/// Returns the method and params of a notification frame.
#[must_use]
pub fn notification_parts(frame: &Value) -> Option<(&str, Option<&Value>)> {
    let method = frame.get("method")?.as_str()?;
    Some((method, frame.get("params")))
}

// ============================================================================
// Tests
// ============================================================================
