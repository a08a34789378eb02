//! JSON-RPC 2.0 message types.
//!
//! Defines the request, response and error shapes exchanged over the
//! `provider` channel, plus the single-or-batch wrappers used by the
//! middleware pipeline.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, INTERNAL_ERROR, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Keeps an explicit `null` as `Some(Value::Null)` instead of `None`.
fn present<'de, D>(deserializer: D) -> StdResult<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// ============================================================================
// Request
// ============================================================================

/// A JSON-RPC request.
///
/// # Format
///
/// ```json
/// { "id": 1, "jsonrpc": "2.0", "method": "eth_accounts", "params": [] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id; absent for caller requests that do not care.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    /// Protocol version.
    #[serde(default = "default_version")]
    pub jsonrpc: String,

    /// Method name.
    pub method: String,

    /// Positional or named parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a request without an id.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: None,
            jsonrpc: default_version(),
            method: method.into(),
            params,
        }
    }

    /// Sets the request id.
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parses a request object supplied by a caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the value is not a request
    /// object or fails [`Request::validate`].
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::invalid_request("request must be an object"));
        }
        let request: Self = serde_json::from_value(value)
            .map_err(|e| Error::invalid_request(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Checks the caller-visible shape rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `method` is empty or `params`
    /// is neither an object nor an array.
    pub fn validate(&self) -> Result<()> {
        if self.method.is_empty() {
            return Err(Error::invalid_request(
                "'method' must be a non-empty string",
            ));
        }

        match &self.params {
            None | Some(Value::Object(_)) | Some(Value::Array(_)) => Ok(()),
            Some(other) => Err(Error::invalid_request(format!(
                "'params' must be an object or array, got {}",
                type_name(other)
            ))),
        }
    }
}

/// Returns a short JSON type name for diagnostics.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// RpcError
// ============================================================================

/// Canonical error object: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,

    /// Human-readable message.
    pub message: String,

    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error object without data.
    #[inline]
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured data.
    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Error used when a response carries neither `result` nor `error`.
    #[must_use]
    pub fn missing_result() -> Self {
        Self::new(INTERNAL_ERROR, "Response has no error or result")
    }
}

// ============================================================================
// Response
// ============================================================================

/// A JSON-RPC response.
///
/// # Format
///
/// Success:
/// ```json
/// { "id": 1, "jsonrpc": "2.0", "result": ["0xabc"] }
/// ```
///
/// Error:
/// ```json
/// { "id": 1, "jsonrpc": "2.0", "error": { "code": 4001, "message": "User rejected" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    #[serde(default)]
    pub id: Option<RequestId>,

    /// Protocol version.
    #[serde(default = "default_version")]
    pub jsonrpc: String,

    /// Result value (if success). `null` is a valid result.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,

    /// Error object (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            id,
            jsonrpc: default_version(),
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            id,
            jsonrpc: default_version(),
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` if the response carries neither result nor error.
    #[inline]
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.result.is_none() && self.error.is_none()
    }

    /// Extracts the result value, returning the error object if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the response carries an error or neither
    /// field.
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(Error::Rpc(error));
        }
        self.result
            .ok_or_else(|| Error::Rpc(RpcError::missing_result()))
    }
}

// ============================================================================
// Call / Reply
// ============================================================================

/// A single request or an atomic batch, as it travels through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Call {
    /// One request.
    Single(Request),
    /// Ordered batch written as one frame.
    Batch(Vec<Request>),
}

impl Call {
    /// Returns the method name for a single call.
    #[inline]
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Single(request) => Some(&request.method),
            Self::Batch(_) => None,
        }
    }

    /// Validates every request in the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] on the first malformed request or
    /// an empty batch.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Single(request) => request.validate(),
            Self::Batch(requests) if requests.is_empty() => {
                Err(Error::invalid_request("batch must not be empty"))
            }
            Self::Batch(requests) => requests.iter().try_for_each(Request::validate),
        }
    }
}

impl From<Request> for Call {
    #[inline]
    fn from(request: Request) -> Self {
        Self::Single(request)
    }
}

impl From<Vec<Request>> for Call {
    #[inline]
    fn from(requests: Vec<Request>) -> Self {
        Self::Batch(requests)
    }
}

/// A single response or a batch response array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    /// One response.
    Single(Response),
    /// Batch response array, in arrival order.
    Batch(Vec<Response>),
}

impl Reply {
    /// Returns the single response, if this is not a batch.
    #[inline]
    #[must_use]
    pub fn into_single(self) -> Option<Response> {
        match self {
            Self::Single(response) => Some(response),
            Self::Batch(_) => None,
        }
    }

    /// Returns the batch responses, if this is a batch.
    #[inline]
    #[must_use]
    pub fn into_batch(self) -> Option<Vec<Response>> {
        match self {
            Self::Single(_) => None,
            Self::Batch(responses) => Some(responses),
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
    fn test_request_serialization_omits_absent_fields() {
        let request = Request::new("eth_accounts", None).with_id(1);
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value, json!({"id": 1, "jsonrpc": "2.0", "method": "eth_accounts"}));
    }

    #[test]
    fn test_from_value_defaults_version() {
        let request = Request::from_value(json!({"method": "net_version"})).expect("parse");
        assert_eq!(request.jsonrpc, "2.0");
        assert!(request.id.is_none());
    }

    #[test]
    fn test_from_value_rejects_missing_method() {
        let err = Request::from_value(json!({"params": []})).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn test_from_value_rejects_non_string_method() {
        let err = Request::from_value(json!({"method": 5})).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        let err = Request::from_value(json!("eth_accounts")).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn test_validate_params_shapes() {
        assert!(Request::new("m", Some(json!([1]))).validate().is_ok());
        assert!(Request::new("m", Some(json!({"a": 1}))).validate().is_ok());
        assert!(Request::new("m", Some(json!("x"))).validate().is_err());
        assert!(Request::new("", None).validate().is_err());
    }

    #[test]
    fn test_null_result_is_present() {
        let response: Response =
            serde_json::from_value(json!({"id": 1, "jsonrpc": "2.0", "result": null}))
                .expect("parse");
        assert_eq!(response.result, Some(Value::Null));
        assert!(!response.is_malformed());
        assert_eq!(response.into_result().expect("ok"), Value::Null);
    }

    #[test]
    fn test_missing_result_is_malformed() {
        let response: Response =
            serde_json::from_value(json!({"id": 1, "jsonrpc": "2.0"})).expect("parse");
        assert!(response.is_malformed());
        assert!(matches!(response.into_result(), Err(Error::Rpc(_))));
    }

    #[test]
    fn test_error_response_into_result() {
        let response: Response = serde_json::from_value(json!({
            "id": "a",
            "jsonrpc": "2.0",
            "error": {"code": 4001, "message": "User rejected the request."}
        }))
        .expect("parse");

        match response.into_result() {
            Err(Error::Rpc(err)) => assert_eq!(err.code, 4001),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_call_untagged() {
        let batch: Call = serde_json::from_value(json!([
            {"id": 1, "jsonrpc": "2.0", "method": "a"},
            {"id": 2, "jsonrpc": "2.0", "method": "b"}
        ]))
        .expect("parse batch");
        assert!(matches!(batch, Call::Batch(ref r) if r.len() == 2));
        assert!(Call::Batch(Vec::new()).validate().is_err());
    }
}
