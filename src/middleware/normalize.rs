//! Maps failures below this stage onto the canonical error shape.

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Error, Result};
use crate::protocol::{Call, Reply, Response, RpcError};

use super::{Middleware, Next};

/// Error normalization stage.
///
/// - Responses with neither `result` nor `error` become internal errors.
/// - Transport failures become [`Error::Rpc`] with a canonical code.
/// - Disconnect-kind failures collapse to [`Error::Disconnected`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorNormalizer;

impl ErrorNormalizer {
    fn normalize_response(response: &mut Response) {
        if response.is_malformed() {
            warn!(id = ?response.id, "Response has no error or result");
            response.error = Some(RpcError::missing_result());
        }
    }

    fn normalize_error(error: Error) -> Error {
        match error {
            Error::Rpc(_) | Error::Disconnected | Error::InvalidRequest { .. } => error,
            e if e.is_disconnect() => Error::Disconnected,
            e => {
                warn!(error = %e, "Normalizing transport failure");
                Error::Rpc(e.to_rpc_error())
            }
        }
    }
}

#[async_trait]
impl Middleware for ErrorNormalizer {
    async fn handle(&self, call: Call, next: Next<'_>) -> Result<Reply> {
        match next.run(call).await {
            Ok(Reply::Single(mut response)) => {
                Self::normalize_response(&mut response);
                Ok(Reply::Single(response))
            }
            Ok(Reply::Batch(mut responses)) => {
                responses.iter_mut().for_each(Self::normalize_response);
                Ok(Reply::Batch(responses))
            }
            Err(e) => Err(Self::normalize_error(e)),
        }
    }

    fn name(&self) -> &'static str {
        "error-normalizer"
    }
}

// ============================================================================
// Tests
// ============================================================================
