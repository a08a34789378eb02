//! Experimental capability surface.

use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::protocol::{Call, Request, Response};

use super::Provider;

/// Experimental methods, reached through [`Provider::experimental`].
///
/// These may change without notice.
#[derive(Debug, Clone, Copy)]
pub struct Experimental<'a> {
    provider: &'a Provider,
}

impl Provider {
    /// Returns the experimental surface. Logs a notice on first use.
    pub fn experimental(&self) -> Experimental<'_> {
        if !self.inner.experimental_notice.swap(true, Ordering::Relaxed) {
            info!("Experimental provider methods are in use and may change without notice");
        }
        Experimental { provider: self }
    }
}

impl Experimental<'_> {
    /// Returns whether the wallet is unlocked.
    ///
    /// Waits for the first public state update if unlock status is not yet
    /// known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the connection ends first.
    pub async fn is_unlocked(&self) -> Result<bool> {
        let inner = &self.provider.inner;

        let known = inner.state.lock().is_unlocked;
        if let Some(unlocked) = known {
            return Ok(unlocked);
        }

        inner.store.wait_initialized().await?;
        Ok(inner.state.lock().is_unlocked.unwrap_or(false))
    }

    /// Sends an array of request objects as one batch frame.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `batch` is not a non-empty array of
    ///   valid request objects
    /// - [`Error::Disconnected`] if the connection is or becomes lost
    pub async fn send_batch(&self, batch: Value) -> Result<Vec<Response>> {
        let Value::Array(items) = batch else {
            return Err(Error::invalid_request("batch must be an array"));
        };

        let requests = items
            .into_iter()
            .map(Request::from_value)
            .collect::<Result<Vec<_>>>()?;

        let call = Call::Batch(requests);
        call.validate()?;

        self.provider
            .dispatch(call)
            .await?
            .into_batch()
            .ok_or_else(|| Error::protocol("expected a batch response"))
    }
}
