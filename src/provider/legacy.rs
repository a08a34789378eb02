//! Legacy entry points: callback send, synchronous send, `enable`.

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{Call, Reply, Request, Response};

use super::Provider;
use super::core::parse_accounts;
use super::shim::{self, SyncAction};

/// Completion callback for [`Provider::send_async`] and [`Provider::send`].
pub type Callback = Box<dyn FnOnce(Result<Reply>) + Send>;

impl Provider {
    /// Sends `call` and invokes `callback` exactly once with the outcome.
    ///
    /// A single response carrying an error object is delivered as
    /// [`Error::Rpc`]. Account bookkeeping runs before the callback.
    pub fn send_async<F>(&self, call: Call, callback: F)
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        if let Err(e) = call.validate() {
            callback(Err(e));
            return;
        }

        let provider = self.clone();
        self.inner.runtime.spawn(async move {
            let outcome = provider.dispatch(call).await.and_then(surface_error);
            callback(outcome);
        });
    }

    /// Legacy `send`.
    ///
    /// With a callback this is [`Provider::send_async`] and returns
    /// `Ok(None)`. Without one the call is answered synchronously from
    /// cached state.
    ///
    /// # Errors
    ///
    /// Without a callback, returns [`Error::UnsupportedSyncMethod`] for
    /// methods (or batches) that cannot be answered locally.
    pub fn send(&self, call: Call, callback: Option<Callback>) -> Result<Option<Response>> {
        match (callback, call) {
            (Some(callback), call) => {
                self.send_async(call, callback);
                Ok(None)
            }
            (None, Call::Single(request)) => self.send_sync(request).map(Some),
            (None, Call::Batch(_)) => Err(Error::unsupported_sync_method("batch")),
        }
    }

    /// Answers `request` from cached state without suspending.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if the request is malformed
    /// - [`Error::UnsupportedSyncMethod`] for any method outside the fixed table
    pub fn send_sync(&self, request: Request) -> Result<Response> {
        request.validate()?;

        let action = shim::dispatch(&self.inner.state.lock(), &request)?;

        match action {
            SyncAction::Respond(response) => Ok(response),
            SyncAction::Forward(response) => {
                let _runtime = self.inner.runtime.enter();
                let method = request.method.clone();
                self.inner
                    .pipeline
                    .handle_with_callback(Call::Single(request), move |outcome| {
                        if let Err(e) = outcome.and_then(surface_error) {
                            debug!(method = %method, error = %e, "Forwarded call failed");
                        }
                    });
                Ok(response)
            }
        }
    }

    /// Requests account access and returns the granted accounts.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] if the backend refuses
    /// - [`Error::Protocol`] if the result is not a list of addresses
    pub async fn enable(&self) -> Result<Vec<String>> {
        let result = self.request("eth_requestAccounts", None).await?;
        parse_accounts(&result).ok_or_else(|| invalid_accounts(&result))
    }
}

/// Turns a single error response into [`Error::Rpc`].
fn surface_error(reply: Reply) -> Result<Reply> {
    match reply {
        Reply::Single(Response {
            error: Some(error), ..
        }) => Err(Error::Rpc(error)),
        other => Ok(other),
    }
}

fn invalid_accounts(result: &Value) -> Error {
    Error::protocol(format!("expected a list of accounts, got {result}"))
}
