//! Terminal stage handing calls to the RPC transport.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Call, Reply};
use crate::transport::RpcTransport;

use super::{Middleware, Next};

/// Writes the call to the wire and awaits the correlated reply.
///
/// Never calls `next`; stages pushed after it are unreachable.
pub struct TransportDispatch {
    transport: Arc<RpcTransport>,
}

impl TransportDispatch {
    /// Creates the terminal stage over `transport`.
    #[must_use]
    pub fn new(transport: Arc<RpcTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Middleware for TransportDispatch {
    async fn handle(&self, call: Call, _next: Next<'_>) -> Result<Reply> {
        self.transport.dispatch(call).await
    }

    fn name(&self) -> &'static str {
        "transport-dispatch"
    }
}
