//! Middleware pipeline applied to every outbound call.
//!
//! Each stage receives the call and a [`Next`] handle for the rest of the
//! chain. A stage may rewrite the call before awaiting `next`, rewrite the
//! reply afterwards, or answer without calling `next` at all.
//!
//! # Default Chain
//!
//! | Order | Stage | Module |
//! |-------|-------|--------|
//! | 1 | [`IdRemapper`] | `remap` |
//! | 2 | [`ErrorNormalizer`] | `normalize` |
//! | 3 | [`TransportDispatch`] (terminal) | `dispatch` |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Call, Reply};

// ============================================================================
// Submodules
// ============================================================================

/// Terminal stage writing to the RPC transport.
pub mod dispatch;

/// Error normalization stage.
pub mod normalize;

/// Request id remapping stage.
pub mod remap;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatch::TransportDispatch;
pub use normalize::ErrorNormalizer;
pub use remap::IdRemapper;

// ============================================================================
// Middleware
// ============================================================================

/// One stage of the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handles `call`, delegating to `next` for the rest of the chain.
    async fn handle(&self, call: Call, next: Next<'_>) -> Result<Reply>;

    /// Stage name used in logs.
    fn name(&self) -> &'static str {
        "anonymous"
    }
}

/// The remainder of the chain after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Runs the remaining stages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the chain ends without a stage
    /// producing a reply.
    pub async fn run(self, call: Call) -> Result<Reply> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                trace!(stage = stage.name(), "Entering middleware");
                stage.handle(call, Next { stages: rest }).await
            }
            None => Err(Error::protocol("middleware chain ended without a response")),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered middleware chain.
///
/// Built once during provider construction and immutable afterwards.
#[derive(Default, Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn push(&mut self, stage: impl Middleware + 'static) -> &mut Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Returns the number of stages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if no stage has been pushed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs `call` through every stage in order.
    ///
    /// # Errors
    ///
    /// Returns whatever the first failing stage returns.
    pub async fn handle(&self, call: Call) -> Result<Reply> {
        Next {
            stages: &self.stages,
        }
        .run(call)
        .await
    }

    /// Runs `call` on a spawned task and invokes `callback` exactly once
    /// with the outcome.
    pub fn handle_with_callback<F>(self: &Arc<Self>, call: Call, callback: F)
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = pipeline.handle(call).await;
            callback(outcome);
        });
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
