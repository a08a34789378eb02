//! Replaces caller ids with unique wire ids and restores them on the way
//! back.

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::identifiers::{IdGenerator, RequestId};
use crate::protocol::{Call, Reply};

use super::{Middleware, Next};

/// Identifier remapping stage.
///
/// Caller ids may collide across callers or be absent. Every request is
/// given a fresh id from a private generator before it reaches the wire.
#[derive(Debug, Default)]
pub struct IdRemapper {
    ids: IdGenerator,
}

impl IdRemapper {
    /// Creates a remapper with a randomly seeded counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a remapper over a caller-provided generator.
    #[must_use]
    pub fn with_generator(ids: IdGenerator) -> Self {
        Self { ids }
    }
}

#[async_trait]
impl Middleware for IdRemapper {
    async fn handle(&self, call: Call, next: Next<'_>) -> Result<Reply> {
        match call {
            Call::Single(mut request) => {
                let original = request.id.replace(self.ids.next_id());
                let mut reply = next.run(Call::Single(request)).await?;
                if let Reply::Single(response) = &mut reply {
                    response.id = original;
                }
                Ok(reply)
            }
            Call::Batch(mut requests) => {
                let mut originals: FxHashMap<RequestId, Option<RequestId>> =
                    FxHashMap::default();
                for request in &mut requests {
                    let wire = self.ids.next_id();
                    originals.insert(wire.clone(), request.id.replace(wire));
                }

                let mut reply = next.run(Call::Batch(requests)).await?;
                if let Reply::Batch(responses) = &mut reply {
                    for response in responses {
                        if let Some(original) =
                            response.id.as_ref().and_then(|wire| originals.get(wire))
                        {
                            response.id = original.clone();
                        }
                    }
                }
                Ok(reply)
            }
        }
    }

    fn name(&self) -> &'static str {
        "id-remapper"
    }
}

// ============================================================================
// Tests
// ============================================================================
