//! Type-safe identifiers.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`RequestId`] | JSON-RPC `id` (number or string) |
//! | [`ChannelName`] | Name of a logical channel on the multiplexer |
//! | [`SubscriptionId`] | Handle returned by event listener registration |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// A JSON-RPC request identifier.
///
/// Callers may pick any number or string; wire ids are always numbers
/// produced by an [`IdGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

// ============================================================================
// IdGenerator
// ============================================================================

/// Produces unique numeric request ids.
///
/// The counter starts at a random offset so two providers sharing one
/// backend are unlikely to produce the same sequence, and wraps inside the
/// `u32` range.
#[derive(Debug)]
pub struct IdGenerator {
    counter: AtomicU32,
}

impl IdGenerator {
    /// Creates a generator seeded from a random v4 UUID.
    #[must_use]
    pub fn new() -> Self {
        let seed = (Uuid::new_v4().as_u128() % u128::from(u32::MAX)) as u32;
        Self::starting_at(seed)
    }

    /// Creates a generator whose first id is `start + 1`.
    #[inline]
    #[must_use]
    pub const fn starting_at(start: u32) -> Self {
        Self {
            counter: AtomicU32::new(start),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> RequestId {
        let previous = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some((n + 1) % u32::MAX)
            })
            .unwrap_or_default();
        RequestId::Number(i64::from((previous + 1) % u32::MAX))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ChannelName
// ============================================================================

/// Name of a logical channel multiplexed over the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
    /// Channel carrying JSON-RPC requests, responses and notifications.
    pub const PROVIDER: &'static str = "provider";

    /// Channel carrying pushed public state snapshots.
    pub const PUBLIC_CONFIG: &'static str = "publicConfig";

    /// Reserved channel that is always read and discarded.
    pub const PHISHING: &'static str = "phishing";

    /// Creates a channel name.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelName {
    #[inline]
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelName {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle for removing an event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates a fresh process-unique id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_untagged_serde() {
        let num: RequestId = serde_json::from_str("42").expect("number id");
        let text: RequestId = serde_json::from_str("\"abc\"").expect("string id");
        assert_eq!(num, RequestId::Number(42));
        assert_eq!(text, RequestId::String("abc".into()));
        assert_eq!(serde_json::to_string(&num).expect("serialize"), "42");
    }

    #[test]
    fn test_id_generator_sequential() {
        let ids = IdGenerator::starting_at(10);
        assert_eq!(ids.next_id(), RequestId::Number(11));
        assert_eq!(ids.next_id(), RequestId::Number(12));
    }

    #[test]
    fn test_id_generator_wraps() {
        let ids = IdGenerator::starting_at(u32::MAX - 2);
        assert_eq!(ids.next_id(), RequestId::Number(i64::from(u32::MAX - 1)));
        assert_eq!(ids.next_id(), RequestId::Number(0));
        assert_eq!(ids.next_id(), RequestId::Number(1));
    }

    #[test]
    fn test_subscription_ids_unique() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("sub-"));
    }

    #[test]
    fn test_channel_name_constants() {
        assert_eq!(ChannelName::from(ChannelName::PROVIDER).as_str(), "provider");
        assert_eq!(ChannelName::PUBLIC_CONFIG, "publicConfig");
        assert_eq!(ChannelName::PHISHING, "phishing");
    }
}
