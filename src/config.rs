//! Provider configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use inpage_provider::ProviderConfig;
//!
//! let config = ProviderConfig::new()
//!     .with_request_timeout(Duration::from_secs(30))
//!     .with_ignored_channel("telemetry");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::identifiers::ChannelName;

// ============================================================================
// Constants
// ============================================================================

/// Close code reported when the backend connection is lost.
pub const CLOSE_CODE: u16 = 1011;

/// Close reason reported when the backend connection is lost.
pub const CLOSE_REASON: &str = "Backend communication error.";

// ============================================================================
// ProviderConfig
// ============================================================================

/// Provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Channel carrying JSON-RPC traffic.
    pub provider_channel: ChannelName,

    /// Channel carrying pushed public state.
    pub public_config_channel: ChannelName,

    /// Channels read off the wire and discarded.
    pub ignored_channels: Vec<ChannelName>,

    /// Per-request response timeout. `None` waits until disconnect.
    pub request_timeout: Option<Duration>,

    /// Code carried by the `close` event.
    pub close_code: u16,

    /// Reason carried by the `close` event.
    pub close_reason: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ProviderConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider_channel: ChannelName::new(ChannelName::PROVIDER),
            public_config_channel: ChannelName::new(ChannelName::PUBLIC_CONFIG),
            ignored_channels: vec![ChannelName::new(ChannelName::PHISHING)],
            request_timeout: None,
            close_code: CLOSE_CODE,
            close_reason: CLOSE_REASON.to_string(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ProviderConfig {
    /// Sets the JSON-RPC channel name.
    #[inline]
    #[must_use]
    pub fn with_provider_channel(mut self, name: impl Into<ChannelName>) -> Self {
        self.provider_channel = name.into();
        self
    }

    /// Sets the public state channel name.
    #[inline]
    #[must_use]
    pub fn with_public_config_channel(mut self, name: impl Into<ChannelName>) -> Self {
        self.public_config_channel = name.into();
        self
    }

    /// Adds a channel to discard.
    #[inline]
    #[must_use]
    pub fn with_ignored_channel(mut self, name: impl Into<ChannelName>) -> Self {
        self.ignored_channels.push(name.into());
        self
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the `close` event code and reason.
    #[inline]
    #[must_use]
    pub fn with_close(mut self, code: u16, reason: impl Into<String>) -> Self {
        self.close_code = code;
        self.close_reason = reason.into();
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.provider_channel.as_str(), "provider");
        assert_eq!(config.public_config_channel.as_str(), "publicConfig");
        assert_eq!(config.ignored_channels, vec![ChannelName::from("phishing")]);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.close_code, 1011);
        assert_eq!(config.close_reason, "Backend communication error.");
    }

    #[test]
    fn test_builder_methods_chain() {
        let config = ProviderConfig::new()
            .with_provider_channel("rpc")
            .with_ignored_channel("telemetry")
            .with_request_timeout(Duration::from_millis(250))
            .with_close(4000, "gone");

        assert_eq!(config.provider_channel.as_str(), "rpc");
        assert_eq!(config.ignored_channels.len(), 2);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.close_code, 4000);
    }
}
