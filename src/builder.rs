//! Builder pattern for provider construction.
//!
//! Provides a fluent API for configuring and creating [`Provider`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use inpage_provider::Provider;
//!
//! # async fn example() -> inpage_provider::Result<()> {
//! let provider = Provider::builder()
//!     .request_timeout(Duration::from_secs(30))
//!     .connect("ws://127.0.0.1:8546")
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashSet;
use url::Url;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::identifiers::ChannelName;
use crate::provider::Provider;
use crate::transport::{Duplex, websocket};

// ============================================================================
// ProviderBuilder
// ============================================================================

/// Builder for configuring a [`Provider`] instance.
///
/// Use [`Provider::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ProviderBuilder {
    config: ProviderConfig,
}

// ============================================================================
// ProviderBuilder Implementation
// ============================================================================

impl ProviderBuilder {
    /// Creates a builder with the default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the JSON-RPC channel name.
    #[inline]
    #[must_use]
    pub fn provider_channel(mut self, name: impl Into<ChannelName>) -> Self {
        self.config = self.config.with_provider_channel(name);
        self
    }

    /// Sets the public state channel name.
    #[inline]
    #[must_use]
    pub fn public_config_channel(mut self, name: impl Into<ChannelName>) -> Self {
        self.config = self.config.with_public_config_channel(name);
        self
    }

    /// Adds a channel to read and discard.
    #[inline]
    #[must_use]
    pub fn ignore_channel(mut self, name: impl Into<ChannelName>) -> Self {
        self.config = self.config.with_ignored_channel(name);
        self
    }

    /// Sets the per-request response timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// Builds a provider over an established duplex.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn build<D: Duplex>(self, duplex: D) -> Result<Provider> {
        self.validate()?;
        Provider::with_config(self.config, duplex)
    }

    /// Connects to a backend WebSocket endpoint and builds a provider.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is invalid or not `ws`/`wss`
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(self, url: &str) -> Result<Provider> {
        self.validate()?;
        let url = validate_url(url)?;
        let duplex = websocket::connect(&url).await?;
        Provider::with_config(self.config, duplex)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ProviderBuilder {
    /// Validates channel names and timeout.
    fn validate(&self) -> Result<()> {
        let config = &self.config;
        let mut names = FxHashSet::default();

        let channels = [&config.provider_channel, &config.public_config_channel]
            .into_iter()
            .chain(&config.ignored_channels);

        for name in channels {
            if name.as_str().is_empty() {
                return Err(Error::config("Channel names must not be empty"));
            }
            if !names.insert(name) {
                return Err(Error::config(format!(
                    "Channel '{name}' is configured more than once"
                )));
            }
        }

        if config.request_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::config(
                "Request timeout must be non-zero. Omit it to wait until disconnect.",
            ));
        }

        Ok(())
    }
}

/// Parses a backend URL, requiring a WebSocket scheme.
fn validate_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| Error::config(format!("Invalid backend URL '{url}': {e}")))?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        scheme => Err(Error::config(format!(
            "Backend URL must use ws:// or wss://, got '{scheme}://'"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
