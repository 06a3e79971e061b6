//! Plugin-based source registry
//!
//! The registry maps source kinds ("netlink", "echo", "socket") to factories,
//! so the daemon never hardcodes an if-else chain over source types.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cfdns_core::registry::{ConfiguredSource, SourceRegistry};
//! use std::sync::Arc;
//!
//! let mut registry = SourceRegistry::new();
//! cfdns_ip_http::register(&mut registry);
//!
//! let builder = ConfiguredSource::new(Arc::new(registry), config)?;
//! let source = builder.build().await?;
//! ```

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::traits::{AddressSource, AddressSourceFactory, SourceBuilder};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of address source factories keyed by source kind
///
/// Registration happens once during startup; afterwards the registry is
/// shared read-only (typically behind an `Arc`).
#[derive(Default)]
pub struct SourceRegistry {
    factories: HashMap<String, Box<dyn AddressSourceFactory>>,
}

impl SourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a source kind
    ///
    /// A later registration for the same kind replaces the earlier one.
    pub fn register(&mut self, kind: impl Into<String>, factory: Box<dyn AddressSourceFactory>) {
        self.factories.insert(kind.into(), factory);
    }

    /// Whether a factory is registered for `kind`
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Create a source from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn AddressSource>)`: Created, not-yet-started source
    /// - `Err(Error)`: If the kind is not registered or construction fails
    pub async fn create(&self, config: &SourceConfig) -> Result<Box<dyn AddressSource>> {
        let kind = config.kind();
        let factory = self.factories.get(kind).ok_or_else(|| {
            Error::config(format!(
                "Unknown address source type: {} (registered: {})",
                kind,
                self.kinds().join(", ")
            ))
        })?;

        factory.create(config).await
    }
}

/// A [`SourceBuilder`] producing sources from a fixed configuration
///
/// This is the factory handed to the supervisor: every `build()` constructs a
/// brand-new source from the same configuration.
#[derive(Clone)]
pub struct ConfiguredSource {
    registry: Arc<SourceRegistry>,
    config: SourceConfig,
}

impl ConfiguredSource {
    /// Create a builder, validating the configuration up front
    pub fn new(registry: Arc<SourceRegistry>, config: SourceConfig) -> Result<Self> {
        config.validate()?;
        if !registry.contains(config.kind()) {
            return Err(Error::config(format!(
                "Address source type '{}' is not available in this build",
                config.kind()
            )));
        }
        Ok(Self { registry, config })
    }

    /// The configuration sources are built from
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

#[async_trait]
impl SourceBuilder for ConfiguredSource {
    async fn build(&self) -> Result<Box<dyn AddressSource>> {
        self.registry.create(&self.config).await
    }
}
