//! Error types for the cfdns system
//!
//! This module defines all error types used throughout the workspace.

use thiserror::Error;

/// Result type alias for cfdns operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the cfdns system
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (bad settings, ambiguous or missing interface)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport errors (HTTP, socket, or netlink failure while reading an address)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failure while releasing an address source
    #[error("Stop error: {0}")]
    Stop(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// HTTP client errors (from provider APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Record or zone not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a stop error
    pub fn stop(msg: impl Into<String>) -> Self {
        Self::Stop(msg.into())
    }

    /// Create a lifecycle error
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from configuration rather than the environment
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
