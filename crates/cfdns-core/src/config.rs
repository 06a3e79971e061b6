//! Configuration types for the cfdns system
//!
//! This module defines the construction parameters for address sources and
//! the supervisor.

use crate::address::AddressFamily;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Address source configuration
///
/// Immutable construction parameters for one address source. The supervisor
/// builds a fresh source from the same configuration on every restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Kernel routing-table events (Linux)
    Netlink {
        /// Address family to watch
        family: AddressFamily,
        /// Network interface to watch (e.g., "eth0"); `None` uses the default route
        interface: Option<String>,
    },

    /// Periodic query of an external echo service
    Echo {
        /// Address family to query
        family: AddressFamily,
        /// Poll interval in seconds
        interval_secs: u64,
        /// Endpoint override; `None` uses the fixed endpoint for the family
        #[serde(default)]
        url: Option<String>,
    },

    /// Periodic inspection of the local address chosen for an outbound socket
    Socket {
        /// Address family to inspect
        family: AddressFamily,
        /// Poll interval in seconds
        interval_secs: u64,
        /// Connect target override; `None` uses the fixed target for the family
        #[serde(default)]
        target: Option<SocketAddr>,
    },
}

impl SourceConfig {
    /// Validate the source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceConfig::Netlink { interface, .. } => {
                if interface.as_ref().is_some_and(|name| name.trim().is_empty()) {
                    return Err(crate::Error::config("Netlink interface name cannot be empty"));
                }
                Ok(())
            }
            SourceConfig::Echo {
                interval_secs, url, ..
            } => {
                if *interval_secs == 0 {
                    return Err(crate::Error::config("Echo source interval must be > 0"));
                }
                if let Some(url) = url
                    && !url.starts_with("https://")
                    && !url.starts_with("http://")
                {
                    return Err(crate::Error::config(format!(
                        "Echo source URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
                Ok(())
            }
            SourceConfig::Socket {
                family,
                interval_secs,
                target,
            } => {
                if *interval_secs == 0 {
                    return Err(crate::Error::config("Socket source interval must be > 0"));
                }
                if let Some(target) = target
                    && !family.matches(&target.ip())
                {
                    return Err(crate::Error::config(format!(
                        "Socket source target {} is not an {} address",
                        target, family
                    )));
                }
                Ok(())
            }
        }
    }

    /// Registry key of the source kind
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Netlink { .. } => "netlink",
            SourceConfig::Echo { .. } => "echo",
            SourceConfig::Socket { .. } => "socket",
        }
    }

    /// Address family the source observes
    pub fn family(&self) -> AddressFamily {
        match self {
            SourceConfig::Netlink { family, .. }
            | SourceConfig::Echo { family, .. }
            | SourceConfig::Socket { family, .. } => *family,
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Period after which the address source is torn down and recreated
    ///
    /// Default: 86400 seconds (one day)
    #[serde(default = "default_restart_period_secs")]
    pub restart_period_secs: u64,

    /// Capacity of the channel between a source and the supervisor
    #[serde(default = "default_address_channel_capacity")]
    pub address_channel_capacity: usize,

    /// Capacity of the supervisor event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SupervisorConfig {
    /// Create a configuration with the given restart period and default capacities
    ///
    /// The period is kept in whole seconds; a fractional period is rounded up.
    pub fn with_restart_period(restart_period: Duration) -> Self {
        let whole_secs = restart_period.as_secs();
        let restart_period_secs = if restart_period.subsec_nanos() > 0 {
            whole_secs.saturating_add(1)
        } else {
            whole_secs
        };

        Self {
            restart_period_secs,
            ..Self::default()
        }
    }

    /// Restart period as a `Duration`
    pub fn restart_period(&self) -> Duration {
        Duration::from_secs(self.restart_period_secs)
    }

    /// Validate the supervisor configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.restart_period_secs == 0 {
            return Err(crate::Error::config("Restart period must be > 0"));
        }
        if self.address_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Channel capacities must be > 0"));
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_period_secs: default_restart_period_secs(),
            address_channel_capacity: default_address_channel_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_restart_period_secs() -> u64 {
    86_400
}

fn default_address_channel_capacity() -> usize {
    16
}

fn default_event_channel_capacity() -> usize {
    64
}
