//! Environment configuration for the daemon
//!
//! All configuration is read from `CFDNS_*` environment variables, validated
//! up front, and mapped onto the core configuration types.

use anyhow::{Result, anyhow};
use cfdns_core::{AddressFamily, SourceConfig, SupervisorConfig};
use std::env;
use std::time::Duration;

/// What the daemon does after startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Keep the record in sync until a shutdown signal arrives
    Auto,
    /// Read the address once, update once, exit
    Manual,
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    pub api_token: String,
    pub zone: String,
    pub record: String,
    pub family: AddressFamily,
    pub mode: Mode,
    pub source: String,
    pub interface: Option<String>,
    pub interval_secs: u64,
    pub echo_url: Option<String>,
    pub restart_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub dry_run: bool,
    pub log_level: String,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_token", &"<REDACTED>")
            .field("zone", &self.zone)
            .field("record", &self.record)
            .field("family", &self.family)
            .field("mode", &self.mode)
            .field("source", &self.source)
            .field("interface", &self.interface)
            .field("interval_secs", &self.interval_secs)
            .field("restart_secs", &self.restart_secs)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| anyhow!("{} is required. Set it via: export {}=...", key, key))
        };

        let optional = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let number = |key: &str, default: u64| -> Result<u64> {
            match optional(key) {
                Some(value) => value
                    .parse()
                    .map_err(|_| anyhow!("{} must be a non-negative integer. Got: {}", key, value)),
                None => Ok(default),
            }
        };

        let family = match optional("CFDNS_IP_VERSION") {
            Some(value) => value
                .parse()
                .map_err(|e| anyhow!("CFDNS_IP_VERSION: {}", e))?,
            None => AddressFamily::V4,
        };

        let mode = match optional("CFDNS_MODE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("auto") => Mode::Auto,
            Some("manual") => Mode::Manual,
            Some(other) => anyhow::bail!(
                "CFDNS_MODE '{}' is not valid. Valid modes: auto, manual",
                other
            ),
        };

        let dry_run = match optional("CFDNS_DRY_RUN").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("false") | Some("0") | Some("no") => false,
            Some("true") | Some("1") | Some("yes") => true,
            Some(other) => anyhow::bail!("CFDNS_DRY_RUN must be true or false. Got: {}", other),
        };

        let max_retries = number("CFDNS_MAX_RETRIES", 3)?;

        Ok(Self {
            api_token: required("CFDNS_API_TOKEN")?,
            zone: required("CFDNS_ZONE")?.to_lowercase(),
            record: required("CFDNS_RECORD")?.to_lowercase(),
            family,
            mode,
            source: optional("CFDNS_SOURCE")
                .map(|s| s.to_lowercase())
                .unwrap_or_else(|| "netlink".to_string()),
            interface: optional("CFDNS_INTERFACE"),
            interval_secs: number("CFDNS_INTERVAL_SECS", 300)?,
            echo_url: optional("CFDNS_ECHO_URL"),
            restart_secs: number("CFDNS_RESTART_SECS", 86_400)?,
            max_retries: u32::try_from(max_retries)
                .map_err(|_| anyhow!("CFDNS_MAX_RETRIES is out of range: {}", max_retries))?,
            retry_delay_secs: number("CFDNS_RETRY_DELAY_SECS", 5)?,
            dry_run,
            log_level: optional("CFDNS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// This performs validation including:
    /// - Token sanity (length, placeholders)
    /// - Domain name format for zone and record
    /// - Source type enumeration
    /// - Numeric range validation
    pub fn validate(&self) -> Result<()> {
        // Cloudflare API tokens are 40 characters
        if self.api_token.len() < 20 {
            anyhow::bail!(
                "CFDNS_API_TOKEN appears too short ({} chars). \
                Cloudflare tokens are typically 40 characters. \
                Verify your token is correct.",
                self.api_token.len()
            );
        }

        let token_lower = self.api_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower.contains("example")
        {
            anyhow::bail!(
                "CFDNS_API_TOKEN appears to be a placeholder. \
                Use an actual API token from Cloudflare."
            );
        }

        validate_domain_name(&self.zone)?;
        validate_domain_name(&self.record)?;

        if self.record != self.zone && !self.record.ends_with(&format!(".{}", self.zone)) {
            anyhow::bail!(
                "CFDNS_RECORD '{}' is not inside zone '{}'",
                self.record,
                self.zone
            );
        }

        if self.restart_secs == 0 {
            anyhow::bail!("CFDNS_RESTART_SECS must be > 0");
        }

        if self.max_retries > 10 {
            anyhow::bail!(
                "CFDNS_MAX_RETRIES must be between 0 and 10. Got: {}",
                self.max_retries
            );
        }

        if !(1..=300).contains(&self.retry_delay_secs) {
            anyhow::bail!(
                "CFDNS_RETRY_DELAY_SECS must be between 1 and 300 seconds. Got: {}",
                self.retry_delay_secs
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "CFDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        // Source-specific checks (interval, URL scheme, interface name)
        self.source_config()?
            .validate()
            .map_err(|e| anyhow!("Invalid address source settings: {}", e))?;

        Ok(())
    }

    /// Address source configuration
    pub fn source_config(&self) -> Result<SourceConfig> {
        match self.source.as_str() {
            "netlink" => Ok(SourceConfig::Netlink {
                family: self.family,
                interface: self.interface.clone(),
            }),
            "echo" | "ipify" => Ok(SourceConfig::Echo {
                family: self.family,
                interval_secs: self.interval_secs,
                url: self.echo_url.clone(),
            }),
            "socket" => Ok(SourceConfig::Socket {
                family: self.family,
                interval_secs: self.interval_secs,
                target: None,
            }),
            other => anyhow::bail!(
                "CFDNS_SOURCE '{}' is not supported. \
                Supported sources: netlink, echo, socket",
                other
            ),
        }
    }

    /// Supervisor configuration
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::with_restart_period(Duration::from_secs(self.restart_secs))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Validate that a string is a valid domain name
///
/// This implements basic DNS domain name validation per RFC 1035.
/// It's not comprehensive but catches common errors.
fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.len() > 253 {
        anyhow::bail!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        );
    }

    for label in domain.split('.') {
        if label.is_empty() {
            anyhow::bail!("Domain name has empty label: '{}'", domain);
        }

        if label.len() > 63 {
            anyhow::bail!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            );
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            anyhow::bail!(
                "Domain label contains invalid characters. Label: '{}'. \
                Valid: alphanumeric and hyphen only.",
                label
            );
        }

        if label.starts_with('-') || label.ends_with('-') {
            anyhow::bail!(
                "Domain label cannot start or end with hyphen. Label: '{}'",
                label
            );
        }
    }

    Ok(())
}
