// # DNS Updater Trait
//
// Defines the interface of the downstream consumer of address changes: a
// client that sets the content of one DNS record at a provider.
//
// ## Implementations
//
// - Cloudflare: `cfdns-provider-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use cfdns_core::{DnsUpdater, RecordRef};
//
// let record = RecordRef::new(zone_id, "home.example.com", "A");
// updater.update_record(&record, "1.2.3.4".parse()?).await?;
// ```

use async_trait::async_trait;
use std::net::IpAddr;

/// Identifies one DNS record at a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    /// Provider zone identifier
    pub zone_id: String,
    /// Fully qualified record name
    pub name: String,
    /// Record type ("A" or "AAAA")
    pub record_type: String,
}

impl RecordRef {
    /// Create a record reference
    pub fn new(
        zone_id: impl Into<String>,
        name: impl Into<String>,
        record_type: impl Into<String>,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            name: name.into(),
            record_type: record_type.into(),
        }
    }
}

/// Result of a DNS update operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    /// Record content was replaced
    Updated {
        /// The content before the update
        previous: String,
        /// The new address
        new_ip: IpAddr,
    },
    /// Record already had the requested content (no-op)
    Unchanged {
        /// The current address
        current_ip: IpAddr,
    },
}

/// Trait for DNS updater implementations
///
/// # Idempotency
///
/// `update_record` must be idempotent: setting the content a record already
/// has returns [`UpdateResult::Unchanged`] without modifying anything.
///
/// # Retries
///
/// Implementations perform a single attempt and return errors as-is; callers
/// own retry policy.
#[async_trait]
pub trait DnsUpdater: Send + Sync {
    /// Set the content of `record` to `new_ip`
    ///
    /// # Returns
    ///
    /// - `Ok(UpdateResult)`: The result of the update operation
    /// - `Err(Error)`: If the lookup or update failed
    async fn update_record(
        &self,
        record: &RecordRef,
        new_ip: IpAddr,
    ) -> Result<UpdateResult, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}
