//! Record updates with bounded retries
//!
//! [`RecordUpdater`] is the change callback handed to the supervisor: every
//! delivered address becomes one Cloudflare update, retried a fixed number of
//! times with a fixed delay. The final failure is logged and dropped; the
//! next address change (or the next restart's initial read) tries again.

use async_trait::async_trait;
use cfdns_core::{ChangeCallback, DnsUpdater, Error, RecordRef, Result, UpdateResult};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Applies address changes to one DNS record
pub struct RecordUpdater {
    updater: Arc<dyn DnsUpdater>,
    record: RecordRef,
    max_retries: u32,
    retry_delay: Duration,
}

impl RecordUpdater {
    pub fn new(
        updater: Arc<dyn DnsUpdater>,
        record: RecordRef,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            updater,
            record,
            max_retries,
            retry_delay,
        }
    }

    pub fn record(&self) -> &RecordRef {
        &self.record
    }

    /// Update the record, retrying transient failures
    ///
    /// Makes at most `max_retries + 1` attempts. Configuration and lookup
    /// failures are returned immediately.
    pub async fn apply(&self, address: IpAddr) -> Result<UpdateResult> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.updater.update_record(&self.record, address).await {
                Ok(result) => {
                    match &result {
                        UpdateResult::Updated { previous, new_ip } => info!(
                            record = %self.record.name,
                            %previous,
                            %new_ip,
                            provider = self.updater.provider_name(),
                            "DNS record updated"
                        ),
                        UpdateResult::Unchanged { current_ip } => info!(
                            record = %self.record.name,
                            %current_ip,
                            "DNS record already up to date"
                        ),
                    }
                    return Ok(result);
                }
                Err(e) if attempt <= self.max_retries && is_retryable(&e) => {
                    warn!(
                        record = %self.record.name,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "DNS update failed, retrying in {:?}",
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(error: &Error) -> bool {
    !matches!(error, Error::Config(_) | Error::NotFound(_))
}

#[async_trait]
impl ChangeCallback for RecordUpdater {
    async fn on_change(&self, address: IpAddr) {
        if let Err(e) = self.apply(address).await {
            error!(
                record = %self.record.name,
                %address,
                error = %e,
                "Failed to update DNS record"
            );
        }
    }
}
