// # Cloudflare DNS Record Updater
//
// This crate provides the downstream consumer of address changes: an
// idempotent "set content" on one Cloudflare DNS record.
//
// ## Behavior
//
// - One attempt per call; retries are owned by the caller
// - HTTP timeout configured (30 seconds)
// - Specific error handling for HTTP status codes (401/403, 404, 409, 429, 5xx)
// - Dry-run mode for safe testing
// - Idempotency checking (no PUT if the content already matches)
// - Both A and AAAA records
//
// ## Security Requirements
//
// - API token NEVER appears in logs
// - API token MUST be provided via environment variables only
// - Client construction fails fast if the token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - List Zones: GET `/zones?name=...`
// - List DNS Records: GET `/zones/:zone_id/dns_records?name=...&type=...`
// - Update DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use cfdns_core::traits::{DnsUpdater, RecordRef, UpdateResult};
use cfdns_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const PROVIDER: &str = "cloudflare";

/// Cloudflare v4 response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

/// A DNS record as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

/// Full-record PUT body; unchanged fields are sent back as they were
#[derive(Debug, Serialize)]
struct RecordUpdate<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

/// Cloudflare DNS client
///
/// Stateless and single-shot: every call performs its own lookups.
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the client will:
/// - Perform all GET requests (zone lookup, record lookup)
/// - Log the intended PUT payload
/// - **NOT** actually modify DNS records
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API token.
pub struct CloudflareClient {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// API base URL (overridable for tests)
    api_base: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, perform GET requests but skip PUT updates
    dry_run: bool,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("api_token", &"<REDACTED>")
            .field("api_base", &self.api_base)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareClient {
    /// Create a new Cloudflare client
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `dry_run`: If true, perform GET requests but skip PUT updates
    ///
    /// # Errors
    ///
    /// `Error::Config` if the token is empty.
    pub fn new(api_token: impl Into<String>, dry_run: bool) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            api_base: CLOUDFLARE_API_BASE.to_string(),
            client,
            dry_run,
        })
    }

    /// Point the client at a different API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Look up the zone ID for a zone name
    ///
    /// ```http
    /// GET /zones?name=example.com&per_page=1
    /// Authorization: Bearer <token>
    /// ```
    pub async fn zone_id(&self, zone_name: &str) -> Result<String> {
        tracing::debug!("Looking up zone ID for zone: {}", zone_name);

        let request = self
            .client
            .get(format!("{}/zones", self.api_base))
            .query(&[("name", zone_name), ("per_page", "1")]);

        let zones: Vec<Zone> = self.send(request, "Zone lookup").await?;
        let zone = zones
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("Zone not found: {}", zone_name)))?;

        tracing::debug!("Found zone ID: {}", zone.id);
        Ok(zone.id)
    }

    /// Find a record by name and type
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?name=home.example.com&type=A
    /// Authorization: Bearer <token>
    /// ```
    pub async fn find_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
    ) -> Result<DnsRecord> {
        tracing::debug!("Looking up record: {} (type: {})", name, record_type);

        let request = self
            .client
            .get(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .query(&[("name", name), ("type", record_type)]);

        let records: Vec<DnsRecord> = self.send(request, "Record lookup").await?;
        records
            .into_iter()
            .find(|record| record.name == name && record.record_type == record_type)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "DNS record not found: {} (type: {})",
                    name, record_type
                ))
            })
    }

    /// Send a request and unwrap the v4 envelope
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("{}: HTTP request failed: {}", context, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status, &error_text, context));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::provider(PROVIDER, format!("{}: Failed to parse response: {}", context, e))
        })?;

        if !envelope.success {
            let messages: Vec<String> = envelope
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect();
            return Err(Error::provider(
                PROVIDER,
                format!("{} rejected: {}", context, messages.join("; ")),
            ));
        }

        envelope.result.ok_or_else(|| {
            Error::provider(
                PROVIDER,
                format!("{}: Invalid response format: missing result", context),
            )
        })
    }
}

/// Map a non-success HTTP status to an error
fn status_error(status: reqwest::StatusCode, error_text: &str, context: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::provider(
            PROVIDER,
            format!(
                "Authentication failed: Invalid API token or insufficient permissions. Status: {}",
                status
            ),
        ),
        404 => Error::not_found(format!("{}: not found. Status: {}", context, status)),
        409 => Error::provider(
            PROVIDER,
            format!(
                "Conflict: Record is being updated by another process. Status: {}",
                status
            ),
        ),
        429 => Error::provider(
            PROVIDER,
            format!("Rate limit exceeded. Please retry later. Status: {}", status),
        ),
        500..=599 => Error::provider(
            PROVIDER,
            format!(
                "Cloudflare server error (transient): {} - {}",
                status, error_text
            ),
        ),
        _ => Error::provider(
            PROVIDER,
            format!("{} failed: {} - {}", context, status, error_text),
        ),
    }
}

#[async_trait]
impl DnsUpdater for CloudflareClient {
    /// Set the content of a DNS record
    ///
    /// ```http
    /// # Find the record
    /// GET /zones/:zone_id/dns_records?name=...&type=...
    ///
    /// # Update if content differs (skipped in dry-run mode)
    /// PUT /zones/:zone_id/dns_records/:record_id
    /// { "type": "A", "name": "...", "content": "1.2.3.4", "ttl": 1, "proxied": false }
    /// ```
    async fn update_record(&self, record: &RecordRef, new_ip: IpAddr) -> Result<UpdateResult> {
        tracing::info!(
            "Updating Cloudflare DNS record: {} -> {} ({}) [mode: {}]",
            record.name,
            new_ip,
            record.record_type,
            if self.dry_run { "DRY-RUN" } else { "LIVE" }
        );

        let existing = self
            .find_record(&record.zone_id, &record.name, &record.record_type)
            .await?;

        if existing.content.parse::<IpAddr>().ok() == Some(new_ip) {
            tracing::info!(
                "DNS record already has correct IP: {} -> {}",
                record.name,
                new_ip
            );
            return Ok(UpdateResult::Unchanged { current_ip: new_ip });
        }

        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, record.zone_id, existing.id
        );
        let payload = RecordUpdate {
            record_type: &existing.record_type,
            name: &existing.name,
            content: new_ip.to_string(),
            ttl: existing.ttl,
            proxied: existing.proxied,
        };

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send PUT request to {} with payload: {}",
                url,
                serde_json::to_string(&payload).map_err(|e| Error::provider(PROVIDER, format!("Failed to serialize record update: {}", e)))?
            );
            return Ok(UpdateResult::Updated {
                previous: existing.content,
                new_ip,
            });
        }

        let request = self.client.put(&url).json(&payload);
        let _updated: DnsRecord = self.send(request, "Record update").await?;

        tracing::info!(
            "DNS record updated successfully: {} -> {} (was: {})",
            record.name,
            new_ip,
            existing.content
        );
        Ok(UpdateResult::Updated {
            previous: existing.content,
            new_ip,
        })
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
