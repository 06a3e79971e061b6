// # HTTP Echo-Service Address Source
//
// This crate provides a polling address source that asks an external echo
// service which address our requests arrive from.
//
// ## Purpose
//
// This is the source to use when the host sits behind NAT: the address
// configured on the interface is private, and only an outside observer can
// tell the public one.
//
// ## Architecture
//
// A plain-text `GET` against a fixed per-family endpoint (ipify by default),
// repeated on an interval by the shared `PollLoop`. The first fetch happens
// right after `start()`.

use async_trait::async_trait;
use cfdns_core::registry::SourceRegistry;
use cfdns_core::traits::{AddressSender, AddressSource, AddressSourceFactory, Lifecycle};
use cfdns_core::{AddressFamily, Error, PollLoop, Result, SourceConfig};

use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

const KIND: &str = "echo";

/// Echo endpoint for IPv4 (returns plain text IP)
pub const IPV4_ENDPOINT: &str = "https://api.ipify.org";

/// Echo endpoint for IPv6 (returns plain text IP)
pub const IPV6_ENDPOINT: &str = "https://api6.ipify.org";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default echo endpoint for a family
pub fn endpoint(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::V4 => IPV4_ENDPOINT,
        AddressFamily::V6 => IPV6_ENDPOINT,
    }
}

/// One-shot echo lookup, shared by `current()` and the poll task
#[derive(Debug, Clone)]
struct EchoClient {
    url: String,
    family: AddressFamily,
    client: reqwest::Client,
}

impl EchoClient {
    async fn fetch(&self) -> Result<Option<IpAddr>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::transport(format!("Request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        let body = response.text().await.map_err(|e| {
            Error::transport(format!("Failed to read response from {}: {}", self.url, e))
        })?;

        let text = body.trim();
        let addr: IpAddr = text.parse().map_err(|_| {
            Error::transport(format!("Invalid IP address from {}: {:?}", self.url, text))
        })?;

        if !self.family.matches(&addr) {
            return Err(Error::transport(format!(
                "Expected {} address from {}, got {}",
                self.family, self.url, addr
            )));
        }

        debug!(url = %self.url, %addr, "Echo service answered");
        Ok(Some(addr))
    }
}

/// Polling source backed by an HTTP echo service
pub struct HttpAddressSource {
    echo: EchoClient,
    interval: Duration,
    sender: Option<AddressSender>,
    lifecycle: Lifecycle,
    poll: Option<PollLoop>,
}

impl HttpAddressSource {
    /// Create a source polling the default endpoint for `family`
    pub fn new(family: AddressFamily, interval: Duration) -> Result<Self> {
        Self::with_url(family, interval, endpoint(family))
    }

    /// Create a source polling a custom echo endpoint
    ///
    /// The endpoint must answer with the bare address as plain text.
    pub fn with_url(
        family: AddressFamily,
        interval: Duration,
        url: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            echo: EchoClient {
                url: url.into(),
                family,
                client,
            },
            interval,
            sender: None,
            lifecycle: Lifecycle::new(KIND),
            poll: None,
        })
    }

    /// The endpoint being polled
    pub fn url(&self) -> &str {
        &self.echo.url
    }
}

#[async_trait]
impl AddressSource for HttpAddressSource {
    async fn current(&self) -> Result<Option<IpAddr>> {
        self.echo.fetch().await
    }

    fn register_callback(&mut self, sender: AddressSender) {
        self.sender = Some(sender);
    }

    async fn start(&mut self) -> Result<()> {
        let sender = self.lifecycle.begin_start_with(&mut self.sender)?;

        let echo = self.echo.clone();
        self.poll = Some(PollLoop::spawn(KIND, self.interval, sender, move || {
            let echo = echo.clone();
            async move { echo.fetch().await }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.lifecycle.begin_stop() {
            return Ok(());
        }

        match self.poll.take() {
            Some(mut poll) => poll.stop().await,
            None => Ok(()),
        }
    }

    fn family(&self) -> AddressFamily {
        self.echo.family
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn reads_on_start(&self) -> bool {
        true
    }
}

/// Factory for creating echo-service sources
pub struct HttpFactory;

#[async_trait]
impl AddressSourceFactory for HttpFactory {
    async fn create(&self, config: &SourceConfig) -> Result<Box<dyn AddressSource>> {
        match config {
            SourceConfig::Echo {
                family,
                interval_secs,
                url,
            } => {
                let interval = Duration::from_secs(*interval_secs);
                let source = match url {
                    Some(url) => HttpAddressSource::with_url(*family, interval, url.clone())?,
                    None => HttpAddressSource::new(*family, interval)?,
                };
                Ok(Box::new(source))
            }
            _ => Err(Error::config("Invalid config for echo address source")),
        }
    }
}

/// Register the echo-service source with a registry
pub fn register(registry: &mut SourceRegistry) {
    registry.register(KIND, Box::new(HttpFactory));
}
