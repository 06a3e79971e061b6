// # Outbound Socket Address Source
//
// This crate provides a polling address source that asks the local routing
// table which source address it would use to reach a well-known host.
//
// ## How It Works
//
// Binding an unspecified UDP socket and calling `connect()` makes the kernel
// pick a route and a local address without sending a single packet. The
// local address is read back and the socket is dropped.
//
// Unlike the echo source, this reports the address configured on the host,
// so behind NAT it yields the private address.

use async_trait::async_trait;
use cfdns_core::registry::SourceRegistry;
use cfdns_core::traits::{AddressSender, AddressSource, AddressSourceFactory, Lifecycle};
use cfdns_core::{AddressFamily, Error, PollLoop, Result, SourceConfig};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::debug;

const KIND: &str = "socket";

/// Default connect target for a family (Cloudflare public resolver, port 80)
pub fn default_target(family: AddressFamily) -> SocketAddr {
    match family {
        AddressFamily::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 80),
        AddressFamily::V6 => SocketAddr::new(
            IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111)),
            80,
        ),
    }
}

/// Local address the kernel picks to reach `target`
///
/// `Ok(None)` if the kernel left the local address unspecified.
async fn probe(family: AddressFamily, target: SocketAddr) -> Result<Option<IpAddr>> {
    let socket = UdpSocket::bind(SocketAddr::new(family.unspecified(), 0))
        .await
        .map_err(|e| Error::transport(format!("Failed to bind {} socket: {}", family, e)))?;

    socket
        .connect(target)
        .await
        .map_err(|e| Error::transport(format!("No route to {}: {}", target, e)))?;

    let local = socket
        .local_addr()
        .map_err(|e| Error::transport(format!("Failed to read local address: {}", e)))?
        .ip();

    if local.is_unspecified() {
        debug!(%target, "Kernel left the local address unspecified");
        return Ok(None);
    }

    Ok(Some(local))
}

/// Polling source backed by outbound socket inspection
pub struct SocketAddressSource {
    family: AddressFamily,
    target: SocketAddr,
    interval: Duration,
    sender: Option<AddressSender>,
    lifecycle: Lifecycle,
    poll: Option<PollLoop>,
}

impl SocketAddressSource {
    /// Create a source probing the default target for `family`
    pub fn new(family: AddressFamily, interval: Duration) -> Self {
        Self::with_target(family, interval, default_target(family))
    }

    /// Create a source probing a custom target
    pub fn with_target(family: AddressFamily, interval: Duration, target: SocketAddr) -> Self {
        Self {
            family,
            target,
            interval,
            sender: None,
            lifecycle: Lifecycle::new(KIND),
            poll: None,
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl AddressSource for SocketAddressSource {
    async fn current(&self) -> Result<Option<IpAddr>> {
        probe(self.family, self.target).await
    }

    fn register_callback(&mut self, sender: AddressSender) {
        self.sender = Some(sender);
    }

    async fn start(&mut self) -> Result<()> {
        let sender = self.lifecycle.begin_start_with(&mut self.sender)?;

        let (family, target) = (self.family, self.target);
        self.poll = Some(PollLoop::spawn(KIND, self.interval, sender, move || {
            probe(family, target)
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
        self.family
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn reads_on_start(&self) -> bool {
        true
    }
}

/// Factory for creating outbound socket sources
pub struct SocketFactory;

#[async_trait]
impl AddressSourceFactory for SocketFactory {
    async fn create(&self, config: &SourceConfig) -> Result<Box<dyn AddressSource>> {
        match config {
            SourceConfig::Socket {
                family,
                interval_secs,
                target,
            } => {
                let interval = Duration::from_secs(*interval_secs);
                let target = target.unwrap_or_else(|| default_target(*family));
                Ok(Box::new(SocketAddressSource::with_target(
                    *family, interval, target,
                )))
            }
            _ => Err(Error::config("Invalid config for socket address source")),
        }
    }
}

/// Register the outbound socket source with a registry
pub fn register(registry: &mut SourceRegistry) {
    registry.register(KIND, Box::new(SocketFactory));
}
