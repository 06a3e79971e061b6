// # Netlink Address Source
//
// This crate provides the event-driven address source for Linux systems.
//
// ## How It Works
//
// 1. Resolve the interface once: by name (`RTM_GETLINK` dump) or from the
//    family's default route (`RTM_GETROUTE` dump)
// 2. Subscribe to `RTMGRP_IPV4_IFADDR` / `RTMGRP_IPV6_IFADDR`
// 3. Parse notifications with `netlink-packet-route`
// 4. Publish every global `RTM_NEWADDR` on the bound interface
//
// Reads from the subscription block until the kernel has something to say,
// so `stop()` drops the socket out from under the pending read.
//
// ## Platform Support
//
// Netlink is Linux-only. On other targets the factory still registers, but
// creating a source fails with a configuration error.

#[cfg(target_os = "linux")]
mod binding;
#[cfg(target_os = "linux")]
mod filter;
#[cfg(target_os = "linux")]
mod socket;
#[cfg(target_os = "linux")]
mod source;

#[cfg(target_os = "linux")]
pub use binding::InterfaceBinding;
#[cfg(target_os = "linux")]
pub use filter::AddressFilter;
#[cfg(target_os = "linux")]
pub use source::NetlinkAddressSource;

use async_trait::async_trait;
use cfdns_core::registry::SourceRegistry;
use cfdns_core::traits::{AddressSource, AddressSourceFactory};
use cfdns_core::{Error, Result, SourceConfig};

/// Factory for creating netlink address sources
pub struct NetlinkFactory;

#[cfg(target_os = "linux")]
#[async_trait]
impl AddressSourceFactory for NetlinkFactory {
    async fn create(&self, config: &SourceConfig) -> Result<Box<dyn AddressSource>> {
        match config {
            SourceConfig::Netlink { family, interface } => {
                let source = NetlinkAddressSource::new(*family, interface.as_deref()).await?;
                Ok(Box::new(source))
            }
            _ => Err(Error::config("Invalid config for netlink address source")),
        }
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait]
impl AddressSourceFactory for NetlinkFactory {
    async fn create(&self, _config: &SourceConfig) -> Result<Box<dyn AddressSource>> {
        Err(Error::config("Netlink address source is only supported on Linux"))
    }
}

/// Register the netlink address source with a registry
pub fn register(registry: &mut SourceRegistry) {
    registry.register("netlink", Box::new(NetlinkFactory));
}
