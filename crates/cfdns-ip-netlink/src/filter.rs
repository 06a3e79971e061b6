//! Address message filter
//!
//! Accepts an address only when family, scope and interface match the
//! binding and the address itself is globally routable.

use crate::socket::family_code;
use cfdns_core::{AddressFamily, is_global_scope};
use netlink_packet_route::nlas::address::Nla as AddressNla;
use netlink_packet_route::{AddressMessage, RtnlMessage};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy)]
pub struct AddressFilter {
    family: AddressFamily,
    index: u32,
}

impl AddressFilter {
    pub fn new(family: AddressFamily, index: u32) -> Self {
        Self { family, index }
    }

    /// Global address carried by `message`, if it passes the filter
    pub fn accept(&self, message: &AddressMessage) -> Option<IpAddr> {
        let header = &message.header;
        if header.family != family_code(self.family)
            || header.scope != libc::RT_SCOPE_UNIVERSE
            || header.index != self.index
        {
            return None;
        }

        decode_address(message)
            .filter(|addr| self.family.matches(addr))
            .filter(is_global_scope)
    }

    /// Like [`AddressFilter::accept`], for `RTM_NEWADDR` notifications only
    pub fn accept_notification(&self, message: &RtnlMessage) -> Option<IpAddr> {
        match message {
            RtnlMessage::NewAddress(address) => self.accept(address),
            _ => None,
        }
    }
}

/// `IFA_ADDRESS`, falling back to `IFA_LOCAL`
fn decode_address(message: &AddressMessage) -> Option<IpAddr> {
    let address = message.nlas.iter().find_map(|nla| match nla {
        AddressNla::Address(bytes) => ip_from_bytes(bytes),
        _ => None,
    });

    address.or_else(|| {
        message.nlas.iter().find_map(|nla| match nla {
            AddressNla::Local(bytes) => ip_from_bytes(bytes),
            _ => None,
        })
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
