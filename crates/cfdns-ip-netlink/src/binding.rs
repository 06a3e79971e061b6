//! Interface resolution
//!
//! A netlink source is bound to exactly one interface for its whole life.
//! The resolution rules operate on already-decoded link and route messages.

use crate::socket::RouteSocket;
use cfdns_core::{AddressFamily, Error, Result};
use netlink_packet_route::nlas::link::Nla as LinkNla;
use netlink_packet_route::nlas::route::Nla as RouteNla;
use netlink_packet_route::{LinkMessage, RouteMessage};
use std::fmt;

/// The interface a netlink source listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBinding {
    /// Kernel interface index
    pub index: u32,
    /// Interface name (e.g. "eth0")
    pub name: String,
}

impl InterfaceBinding {
    /// Resolve against the running kernel
    ///
    /// With a name, the interface must exist exactly once; without one, the
    /// interface carrying the family's default route is used.
    pub async fn resolve(family: AddressFamily, interface: Option<&str>) -> Result<Self> {
        let mut socket = RouteSocket::connect()?;
        let links = socket.dump_links().await?;

        match interface {
            Some(name) => Self::by_name(&links, name),
            None => {
                let routes = socket.dump_routes(family).await?;
                Self::by_default_route(&routes, &links)
            }
        }
    }

    /// Pick the single link named `name`
    pub fn by_name(links: &[LinkMessage], name: &str) -> Result<Self> {
        let matching: Vec<&LinkMessage> = links
            .iter()
            .filter(|link| link_name(link) == Some(name))
            .collect();

        match matching.as_slice() {
            [link] => Ok(Self {
                index: link.header.index,
                name: name.to_string(),
            }),
            _ => Err(Error::config(format!(
                "found {} interfaces matching '{}'",
                matching.len(),
                name
            ))),
        }
    }

    /// Pick the output interface of the first default route in the main table
    pub fn by_default_route(routes: &[RouteMessage], links: &[LinkMessage]) -> Result<Self> {
        let index = routes
            .iter()
            .filter(|route| {
                route.header.destination_prefix_length == 0
                    && route.header.table == libc::RT_TABLE_MAIN
            })
            .find_map(output_interface)
            .ok_or_else(|| Error::config("no interface name given and no default route set"))?;

        let name = links
            .iter()
            .find(|link| link.header.index == index)
            .and_then(link_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("if{}", index));

        Ok(Self { index, name })
    }
}

impl fmt::Display for InterfaceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (index {})", self.name, self.index)
    }
}

fn link_name(link: &LinkMessage) -> Option<&str> {
    link.nlas.iter().find_map(|nla| match nla {
        LinkNla::IfName(name) => Some(name.as_str()),
        _ => None,
    })
}

fn output_interface(route: &RouteMessage) -> Option<u32> {
    route.nlas.iter().find_map(|nla| match nla {
        RouteNla::Oif(index) => Some(*index),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(index: u32, name: &str) -> LinkMessage {
        let mut link = LinkMessage::default();
        link.header.index = index;
        link.nlas.push(LinkNla::IfName(name.to_string()));
        link
    }

    fn route(prefix_len: u8, table: u8, oif: Option<u32>) -> RouteMessage {
        let mut route = RouteMessage::default();
        route.header.destination_prefix_length = prefix_len;
        route.header.table = table;
        if let Some(oif) = oif {
            route.nlas.push(RouteNla::Oif(oif));
        }
        route
    }

    #[test]
    fn test_by_name_exactly_one() {
        let links = vec![link(1, "lo"), link(2, "eth0"), link(3, "wlan0")];
        let binding = InterfaceBinding::by_name(&links, "eth0").unwrap();
        assert_eq!(
            binding,
            InterfaceBinding {
                index: 2,
                name: "eth0".to_string()
            }
        );
    }

    #[test]
    fn test_by_name_missing() {
        let links = vec![link(1, "lo")];
        let err = InterfaceBinding::by_name(&links, "eth0").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("found 0 interfaces matching 'eth0'"));
    }

    #[test]
    fn test_by_name_ambiguous() {
        let links = vec![link(2, "eth0"), link(7, "eth0")];
        let err = InterfaceBinding::by_name(&links, "eth0").unwrap_err();
        assert!(err.to_string().contains("found 2 interfaces"));
    }

    #[test]
    fn test_default_route_in_main_table() {
        let links = vec![link(1, "lo"), link(2, "eth0"), link(4, "wg0")];
        let routes = vec![
            // Subnet route
            route(24, libc::RT_TABLE_MAIN, Some(2)),
            // Default route in a policy table
            route(0, 100, Some(4)),
            route(0, libc::RT_TABLE_MAIN, Some(2)),
        ];

        let binding = InterfaceBinding::by_default_route(&routes, &links).unwrap();
        assert_eq!(binding.index, 2);
        assert_eq!(binding.name, "eth0");
    }

    #[test]
    fn test_default_route_without_oif_is_skipped() {
        let links = vec![link(3, "ppp0")];
        let routes = vec![
            route(0, libc::RT_TABLE_MAIN, None),
            route(0, libc::RT_TABLE_MAIN, Some(3)),
        ];

        let binding = InterfaceBinding::by_default_route(&routes, &links).unwrap();
        assert_eq!(binding.name, "ppp0");
    }

    #[test]
    fn test_no_default_route() {
        let routes = vec![route(24, libc::RT_TABLE_MAIN, Some(2))];
        let err = InterfaceBinding::by_default_route(&routes, &[]).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("no default route set"));
    }
}
