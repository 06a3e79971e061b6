//! Thin rtnetlink socket wrapper
//!
//! Two kinds of sockets are used: a request socket for one-shot dumps
//! (links, routes, addresses) and a subscriber socket bound to the
//! `RTMGRP_*_IFADDR` multicast group for address notifications.

use cfdns_core::{AddressFamily, Error, Result};
use netlink_packet_core::{
    NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload,
};
use netlink_packet_route::{AddressMessage, LinkMessage, RouteMessage, RtnlMessage};
use netlink_sys::protocols::NETLINK_ROUTE;
use netlink_sys::{AsyncSocket, AsyncSocketExt, SocketAddr, TokioSocket};

/// Kernel-side netlink family code for an address family
pub(crate) fn family_code(family: AddressFamily) -> u8 {
    match family {
        AddressFamily::V4 => libc::AF_INET as u8,
        AddressFamily::V6 => libc::AF_INET6 as u8,
    }
}

/// Multicast group carrying address notifications for a family
fn address_group(family: AddressFamily) -> u32 {
    match family {
        AddressFamily::V4 => libc::RTMGRP_IPV4_IFADDR as u32,
        AddressFamily::V6 => libc::RTMGRP_IPV6_IFADDR as u32,
    }
}

pub(crate) struct RouteSocket {
    socket: TokioSocket,
    sequence: u32,
}

impl RouteSocket {
    /// Open a socket for request/response dumps
    pub(crate) fn connect() -> Result<Self> {
        let mut socket = TokioSocket::new(NETLINK_ROUTE)
            .map_err(|e| Error::transport(format!("failed to open netlink socket: {}", e)))?;
        socket
            .socket_mut()
            .bind_auto()
            .map_err(|e| Error::transport(format!("failed to bind netlink socket: {}", e)))?;
        socket
            .socket_mut()
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::transport(format!("failed to connect netlink socket: {}", e)))?;

        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    /// Open a socket subscribed to address notifications of `family`
    pub(crate) fn subscribe(family: AddressFamily) -> Result<Self> {
        let mut socket = TokioSocket::new(NETLINK_ROUTE)
            .map_err(|e| Error::transport(format!("failed to open netlink socket: {}", e)))?;
        socket
            .socket_mut()
            .bind(&SocketAddr::new(0, address_group(family)))
            .map_err(|e| {
                Error::transport(format!(
                    "failed to subscribe to {} address notifications: {}",
                    family, e
                ))
            })?;

        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    pub(crate) async fn dump_links(&mut self) -> Result<Vec<LinkMessage>> {
        let replies = self
            .dump(RtnlMessage::GetLink(LinkMessage::default()))
            .await?;

        Ok(replies
            .into_iter()
            .filter_map(|message| match message {
                RtnlMessage::NewLink(link) => Some(link),
                _ => None,
            })
            .collect())
    }

    pub(crate) async fn dump_routes(&mut self, family: AddressFamily) -> Result<Vec<RouteMessage>> {
        let mut request = RouteMessage::default();
        request.header.address_family = family_code(family);

        let replies = self.dump(RtnlMessage::GetRoute(request)).await?;

        Ok(replies
            .into_iter()
            .filter_map(|message| match message {
                RtnlMessage::NewRoute(route) => Some(route),
                _ => None,
            })
            .collect())
    }

    pub(crate) async fn dump_addresses(
        &mut self,
        family: AddressFamily,
    ) -> Result<Vec<AddressMessage>> {
        let mut request = AddressMessage::default();
        request.header.family = family_code(family);

        let replies = self.dump(RtnlMessage::GetAddress(request)).await?;

        Ok(replies
            .into_iter()
            .filter_map(|message| match message {
                RtnlMessage::NewAddress(address) => Some(address),
                _ => None,
            })
            .collect())
    }

    /// Receive the next datagram and decode the routing messages in it
    pub(crate) async fn next_messages(&mut self) -> Result<Vec<RtnlMessage>> {
        let (bytes, _) = self
            .socket
            .recv_from_full()
            .await
            .map_err(|e| Error::transport(format!("netlink receive failed: {}", e)))?;

        Ok(decode(&bytes)?
            .into_iter()
            .filter_map(|message| match message.payload {
                NetlinkPayload::InnerMessage(inner) => Some(inner),
                _ => None,
            })
            .collect())
    }

    /// Send a dump request and collect replies until `NLMSG_DONE`
    async fn dump(&mut self, request: RtnlMessage) -> Result<Vec<RtnlMessage>> {
        self.sequence = self.sequence.wrapping_add(1);

        let mut message = NetlinkMessage::new(
            NetlinkHeader::default(),
            NetlinkPayload::InnerMessage(request),
        );
        message.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        message.header.sequence_number = self.sequence;
        message.finalize();

        let mut buf = vec![0; message.buffer_len()];
        message.serialize(&mut buf[..]);

        self.socket
            .send(&buf)
            .await
            .map_err(|e| Error::transport(format!("netlink send failed: {}", e)))?;

        let mut replies = Vec::new();
        loop {
            let (bytes, _) = self
                .socket
                .recv_from_full()
                .await
                .map_err(|e| Error::transport(format!("netlink receive failed: {}", e)))?;

            for message in decode(&bytes)? {
                match message.payload {
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    NetlinkPayload::Done(_) => return Ok(replies),
                    NetlinkPayload::Error(e) => {
                        return Err(Error::transport(format!(
                            "netlink request failed: {:?}",
                            e
                        )));
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Decode every netlink message in one datagram
fn decode(bytes: &[u8]) -> Result<Vec<NetlinkMessage<RtnlMessage>>> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let message = NetlinkMessage::<RtnlMessage>::deserialize(&bytes[offset..])
            .map_err(|e| Error::transport(format!("failed to decode netlink message: {}", e)))?;

        let length = message.header.length as usize;
        if length == 0 {
            break;
        }
        // Messages are 4-byte aligned within a datagram
        offset += (length + 3) & !3;
        messages.push(message);
    }

    Ok(messages)
}
