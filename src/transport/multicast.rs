// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast socket setup: join the configured group on the configured (or
//! OS-chosen) local interface, and tune it for FMTP's receive pattern.
//!
//! Simplified from the donor's multi-group RTPS discovery join (every
//! non-loopback interface joins both SPDP and SEDP groups) down to "join the
//! one configured group on the configured interface" — FMTP has no
//! discovery-protocol multi-group requirement, just a single feed.

use crate::config::Config;
use crate::error::FmtpResult;
use crate::transport::ttl;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Open and join the multicast socket named in `config`.
pub fn open_multicast_socket(config: &Config) -> FmtpResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.multicast_port);
    socket.bind(&bind_addr.into())?;

    let iface = config.local_interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    socket.join_multicast_v4(&config.multicast_group, &iface)?;
    ttl::set_multicast_ttl(&socket, ttl::DEFAULT_MULTICAST_TTL)?;

    log::debug!(
        "[transport] joined multicast group {}:{} on interface {}",
        config.multicast_group,
        config.multicast_port,
        iface
    );

    let std_socket: UdpSocket = socket.into();
    Ok(std_socket)
}

/// The [`SocketAddr`] the multicast group is published on, for logging and
/// for the reader's `recv_from` loop to compare sender addresses against.
#[must_use]
pub fn multicast_addr(config: &Config) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(config.multicast_group, config.multicast_port))
}
