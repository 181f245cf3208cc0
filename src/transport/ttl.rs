// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TTL (Time To Live) configuration for the multicast socket.
//!
//! Receive-only traffic doesn't strictly need an outbound TTL, but setting it
//! explicitly keeps loopback testing and any future sender-side reuse honest
//! rather than depending on the OS default.

use socket2::Socket;
use std::io;

/// Default multicast TTL (link-local only; matches typical LDM-style deployments).
pub const DEFAULT_MULTICAST_TTL: u32 = 1;

/// Set the outbound multicast TTL on a raw [`socket2::Socket`].
pub fn set_multicast_ttl(socket: &Socket, ttl: u32) -> io::Result<()> {
    socket.set_multicast_ttl_v4(ttl)?;
    log::debug!("[transport] multicast TTL set to {ttl}");
    Ok(())
}
