// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket setup for the multicast receive path and the TTL knob it uses.

pub mod multicast;
pub mod ttl;

pub use multicast::{multicast_addr, open_multicast_socket};
