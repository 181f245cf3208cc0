// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-plane RPC: subscription handshake plus the two fire-and-forget
//! calls. See `protocol.rs` for the wire schema and `client.rs` for the
//! blocking client used by the session supervisor.
//!
//! The two server-side handlers named in the spec (`deliver_missed`,
//! `notify_no_such_product`) are not a separate framing on this module:
//! spec section 6 places them "on the retransmission TCP connection", so
//! they are expressed there instead — `deliver_missed` as an ordinary
//! sender-initiated retransmitted BOP/DATA/EOP run (see
//! `retransmission::receiver`), and `notify_no_such_product` as the
//! `FLAG_NO_SUCH_PRODUCT` wire header flag.

pub mod client;
pub mod protocol;

pub use client::RpcClient;
pub use protocol::{ControlMessage, MulticastInfo, SubscribeReply, SubscribeStatus};
