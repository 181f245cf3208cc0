// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed 16-byte FMTP header codec.
//!
//! The header is the only place in the crate that touches byte order. Every
//! multicast packet, TCP retransmission payload, and TCP request envelope
//! starts with this header, in network byte order (big-endian) — a deliberate
//! departure from the donor RTPS codebase's little-endian CDR2 convention,
//! since the protocol this header serves is specified against "network byte
//! order" explicitly.

pub mod bop;

pub use bop::BopPayload;

/// Size of the fixed header, in bytes.
pub const HEADER_LEN: usize = 16;

/// Largest multicast datagram FMTP will construct or accept.
pub const MAX_PACKET_LEN: usize = 1460;

/// Begin-Of-Product marker.
pub const FLAG_BOP: u16 = 0x0001;
/// End-Of-Product marker.
pub const FLAG_EOP: u16 = 0x0002;
/// Retransmission request envelope (receiver -> sender, TCP only).
pub const FLAG_RETX_REQ: u16 = 0x0008;
/// Payload arrived over the retransmission channel rather than multicast.
pub const FLAG_RETX: u16 = 0x0010;
/// Marks the end of a retransmission run for a product (sender may free state).
pub const FLAG_RETX_END: u16 = 0x0020;
/// Sender declares the product unrecoverable (the `notify_no_such_product`
/// server handler, expressed as a header-only retransmission-channel flag
/// rather than a separate RPC framing — see `DESIGN.md`).
pub const FLAG_NO_SUCH_PRODUCT: u16 = 0x0040;

/// A decoded FMTP header. Mirrors the wire layout field-for-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub product_index: u32,
    pub sequence: u32,
    pub payload_length: u16,
    pub flags: u16,
}

impl Header {
    #[must_use]
    pub fn new(product_index: u32, sequence: u32, payload_length: u16, flags: u16) -> Self {
        Self {
            product_index,
            sequence,
            payload_length,
            flags,
        }
    }

    #[must_use]
    pub fn is_bop(&self) -> bool {
        self.flags & FLAG_BOP != 0
    }

    #[must_use]
    pub fn is_eop(&self) -> bool {
        self.flags & FLAG_EOP != 0
    }

    #[must_use]
    pub fn is_data(&self) -> bool {
        self.flags & (FLAG_BOP | FLAG_EOP) == 0
    }

    #[must_use]
    pub fn is_retransmitted(&self) -> bool {
        self.flags & FLAG_RETX != 0
    }

    #[must_use]
    pub fn is_retx_request(&self) -> bool {
        self.flags & FLAG_RETX_REQ != 0
    }

    #[must_use]
    pub fn is_retx_end(&self) -> bool {
        self.flags & FLAG_RETX_END != 0
    }

    #[must_use]
    pub fn is_no_such_product(&self) -> bool {
        self.flags & FLAG_NO_SUCH_PRODUCT != 0
    }

    /// Decode a header from the first [`HEADER_LEN`] bytes of `bytes`.
    ///
    /// Rejects packets shorter than the header, payloads that would overrun
    /// the packet they arrived in, and flag combinations that can't occur
    /// (BOP and EOP set on the same packet).
    pub fn decode(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() < HEADER_LEN {
            return Err("packet shorter than FMTP header");
        }
        let product_index = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let sequence = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let payload_length = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
        let flags = u16::from_be_bytes(bytes[10..12].try_into().unwrap());
        // bytes[12..16] reserved, ignored on decode.

        if flags & FLAG_BOP != 0 && flags & FLAG_EOP != 0 {
            return Err("BOP and EOP set simultaneously");
        }
        if payload_length as usize > bytes.len().saturating_sub(HEADER_LEN) {
            return Err("payload_length exceeds packet bounds");
        }
        Ok(Self {
            product_index,
            sequence,
            payload_length,
            flags,
        })
    }

    /// Encode this header into a fresh 16-byte buffer (no payload).
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.product_index.to_be_bytes());
        out[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        out[8..10].copy_from_slice(&self.payload_length.to_be_bytes());
        out[10..12].copy_from_slice(&self.flags.to_be_bytes());
        out
    }
}

/// Recency window used to interpret product-index wraparound (spec section
/// 3: "wrap-around is defined by unsigned comparison with a recency window
/// <= 2^31").
pub const RECENCY_WINDOW: u32 = 1 << 31;

/// `true` if `a` is strictly more recent than `b`, under modular
/// arithmetic bounded by [`RECENCY_WINDOW`]. Equivalent to the classic
/// TCP/serial-number-arithmetic comparison (RFC 1982): `a` is after `b` iff
/// `a.wrapping_sub(b)` is a nonzero value less than half the number space.
#[must_use]
pub fn index_is_after(a: u32, b: u32) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < RECENCY_WINDOW
}

/// A retransmission request, as enqueued by the reader/BOP-timer and drained
/// by the requester thread. All four kinds share the header's 16-byte
/// envelope on the wire (see [`Header::encode`] plus the appropriate flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMsg {
    MissingBop(u32),
    MissingData { index: u32, seq: u32, len: u16 },
    MissingEop(u32),
    RetxEnd(u32),
}

impl RequestMsg {
    /// Encode this request into its 16-byte wire envelope.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let header = match *self {
            RequestMsg::MissingBop(index) => {
                Header::new(index, 0, 0, FLAG_RETX_REQ | FLAG_BOP)
            }
            RequestMsg::MissingData { index, seq, len } => {
                Header::new(index, seq, len, FLAG_RETX_REQ)
            }
            RequestMsg::MissingEop(index) => {
                Header::new(index, 0, 0, FLAG_RETX_REQ | FLAG_EOP)
            }
            RequestMsg::RetxEnd(index) => Header::new(index, 0, 0, FLAG_RETX_END),
        };
        header.encode()
    }

    /// Decode a request envelope previously produced by [`RequestMsg::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, &'static str> {
        let h = Header::decode(bytes)?;
        if h.is_retx_end() {
            return Ok(RequestMsg::RetxEnd(h.product_index));
        }
        if !h.is_retx_request() {
            return Err("not a request envelope");
        }
        if h.is_bop() {
            Ok(RequestMsg::MissingBop(h.product_index))
        } else if h.is_eop() {
            Ok(RequestMsg::MissingEop(h.product_index))
        } else {
            Ok(RequestMsg::MissingData {
                index: h.product_index,
                seq: h.sequence,
                len: h.payload_length,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = Header::new(7, 1200, 1200, 0);
        let bytes = h.encode();
        let mut packet = bytes.to_vec();
        packet.extend_from_slice(&[0u8; 1200]);
        assert_eq!(Header::decode(&packet).unwrap(), h);
    }

    #[test]
    fn rejects_short_packet() {
        assert!(Header::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn rejects_bop_and_eop_together() {
        let h = Header::new(1, 0, 0, FLAG_BOP | FLAG_EOP);
        let bytes = h.encode();
        assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_overrunning_payload_length() {
        let h = Header::new(1, 0, 100, 0);
        let bytes = h.encode();
        // Only the 16-byte header is present; payload_length claims 100 more.
        assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn data_flag_classification() {
        let bop = Header::new(1, 0, 0, FLAG_BOP);
        let eop = Header::new(1, 0, 0, FLAG_EOP);
        let data = Header::new(1, 0, 0, 0);
        assert!(bop.is_bop() && !bop.is_data());
        assert!(eop.is_eop() && !eop.is_data());
        assert!(data.is_data() && !data.is_bop() && !data.is_eop());
    }

    #[test]
    fn index_is_after_handles_wraparound() {
        assert!(index_is_after(10, 5));
        assert!(!index_is_after(5, 10));
        assert!(!index_is_after(5, 5));
        assert!(index_is_after(1, u32::MAX));
        assert!(!index_is_after(u32::MAX, 1));
    }

    #[test]
    fn request_envelope_round_trip() {
        for req in [
            RequestMsg::MissingBop(8),
            RequestMsg::MissingData {
                index: 7,
                seq: 1200,
                len: 1200,
            },
            RequestMsg::MissingEop(12),
            RequestMsg::RetxEnd(7),
        ] {
            let bytes = req.encode();
            assert_eq!(RequestMsg::decode(&bytes).unwrap(), req);
        }
    }
}
