// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-plane RPC wire protocol.
//!
//! Design note (spec section 9): "Raw RPC (ONC) wire format" is replaced
//! with a neutral, length-prefixed schema using a small tag set — the same
//! 4-byte-big-endian-length-prefix framing convention as
//! `discovery_server/protocol.rs`, but binary fields rather than hand-rolled
//! JSON: this channel carries signatures and socket addresses, not the
//! discovery server's free-form topic/type strings, so a tag byte plus
//! fixed/length-prefixed binary fields is the simpler and more idiomatic fit
//! (consistent with the wire header codec's own no-JSON, no-serde style).

use crate::wire::bop::Signature;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Errors decoding or encoding a control-plane message.
#[derive(Debug)]
pub enum ProtocolError {
    Truncated { what: &'static str },
    UnknownTag(u8),
    InvalidUtf8,
    InvalidAddress,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { what } => write!(f, "control message truncated at {what}"),
            Self::UnknownTag(tag) => write!(f, "unknown control message tag {tag:#x}"),
            Self::InvalidUtf8 => write!(f, "control message field is not valid UTF-8"),
            Self::InvalidAddress => write!(f, "control message contains an invalid socket address"),
        }
    }
}

impl std::error::Error for ProtocolError {}

const TAG_SUBSCRIBE: u8 = 0x01;
const TAG_REQUEST_MISSED: u8 = 0x02;
const TAG_REQUEST_BACKLOG: u8 = 0x03;
const TAG_SUBSCRIBE_REPLY: u8 = 0x81;

/// Client-initiated control calls (spec section 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Subscription handshake. `receiver_endpoint` is where the sender
    /// should expect the receiver's retransmission TCP connection from.
    Subscribe {
        feed_spec: String,
        receiver_endpoint: SocketAddr,
    },
    /// Fire-and-forget: ask the sender to push a whole missed product via
    /// the retransmission channel's sender-initiated delivery path.
    RequestMissed { product_index: u32 },
    /// Fire-and-forget: ask for every product between two signatures (or
    /// from a time offset, if no previous signature is known).
    RequestBacklog {
        from_signature: Option<Signature>,
        to_signature: Signature,
        time_offset_secs: u32,
    },
}

/// Status returned in a [`ControlMessage::Subscribe`] reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeStatus {
    Accepted,
    Refused(String),
}

/// The group/port the sender publishes multicast traffic on, returned from
/// a successful subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastInfo {
    pub group: Ipv4Addr,
    pub port: u16,
}

/// Server-side reply to [`ControlMessage::Subscribe`]. `RequestMissed` and
/// `RequestBacklog` have no reply (spec section 6: "asynchronous; no
/// reply").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeReply {
    pub status: SubscribeStatus,
    pub multicast_info: Option<MulticastInfo>,
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    put_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn put_addr(out: &mut Vec<u8>, addr: SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(_) => {
            // FMTP is IPv4-multicast only (spec section 4.2); encode as a
            // zero placeholder so the frame stays fixed-shape rather than
            // erroring deep in a caller that can't usefully recover.
            out.push(6);
            out.extend_from_slice(&[0u8; 18]);
        }
    }
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize, what: &'static str) -> Result<&'a [u8], ProtocolError> {
    if bytes.len() < *pos + len {
        return Err(ProtocolError::Truncated { what });
    }
    let out = &bytes[*pos..*pos + len];
    *pos += len;
    Ok(out)
}

fn take_u32(bytes: &[u8], pos: &mut usize, what: &'static str) -> Result<u32, ProtocolError> {
    Ok(u32::from_be_bytes(take(bytes, pos, 4, what)?.try_into().unwrap()))
}

fn take_u16(bytes: &[u8], pos: &mut usize, what: &'static str) -> Result<u16, ProtocolError> {
    Ok(u16::from_be_bytes(take(bytes, pos, 2, what)?.try_into().unwrap()))
}

fn take_string(bytes: &[u8], pos: &mut usize, what: &'static str) -> Result<String, ProtocolError> {
    let len = take_u32(bytes, pos, what)? as usize;
    let raw = take(bytes, pos, len, what)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn take_addr(bytes: &[u8], pos: &mut usize) -> Result<SocketAddr, ProtocolError> {
    let kind = take(bytes, pos, 1, "address kind")?[0];
    match kind {
        4 => {
            let octets = take(bytes, pos, 4, "ipv4 address")?;
            let port = take_u16(bytes, pos, "ipv4 port")?;
            Ok(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                port,
            )))
        }
        6 => {
            let _ = take(bytes, pos, 18, "ipv6 placeholder")?;
            Err(ProtocolError::InvalidAddress)
        }
        _ => Err(ProtocolError::InvalidAddress),
    }
}

impl ControlMessage {
    /// Encode the message body (caller prepends the 4-byte length prefix).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Subscribe {
                feed_spec,
                receiver_endpoint,
            } => {
                out.push(TAG_SUBSCRIBE);
                put_string(&mut out, feed_spec);
                put_addr(&mut out, *receiver_endpoint);
            }
            Self::RequestMissed { product_index } => {
                out.push(TAG_REQUEST_MISSED);
                put_u32(&mut out, *product_index);
            }
            Self::RequestBacklog {
                from_signature,
                to_signature,
                time_offset_secs,
            } => {
                out.push(TAG_REQUEST_BACKLOG);
                out.push(u8::from(from_signature.is_some()));
                out.extend_from_slice(&from_signature.unwrap_or([0u8; 16]));
                out.extend_from_slice(to_signature);
                put_u32(&mut out, *time_offset_secs);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut pos = 0usize;
        let tag = take(bytes, &mut pos, 1, "tag")?[0];
        match tag {
            TAG_SUBSCRIBE => {
                let feed_spec = take_string(bytes, &mut pos, "feed_spec")?;
                let receiver_endpoint = take_addr(bytes, &mut pos)?;
                Ok(Self::Subscribe {
                    feed_spec,
                    receiver_endpoint,
                })
            }
            TAG_REQUEST_MISSED => {
                let product_index = take_u32(bytes, &mut pos, "product_index")?;
                Ok(Self::RequestMissed { product_index })
            }
            TAG_REQUEST_BACKLOG => {
                let has_from = take(bytes, &mut pos, 1, "has_from")?[0] != 0;
                let from_raw = take(bytes, &mut pos, 16, "from_signature")?;
                let mut from_signature = [0u8; 16];
                from_signature.copy_from_slice(from_raw);
                let to_raw = take(bytes, &mut pos, 16, "to_signature")?;
                let mut to_signature = [0u8; 16];
                to_signature.copy_from_slice(to_raw);
                let time_offset_secs = take_u32(bytes, &mut pos, "time_offset_secs")?;
                Ok(Self::RequestBacklog {
                    from_signature: has_from.then_some(from_signature),
                    to_signature,
                    time_offset_secs,
                })
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

impl SubscribeReply {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![TAG_SUBSCRIBE_REPLY];
        match &self.status {
            SubscribeStatus::Accepted => {
                out.push(1);
                let info = self.multicast_info.expect("accepted subscribe carries multicast_info");
                out.extend_from_slice(&info.group.octets());
                put_u32(&mut out, u32::from(info.port));
            }
            SubscribeStatus::Refused(reason) => {
                out.push(0);
                put_string(&mut out, reason);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut pos = 0usize;
        let tag = take(bytes, &mut pos, 1, "tag")?[0];
        if tag != TAG_SUBSCRIBE_REPLY {
            return Err(ProtocolError::UnknownTag(tag));
        }
        let accepted = take(bytes, &mut pos, 1, "accepted")?[0] != 0;
        if accepted {
            let octets = take(bytes, &mut pos, 4, "multicast group")?;
            let port = take_u32(bytes, &mut pos, "multicast port")? as u16;
            Ok(Self {
                status: SubscribeStatus::Accepted,
                multicast_info: Some(MulticastInfo {
                    group: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                    port,
                }),
            })
        } else {
            let reason = take_string(bytes, &mut pos, "refusal reason")?;
            Ok(Self {
                status: SubscribeStatus::Refused(reason),
                multicast_info: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_round_trip() {
        let msg = ControlMessage::Subscribe {
            feed_spec: "conduit/grib2".to_string(),
            receiver_endpoint: "10.0.0.5:9000".parse().unwrap(),
        };
        let bytes = msg.encode();
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn request_backlog_round_trip_with_and_without_from() {
        let with_from = ControlMessage::RequestBacklog {
            from_signature: Some([7u8; 16]),
            to_signature: [9u8; 16],
            time_offset_secs: 0,
        };
        let bytes = with_from.encode();
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), with_from);

        let without_from = ControlMessage::RequestBacklog {
            from_signature: None,
            to_signature: [9u8; 16],
            time_offset_secs: 3600,
        };
        let bytes = without_from.encode();
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), without_from);
    }

    #[test]
    fn subscribe_reply_round_trip_accepted_and_refused() {
        let accepted = SubscribeReply {
            status: SubscribeStatus::Accepted,
            multicast_info: Some(MulticastInfo {
                group: Ipv4Addr::new(239, 1, 1, 1),
                port: 6000,
            }),
        };
        assert_eq!(SubscribeReply::decode(&accepted.encode()).unwrap(), accepted);

        let refused = SubscribeReply {
            status: SubscribeStatus::Refused("unknown feed".to_string()),
            multicast_info: None,
        };
        assert_eq!(SubscribeReply::decode(&refused.encode()).unwrap(), refused);
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert!(matches!(
            ControlMessage::decode(&[0xFF]),
            Err(ProtocolError::UnknownTag(0xFF))
        ));
    }
}
