// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-plane RPC client: the subscription handshake plus the two
//! fire-and-forget calls (`request_missed`, `request_backlog`).
//!
//! Grounded on `discovery_server/client.rs`'s length-prefixed
//! `read_message`/`send_message` pair: a 4-byte big-endian length prefix
//! followed by the encoded body, `TcpStream::connect_timeout` plus a read
//! timeout derived from `Config::subscribe_timeout`.

use crate::config::Config;
use crate::error::{FmtpError, FmtpResult};
use crate::rpc::protocol::{ControlMessage, SubscribeReply, SubscribeStatus};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

const MAX_REPLY_LEN: usize = 4096;

/// One-shot control-plane client. Every call opens its own short-lived
/// connection to the sender's control endpoint and closes it — there is no
/// persistent control socket to keep alive across a session (unlike the
/// retransmission TCP connection, which the supervisor keeps open for the
/// whole session).
pub struct RpcClient {
    sender_endpoint: SocketAddr,
    timeout: std::time::Duration,
}

impl RpcClient {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            sender_endpoint: config.sender_endpoint,
            timeout: config.subscribe_timeout,
        }
    }

    fn connect(&self) -> FmtpResult<TcpStream> {
        let stream = TcpStream::connect_timeout(&self.sender_endpoint, self.timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    fn send_framed(stream: &mut TcpStream, body: &[u8]) -> FmtpResult<()> {
        let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(body)?;
        stream.flush()?;
        Ok(())
    }

    fn recv_framed(stream: &mut TcpStream) -> FmtpResult<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_REPLY_LEN {
            return Err(FmtpError::SubscriptionRefused(format!(
                "reply too large ({len} bytes)"
            )));
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body)?;
        Ok(body)
    }

    /// Blocking subscribe call. Returns the multicast group/port on
    /// success, or `FmtpError::SubscriptionRefused` (fatal to the
    /// supervisor, per the spec's error taxonomy) on refusal or timeout.
    pub fn subscribe(&self, feed_spec: &str, receiver_endpoint: SocketAddr) -> FmtpResult<crate::rpc::protocol::MulticastInfo> {
        let mut stream = self.connect().map_err(|_| {
            FmtpError::SubscriptionRefused(format!(
                "could not reach sender at {}",
                self.sender_endpoint
            ))
        })?;
        let msg = ControlMessage::Subscribe {
            feed_spec: feed_spec.to_string(),
            receiver_endpoint,
        };
        Self::send_framed(&mut stream, &msg.encode())?;

        let body = Self::recv_framed(&mut stream).map_err(|_| FmtpError::RpcTimeout {
            call: "subscribe",
        })?;
        let reply = SubscribeReply::decode(&body)
            .map_err(|e| FmtpError::SubscriptionRefused(e.to_string()))?;
        match reply.status {
            SubscribeStatus::Accepted => reply
                .multicast_info
                .ok_or_else(|| FmtpError::SubscriptionRefused("accepted with no multicast_info".into())),
            SubscribeStatus::Refused(reason) => Err(FmtpError::SubscriptionRefused(reason)),
        }
    }

    /// Fire-and-forget: ask the sender to push a whole missed product.
    /// Whether a write timeout here counts as success is controlled by
    /// `Config::rpc_fire_and_forget_timeout_is_success` (open question #1).
    pub fn request_missed(&self, config: &Config, product_index: u32) -> FmtpResult<()> {
        self.send_fire_and_forget(
            config,
            ControlMessage::RequestMissed { product_index },
        )
    }

    /// Fire-and-forget: ask for the backlog of products between two
    /// signatures (or from a time offset, if `from_signature` is `None`).
    pub fn request_backlog(
        &self,
        config: &Config,
        from_signature: Option<[u8; 16]>,
        to_signature: [u8; 16],
        time_offset_secs: u32,
    ) -> FmtpResult<()> {
        self.send_fire_and_forget(
            config,
            ControlMessage::RequestBacklog {
                from_signature,
                to_signature,
                time_offset_secs,
            },
        )
    }

    fn send_fire_and_forget(&self, config: &Config, msg: ControlMessage) -> FmtpResult<()> {
        let mut stream = match self.connect() {
            Ok(s) => s,
            Err(e) => {
                return if config.rpc_fire_and_forget_timeout_is_success {
                    log::warn!("[rpc] fire-and-forget call could not connect, treating as success per config: {e}");
                    Ok(())
                } else {
                    Err(e)
                };
            }
        };
        match Self::send_framed(&mut stream, &msg.encode()) {
            Ok(()) => Ok(()),
            Err(e) if config.rpc_fire_and_forget_timeout_is_success => {
                log::warn!("[rpc] fire-and-forget call timed out, treating as success per config: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
