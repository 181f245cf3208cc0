// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downstream receiver configuration.
//!
//! A plain, programmatically-constructed struct — there is no file-format or
//! CLI parser here (out of scope). Builder-style `with_*` setters and a
//! `validate()` mirror the donor's own per-module config structs.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default initial RTT estimate used to size the BOP timer.
pub const DEFAULT_RTT_SEED: Duration = Duration::from_millis(50);
/// Default supervisor retry-nap interval.
pub const DEFAULT_RETRY_NAP: Duration = Duration::from_secs(60);
/// Default control-channel RPC timeout.
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(25);
/// BOP timer fires after this many multiples of the measured RTT.
pub const BOP_TIMEOUT_RTT_MULTIPLE: u32 = 10;
/// Default backlog time offset used when no previous session signature is
/// on record (spec section 4.7, step 6): how far back, in seconds, to ask
/// the sender for backlog products when this is the very first session
/// against a given source/feed.
pub const DEFAULT_BACKLOG_TIME_OFFSET: Duration = Duration::from_secs(3600);

/// Configuration for one downstream (receiver) session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifies the upstream source this session subscribes to, used to
    /// key the persistent session-memory file (spec section 4.8).
    pub source_id: String,
    /// Feed specification passed to `subscribe` and used alongside
    /// `source_id` to key the session-memory file.
    pub feed_spec: String,
    /// Multicast group address data products are published to.
    pub multicast_group: Ipv4Addr,
    /// Multicast port.
    pub multicast_port: u16,
    /// Sender's TCP endpoint for subscription and retransmission.
    pub sender_endpoint: SocketAddr,
    /// Local interface to join the multicast group on. `None` means "let the
    /// OS pick" (equivalent to the spec's "all").
    pub local_interface: Option<Ipv4Addr>,
    /// Link-speed hint, in bits/second, used to derive a floor for the BOP
    /// timer below which RTT-based backoff never goes.
    pub link_speed_bps: u64,
    /// Control-channel RPC timeout.
    pub subscribe_timeout: Duration,
    /// Initial RTT estimate, before any round-trip has been measured.
    pub rtt_seed: Duration,
    /// Supervisor retry-nap interval after a session aborts.
    pub retry_nap: Duration,
    /// How far back to ask for backlog (spec section 4.7, step 6) when no
    /// previous session signature is on record — i.e. the first session ever
    /// run against this source/feed.
    pub backlog_time_offset: Duration,
    /// Path used by the embedder's product queue (opaque to this crate;
    /// carried only so it can be handed to the external collaborator).
    pub product_queue_path: String,
    /// Open question #1: treat a timed-out fire-and-forget RPC call
    /// (`request_missed`, `request_backlog`) as having succeeded.
    pub rpc_fire_and_forget_timeout_is_success: bool,
    /// Open question #2: fsync persistent session memory on every update.
    pub session_memory_fsync: bool,
}

impl Config {
    /// Construct a config with the required fields and every optional field
    /// at its documented default.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        feed_spec: impl Into<String>,
        multicast_group: Ipv4Addr,
        multicast_port: u16,
        sender_endpoint: SocketAddr,
        product_queue_path: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            feed_spec: feed_spec.into(),
            multicast_group,
            multicast_port,
            sender_endpoint,
            local_interface: None,
            link_speed_bps: 18_000_000_000_000_000, // 18 Pbps upper bound, per spec.
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            rtt_seed: DEFAULT_RTT_SEED,
            retry_nap: DEFAULT_RETRY_NAP,
            backlog_time_offset: DEFAULT_BACKLOG_TIME_OFFSET,
            product_queue_path: product_queue_path.into(),
            rpc_fire_and_forget_timeout_is_success: false,
            session_memory_fsync: true,
        }
    }

    #[must_use]
    pub fn with_local_interface(mut self, iface: Ipv4Addr) -> Self {
        self.local_interface = Some(iface);
        self
    }

    #[must_use]
    pub fn with_rtt_seed(mut self, rtt: Duration) -> Self {
        self.rtt_seed = rtt;
        self
    }

    #[must_use]
    pub fn with_retry_nap(mut self, nap: Duration) -> Self {
        self.retry_nap = nap;
        self
    }

    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_backlog_time_offset(mut self, offset: Duration) -> Self {
        self.backlog_time_offset = offset;
        self
    }

    #[must_use]
    pub fn with_rpc_fire_and_forget_timeout_is_success(mut self, value: bool) -> Self {
        self.rpc_fire_and_forget_timeout_is_success = value;
        self
    }

    #[must_use]
    pub fn without_session_memory_fsync(mut self) -> Self {
        self.session_memory_fsync = false;
        self
    }

    /// The one-way transmission delay for a single maximum-size packet at
    /// `link_speed_bps` — the "link-propagation estimate derived from
    /// configured link speed" spec section 4.6 requires as a floor under the
    /// RTT seed (at 18 Pbps this is sub-nanosecond and never binds; a slower
    /// embedder-supplied link speed makes it the effective floor instead).
    #[must_use]
    fn link_propagation_floor(&self) -> Duration {
        let bits = u64::from(crate::wire::MAX_PACKET_LEN as u32) * 8;
        Duration::from_secs_f64(bits as f64 / self.link_speed_bps as f64)
    }

    /// The BOP timer deadline for a freshly-measured (or seeded) RTT: never
    /// less than `rtt_seed`, nor less than the link-propagation floor, then
    /// multiplied out to a bounded number of round trips.
    #[must_use]
    pub fn bop_timeout(&self, measured_rtt: Duration) -> Duration {
        let rtt = measured_rtt.max(self.rtt_seed).max(self.link_propagation_floor());
        rtt * BOP_TIMEOUT_RTT_MULTIPLE
    }

    /// Validate field values; returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.multicast_port == 0 {
            return Err("multicast_port must be nonzero");
        }
        if !self.multicast_group.is_multicast() {
            return Err("multicast_group must be a multicast address");
        }
        if self.product_queue_path.is_empty() {
            return Err("product_queue_path must not be empty");
        }
        if self.source_id.is_empty() {
            return Err("source_id must not be empty");
        }
        if self.feed_spec.is_empty() {
            return Err("feed_spec must not be empty");
        }
        if self.subscribe_timeout.is_zero() {
            return Err("subscribe_timeout must be > 0");
        }
        if self.retry_nap.is_zero() {
            return Err("retry_nap must be > 0");
        }
        if self.link_speed_bps == 0 {
            return Err("link_speed_bps must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config::new(
            "source-a",
            "conduit/grib2",
            Ipv4Addr::new(239, 5, 5, 5),
            5000,
            "10.0.0.1:5001".parse().unwrap(),
            "/var/fmtp/queue",
        )
    }

    #[test]
    fn defaults_validate() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_non_multicast_group() {
        let mut cfg = sample();
        cfg.multicast_group = Ipv4Addr::new(10, 0, 0, 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_queue_path() {
        let mut cfg = sample();
        cfg.product_queue_path.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_source_id() {
        let mut cfg = sample();
        cfg.source_id.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bop_timeout_uses_seed_as_floor() {
        let cfg = sample();
        let timeout = cfg.bop_timeout(Duration::from_millis(1));
        assert_eq!(timeout, cfg.rtt_seed * BOP_TIMEOUT_RTT_MULTIPLE);
    }

    #[test]
    fn bop_timeout_scales_with_measured_rtt() {
        let cfg = sample();
        let timeout = cfg.bop_timeout(Duration::from_millis(200));
        assert_eq!(timeout, Duration::from_millis(200) * BOP_TIMEOUT_RTT_MULTIPLE);
    }

    #[test]
    fn bop_timeout_honors_link_propagation_floor_on_slow_links() {
        let mut cfg = sample();
        cfg.rtt_seed = Duration::from_micros(1);
        cfg.link_speed_bps = 9600; // a slow serial-line-class hint
        let timeout = cfg.bop_timeout(Duration::from_micros(1));
        assert!(timeout > cfg.rtt_seed * BOP_TIMEOUT_RTT_MULTIPLE);
    }
}
