// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downstream receiver metrics — lock-free atomic counters, snapshot on demand.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of [`DownstreamMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub products_completed: u64,
    pub products_aborted: u64,
    pub malformed_packets_dropped: u64,
    pub missing_bop_requests: u64,
    pub missing_data_requests: u64,
    pub missing_eop_requests: u64,
    pub retransmitted_blocks_received: u64,
    pub multicast_blocks_received: u64,
}

/// Thread-safe atomic counters tracking a single downstream session.
#[derive(Debug, Default)]
pub struct DownstreamMetrics {
    products_completed: AtomicU64,
    products_aborted: AtomicU64,
    malformed_packets_dropped: AtomicU64,
    missing_bop_requests: AtomicU64,
    missing_data_requests: AtomicU64,
    missing_eop_requests: AtomicU64,
    retransmitted_blocks_received: AtomicU64,
    multicast_blocks_received: AtomicU64,
}

impl DownstreamMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_product_completed(&self) {
        self.products_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_product_aborted(&self) {
        self.products_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_packet(&self) {
        self.malformed_packets_dropped
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_bop_request(&self) {
        self.missing_bop_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_data_request(&self) {
        self.missing_data_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_eop_request(&self) {
        self.missing_eop_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmitted_block(&self) {
        self.retransmitted_blocks_received
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_multicast_block(&self) {
        self.multicast_blocks_received
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            products_completed: self.products_completed.load(Ordering::Relaxed),
            products_aborted: self.products_aborted.load(Ordering::Relaxed),
            malformed_packets_dropped: self.malformed_packets_dropped.load(Ordering::Relaxed),
            missing_bop_requests: self.missing_bop_requests.load(Ordering::Relaxed),
            missing_data_requests: self.missing_data_requests.load(Ordering::Relaxed),
            missing_eop_requests: self.missing_eop_requests.load(Ordering::Relaxed),
            retransmitted_blocks_received: self
                .retransmitted_blocks_received
                .load(Ordering::Relaxed),
            multicast_blocks_received: self.multicast_blocks_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let m = DownstreamMetrics::new();
        m.record_product_completed();
        m.record_product_completed();
        m.record_missing_data_request();

        let snap = m.snapshot();
        assert_eq!(snap.products_completed, 2);
        assert_eq!(snap.missing_data_requests, 1);
        assert_eq!(snap.products_aborted, 0);
    }
}
