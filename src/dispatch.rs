// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared per-product dispatch logic used by both the multicast reader and
//! the retransmission receiver (spec section 4.5's race policy: "the
//! tracker-map lock plus the per-block 'already set' check make duplicates
//! idempotent; whichever arrives first wins, the second is a no-op").
//!
//! Factoring this out of both reader threads is what makes invariant 6
//! ("ordering under mixed paths") hold structurally rather than by
//! convention: there is exactly one code path that records a block, marks
//! an EOP, or finalizes a product, regardless of which socket it arrived
//! on.

use crate::session::shared::SessionShared;
use crate::tracker::RecordOutcome;
use crate::wire::RequestMsg;

/// Which socket a block arrived on — only affects which metrics counter is
/// bumped; the tracker-map semantics are identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    Multicast,
    Retransmission,
}

/// Record a DATA block for `index` at `header.sequence`, enqueueing
/// `MISSING_DATA` for any still-unfilled earlier blocks, and finalizing the
/// product if this block completes it.
pub fn record_block(shared: &SessionShared, index: u32, seq: u32, payload: &[u8], source: BlockSource) {
    if !shared.tracker_map.contains(index) {
        if source == BlockSource::Multicast && crate::wire::index_is_after(index, shared.last_index().unwrap_or(0)) {
            shared.request_missing_bop(index, shared.config.rtt_seed);
        }
        return;
    }

    shared.tracker_map.with_mut(index, |tracker| {
        match tracker.record_block(seq, payload) {
            RecordOutcome::First => {
                match source {
                    BlockSource::Multicast => shared.metrics.record_multicast_block(),
                    BlockSource::Retransmission => shared.metrics.record_retransmitted_block(),
                }
                for (miss_seq, len) in tracker.missing_before(seq) {
                    tracker.note_retransmission_request();
                    shared.request_tx.push(RequestMsg::MissingData {
                        index,
                        seq: miss_seq,
                        len,
                    });
                    shared.metrics.record_missing_data_request();
                }
                if tracker.is_complete() {
                    finalize(shared, index);
                } else if tracker.note_eop_request_needed() {
                    shared.request_tx.push(RequestMsg::MissingEop(index));
                    shared.metrics.record_missing_eop_request();
                }
            }
            RecordOutcome::Duplicate => {}
            RecordOutcome::OutOfRange => shared.metrics.record_malformed_packet(),
        }
    });
}

/// Mark EOP for `index`, requesting its BOP if no tracker exists yet, and
/// finalizing the product if EOP completes it.
pub fn mark_eop(shared: &SessionShared, index: u32) {
    shared.eop_status.mark(index);

    if !shared.tracker_map.contains(index) {
        shared.request_missing_bop(index, shared.config.rtt_seed);
        return;
    }

    let complete = shared
        .tracker_map
        .with_mut(index, |tracker| {
            tracker.mark_eop();
            tracker.is_complete()
        })
        .unwrap_or(false);

    if complete {
        finalize(shared, index);
    }
}

/// Remove a completed tracker, hand its bytes to the external product
/// queue, and clean up the auxiliary bookkeeping for `index`.
pub fn finalize(shared: &SessionShared, index: u32) {
    let Some(tracker) = shared.tracker_map.remove(index) else {
        return;
    };
    let issued_retransmissions = tracker.retransmission_requests_issued() > 0;
    let signature = tracker.signature;
    let bytes = tracker.finalize();

    shared.eop_status.forget(index);
    shared.missing_bop.remove(index);
    shared.metrics.record_product_completed();
    if issued_retransmissions {
        shared.request_tx.push(RequestMsg::RetxEnd(index));
    }
    shared.persist_if_most_recent(index, signature);
    shared.completed.insert(signature, bytes);
}

/// Enqueue `MISSING_BOP` for every index strictly between the last observed
/// index and `index`, skipping any that already have a tracker or
/// placeholder.
pub fn fill_bop_gap(shared: &SessionShared, index: u32) {
    let Some(last) = shared.last_index() else {
        return;
    };
    if !crate::wire::index_is_after(index, last.wrapping_add(1)) {
        return;
    }
    let mut gap = last.wrapping_add(1);
    while gap != index {
        if !shared.tracker_map.contains(gap) {
            shared.request_missing_bop(gap, shared.config.rtt_seed);
        }
        gap = gap.wrapping_add(1);
    }
}

/// Drop a tracker/placeholder unrecoverably: the BOP timer expiring, or the
/// sender reporting `notify_no_such_product`.
pub fn abort_product(shared: &SessionShared, index: u32) {
    shared.tracker_map.remove(index);
    shared.missing_bop.remove(index);
    shared.eop_status.forget(index);
    shared.metrics.record_product_aborted();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notifier::test_support::RecordingCollaborator;
    use crate::notifier::{ProductNotifier, ProductQueue};
    use crate::request_queue::{request_queue, QueueItem};
    use crate::tracker::{EopStatusMap, MissingBopSet, ProductTracker, VecBuffer};
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn test_shared(
        tx: crate::request_queue::RequestQueueSender,
    ) -> (Arc<SessionShared>, Arc<RecordingCollaborator>, crate::bop_timer::BopTimer) {
        let config = Config::new(
            "source-a",
            "conduit/grib2",
            Ipv4Addr::new(239, 1, 1, 1),
            6000,
            "10.0.0.1:6001".parse().unwrap(),
            "/tmp/q",
        );
        let collaborator = Arc::new(RecordingCollaborator::default());
        let missing_bop = Arc::new(MissingBopSet::new());
        let eop_status = Arc::new(EopStatusMap::new());
        let notifier: Arc<dyn ProductNotifier> = collaborator.clone();
        let queue: Arc<dyn ProductQueue> = collaborator.clone();
        let timer = crate::bop_timer::BopTimer::spawn(
            Arc::clone(&missing_bop),
            Arc::clone(&eop_status),
            tx.clone(),
            notifier.clone(),
        );
        let handle = timer.handle();
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(parking_lot::Mutex::new(
            crate::session::memory::SessionMemory::open(dir.path(), "source-a", "conduit/grib2", false).unwrap(),
        ));
        let shared = Arc::new(SessionShared::new(
            config, notifier, queue, tx, handle, missing_bop, eop_status, memory,
        ));
        (shared, collaborator, timer)
    }

    /// Spec section 4.2's DATA rule: "if absent and index is within the
    /// recency window, enqueue MISSING_BOP and drop the packet" — a stale,
    /// far-wrapped index must just be dropped, not turned into a spurious
    /// request and armed BOP timer.
    #[test]
    fn stale_multicast_data_without_tracker_is_dropped_not_requested() {
        let (tx, rx) = request_queue();
        let (shared, _collaborator, timer) = test_shared(tx);

        shared.observe_index(1_000_000);
        // Far behind the recency window relative to the last observed index.
        let stale_index = 1_000_000u32.wrapping_add(crate::wire::RECENCY_WINDOW);
        record_block(&shared, stale_index, 0, &[1u8; 100], BlockSource::Multicast);

        assert!(rx.try_recv().is_err());
        assert!(!shared.missing_bop.contains(stale_index));
        timer.shutdown();
    }

    /// Spec section 8's "Missing interior block" / "Lost EOP only" scenario:
    /// all DATA for a product arrives but EOP does not — the last block
    /// landing must enqueue exactly one `MISSING_EOP`, and a later
    /// retransmitted EOP must then finalize the product.
    #[test]
    fn all_blocks_received_without_eop_requests_eop_exactly_once() {
        let (tx, rx) = request_queue();
        let (shared, collaborator, timer) = test_shared(tx);

        let tracker = ProductTracker::new(1200, 1200, [0x22; 16], Box::new(VecBuffer::new(1200)));
        assert!(shared.tracker_map.create(12, tracker));

        record_block(&shared, 12, 0, &[9u8; 1200], BlockSource::Multicast);

        assert_eq!(rx.recv().unwrap(), QueueItem::Request(RequestMsg::MissingEop(12)));
        assert!(shared.tracker_map.contains(12));
        assert_eq!(collaborator.inserted.lock().len(), 0);

        // A duplicate arrival of the same (already-complete) block must not
        // enqueue a second MISSING_EOP.
        record_block(&shared, 12, 0, &[9u8; 1200], BlockSource::Multicast);
        assert!(rx.try_recv().is_err());

        mark_eop(&shared, 12);
        assert!(!shared.tracker_map.contains(12));
        assert_eq!(collaborator.inserted.lock().len(), 1);
        timer.shutdown();
    }

    /// Spec section 8's "Missing BOP" scenario: product_index=10 arrives
    /// while the receiver's last observed index is 7 — the gap at 8 and 9
    /// must each get exactly one placeholder and one `MISSING_BOP` request,
    /// and a retransmitted BOP for one of them must clear only that
    /// placeholder.
    #[test]
    fn bop_gap_places_one_placeholder_per_missing_index() {
        let (tx, rx) = request_queue();
        let (shared, _collaborator, timer) = test_shared(tx);

        shared.observe_index(7);
        fill_bop_gap(&shared, 10);

        assert_eq!(rx.recv().unwrap(), QueueItem::Request(RequestMsg::MissingBop(8)));
        assert_eq!(rx.recv().unwrap(), QueueItem::Request(RequestMsg::MissingBop(9)));
        assert!(rx.try_recv().is_err());
        assert!(shared.missing_bop.contains(8));
        assert!(shared.missing_bop.contains(9));

        // Sender delivers the retransmitted BOP for 8 only; 9 stays pending.
        let tracker = ProductTracker::new(100, 100, [0x33; 16], Box::new(VecBuffer::new(100)));
        assert!(shared.tracker_map.create(8, tracker));
        shared.missing_bop.remove(8);

        assert!(!shared.missing_bop.contains(8));
        assert!(shared.missing_bop.contains(9));
        timer.shutdown();
    }
}
