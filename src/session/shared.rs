// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State shared by the four worker threads of one session iteration.
//!
//! The supervisor builds one `SessionShared` per iteration (spec section
//! 4.7, step 5: "spawn reader, requester, and receiver threads; spawn the
//! BOP timer") and hands an `Arc` to each. This is the "pass handles, not a
//! supervisor back-reference" design note from spec section 9: workers
//! reach the request queue, the tracker map, and the completion channel
//! through this shared bag, never through a pointer back to the
//! supervisor itself.

use crate::bop_timer::BopTimerHandle;
use crate::config::Config;
use crate::metrics::DownstreamMetrics;
use crate::notifier::{ProductNotifier, ProductQueue};
use crate::request_queue::RequestQueueSender;
use crate::rpc::client::RpcClient;
use crate::session::memory::SharedSessionMemory;
use crate::tracker::{EopStatusMap, MissingBopSet, TrackerMap};
use crate::wire::bop::Signature;
use crate::wire::index_is_after;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

pub struct SessionShared {
    pub config: Config,
    pub tracker_map: TrackerMap,
    /// Shared with the [`crate::bop_timer::BopTimer`] thread for this same
    /// iteration — both must see the same placeholders, or a timer firing
    /// would never find (and thus never abort) the index the reader armed.
    pub missing_bop: Arc<MissingBopSet>,
    pub eop_status: Arc<EopStatusMap>,
    pub metrics: DownstreamMetrics,
    pub notifier: Arc<dyn ProductNotifier>,
    /// The external, content-addressed product queue (spec section 1): the
    /// only two calls the core makes into it are "insert" (here, on
    /// finalize) and "most recent signature" (read once, at subscribe
    /// time, to seed the backlog request).
    pub completed: Arc<dyn ProductQueue>,
    pub request_tx: RequestQueueSender,
    pub bop_timer: BopTimerHandle,
    /// Opened once by the supervisor and reused across every iteration of
    /// one session (spec section 4.8's lifecycle), so a product finalized
    /// under one iteration and a resubscribe under the next still share the
    /// same durable record.
    pub session_memory: SharedSessionMemory,
    /// Taken and fired exactly once, by whichever of the reader/receiver
    /// threads first creates a tracker this iteration — the supervisor's
    /// one-shot backlog request (spec section 4.7, step 6) waits on the
    /// other end.
    first_arrival_tx: Mutex<Option<Sender<Signature>>>,
    last_index: AtomicU32,
    has_last_index: AtomicBool,
    finalized_index: AtomicU32,
    has_finalized_index: AtomicBool,
}

impl SessionShared {
    /// `missing_bop` and `eop_status` must be the same instances handed to
    /// the `BopTimer` spawned for this iteration (see
    /// [`crate::session::supervisor`]), so that a placeholder inserted here
    /// is the one the timer thread checks on expiry.
    #[must_use]
    pub fn new(
        config: Config,
        notifier: Arc<dyn ProductNotifier>,
        completed: Arc<dyn ProductQueue>,
        request_tx: RequestQueueSender,
        bop_timer: BopTimerHandle,
        missing_bop: Arc<MissingBopSet>,
        eop_status: Arc<EopStatusMap>,
        session_memory: SharedSessionMemory,
    ) -> Self {
        Self {
            config,
            tracker_map: TrackerMap::new(),
            missing_bop,
            eop_status,
            metrics: DownstreamMetrics::new(),
            notifier,
            completed,
            request_tx,
            bop_timer,
            session_memory,
            first_arrival_tx: Mutex::new(None),
            last_index: AtomicU32::new(0),
            has_last_index: AtomicBool::new(false),
            finalized_index: AtomicU32::new(0),
            has_finalized_index: AtomicBool::new(false),
        }
    }

    /// Register the sender side of the supervisor's one-shot "first arrival"
    /// wakeup. Must be called before any worker thread is spawned.
    pub fn set_first_arrival_notifier(&self, tx: Sender<Signature>) {
        *self.first_arrival_tx.lock() = Some(tx);
    }

    /// Fire the first-arrival wakeup, if it hasn't already fired this
    /// iteration. A no-op on every call after the first.
    pub fn notify_first_arrival(&self, signature: Signature) {
        if let Some(tx) = self.first_arrival_tx.lock().take() {
            let _ = tx.send(signature);
        }
    }

    /// Record `index` as finalized, persisting its signature as the new
    /// durable "last delivered" marker only if `index` is actually the most
    /// recent completion seen so far. Without this guard a backlog item
    /// finishing late could overwrite forward progress with a stale
    /// signature, which is exactly what spec section 4.8's monotonicity
    /// invariant rules out.
    fn note_finalized(&self, index: u32) -> bool {
        loop {
            if !self.has_finalized_index.load(Ordering::Acquire) {
                if self
                    .has_finalized_index
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.finalized_index.store(index, Ordering::Release);
                    return true;
                }
                continue;
            }
            let current = self.finalized_index.load(Ordering::Acquire);
            if !index_is_after(index, current) {
                return false;
            }
            if self
                .finalized_index
                .compare_exchange(current, index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Persist `signature` as the durable last-delivered marker for `index`,
    /// if `index` is the most recent completion observed so far this
    /// iteration.
    pub fn persist_if_most_recent(&self, index: u32, signature: Signature) {
        if !self.note_finalized(index) {
            return;
        }
        if let Err(e) = self.session_memory.lock().set_last_signature(signature) {
            log::warn!("[session] failed to persist last signature for product {index}: {e}");
        }
    }

    /// The most recent product index observed so far this session, if any.
    #[must_use]
    pub fn last_index(&self) -> Option<u32> {
        if self.has_last_index.load(Ordering::Acquire) {
            Some(self.last_index.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Record `index` as seen, advancing the "most recent" marker only if
    /// `index` is actually more recent under wraparound-aware comparison.
    pub fn observe_index(&self, index: u32) {
        loop {
            if !self.has_last_index.load(Ordering::Acquire) {
                if self
                    .has_last_index
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.last_index.store(index, Ordering::Release);
                }
                continue;
            }
            let current = self.last_index.load(Ordering::Acquire);
            if !index_is_after(index, current) {
                return;
            }
            if self
                .last_index
                .compare_exchange(current, index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Arm the BOP timer and enqueue a `MISSING_BOP` request for `index`,
    /// unless a placeholder for it is already pending. Also records `index`
    /// in durable session memory, so a crash between detecting the gap and
    /// the requester actually writing the request to the wire does not lose
    /// it (spec section 4.8).
    pub fn request_missing_bop(&self, index: u32, rtt: std::time::Duration) {
        if self.missing_bop.insert(index) {
            self.request_tx.push(crate::wire::RequestMsg::MissingBop(index));
            self.bop_timer.arm(index, self.config.bop_timeout(rtt));
            self.metrics.record_missing_bop_request();
            self.notify_request_missed(index);
            if let Err(e) = self.session_memory.lock().enqueue_missed(index) {
                log::warn!("[session] failed to durably record missing BOP for product {index}: {e}");
            }
        }
    }

    /// Re-arm a request for `index` that was already durably recorded by a
    /// prior process (spec section 4.8's crash-recovery invariant: a gap
    /// detected but not yet requested before a crash must still be
    /// requested after restart). Unlike [`Self::request_missing_bop`], this
    /// does not call `enqueue_missed` again — the index is already on
    /// disk, having been drained from there by the caller.
    pub fn resume_missing_bop(&self, index: u32, rtt: std::time::Duration) {
        if self.missing_bop.insert(index) {
            self.request_tx.push(crate::wire::RequestMsg::MissingBop(index));
            self.bop_timer.arm(index, self.config.bop_timeout(rtt));
            self.metrics.record_missing_bop_request();
            self.notify_request_missed(index);
        }
    }

    /// The control-plane counterpart to the TCP-framed `MISSING_BOP`
    /// request: a missing BOP means the whole product was missed, not just
    /// one block, so the sender is also told via `request_missed` in case
    /// block-by-block retransmission no longer has it and a `deliver_missed`
    /// push is the only way to recover it (spec section 6). Fire-and-forget
    /// from a short-lived thread, the same way the backlog request is sent,
    /// so a slow control connection never blocks the reader or receiver.
    fn notify_request_missed(&self, index: u32) {
        let config = self.config.clone();
        thread::spawn(move || {
            let rpc = RpcClient::new(&config);
            if let Err(e) = rpc.request_missed(&config, index) {
                log::warn!("[session] request_missed failed for product {index}: {e}");
            }
        });
    }
}
