// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! BOP timer: bounded wait for the opening marker of an out-of-order
//! product (spec section 4.6).
//!
//! Grounded on `core/discovery/spdp_announcer.rs`'s spawn/shutdown/Drop
//! lifecycle and responsive sleep loop (`Instant::now() < deadline`, waking
//! early on a shutdown flag), generalized from "one fixed-period
//! announcement" to "many independent per-product deadlines, added and
//! removed as gaps are detected and resolved" — the earliest pending
//! deadline drives how long the thread sleeps before re-checking.

use crate::notifier::{DeliveryFailureReason, ProductNotifier};
use crate::request_queue::RequestQueueSender;
use crate::tracker::{EopStatusMap, MissingBopSet};
use crate::wire::RequestMsg;
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct Pending {
    heap: BinaryHeap<Reverse<(Instant, u32)>>,
}

/// Shared handle used to register a new deadline whenever a BOP gap is
/// detected (by the multicast reader or the retransmission receiver).
#[derive(Clone)]
pub struct BopTimerHandle {
    pending: Arc<Mutex<Pending>>,
    wake: Arc<Condvar>,
}

impl BopTimerHandle {
    /// Register index `i` as missing its BOP, due to fire after `timeout`.
    pub fn arm(&self, index: u32, timeout: Duration) {
        let mut pending = self.pending.lock();
        pending.heap.push(Reverse((Instant::now() + timeout, index)));
        self.wake.notify_one();
    }
}

/// The BOP timer worker. Owns one background thread; `shutdown()` (or
/// `Drop`) stops it.
pub struct BopTimer {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    control: BopTimerHandle,
}

impl BopTimer {
    #[must_use]
    pub fn spawn(
        missing_bop: Arc<MissingBopSet>,
        eop_status: Arc<EopStatusMap>,
        request_tx: RequestQueueSender,
        notifier: Arc<dyn ProductNotifier>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(Mutex::new(Pending {
            heap: BinaryHeap::new(),
        }));
        let wake = Arc::new(Condvar::new());

        let control = BopTimerHandle {
            pending: Arc::clone(&pending),
            wake: Arc::clone(&wake),
        };

        let shutdown_clone = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            timer_loop(
                pending,
                wake,
                shutdown_clone,
                missing_bop,
                eop_status,
                request_tx,
                notifier,
            );
        });

        Self {
            handle: Some(handle),
            shutdown,
            control,
        }
    }

    /// A cloneable handle callers use to arm new deadlines without needing
    /// a reference to the `BopTimer` itself.
    #[must_use]
    pub fn handle(&self) -> BopTimerHandle {
        self.control.clone()
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.control.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BopTimer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.control.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn timer_loop(
    pending: Arc<Mutex<Pending>>,
    wake: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    missing_bop: Arc<MissingBopSet>,
    eop_status: Arc<EopStatusMap>,
    request_tx: RequestQueueSender,
    notifier: Arc<dyn ProductNotifier>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let mut guard = pending.lock();
        let next_deadline = guard.heap.peek().map(|Reverse((deadline, _))| *deadline);

        let Some(deadline) = next_deadline else {
            // Nothing pending; sleep until woken by a new `arm()` or shutdown.
            wake.wait_for(&mut guard, Duration::from_millis(500));
            continue;
        };

        let now = Instant::now();
        if now < deadline {
            wake.wait_for(&mut guard, deadline - now);
            continue;
        }

        let Reverse((_, index)) = guard.heap.pop().expect("peeked entry still present");
        drop(guard);

        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        // The gap may have been resolved (BOP arrived) while this deadline
        // was pending; only fire the abort if the placeholder is still
        // there.
        if missing_bop.remove(index) {
            log::warn!("[bop_timer] product {index} timed out waiting for BOP");
            eop_status.forget(index);
            request_tx.push(RequestMsg::RetxEnd(index));
            notifier.on_delivery_failed(index, DeliveryFailureReason::BopTimeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::test_support::RecordingCollaborator;
    use crate::request_queue::{request_queue, QueueItem};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fires_after_timeout_when_placeholder_still_present() {
        let missing_bop = Arc::new(MissingBopSet::new());
        missing_bop.insert(8);
        let eop_status = Arc::new(EopStatusMap::new());
        let (tx, rx) = request_queue();
        let collaborator = Arc::new(RecordingCollaborator::default());

        let timer = BopTimer::spawn(
            Arc::clone(&missing_bop),
            Arc::clone(&eop_status),
            tx,
            collaborator.clone(),
        );
        timer.handle().arm(8, Duration::from_millis(20));

        // Drain the RetxEnd request the timer pushes on abort.
        let item = rx.recv().unwrap();
        assert_eq!(item, QueueItem::Request(RequestMsg::RetxEnd(8)));

        assert!(!missing_bop.contains(8));
        assert_eq!(collaborator.failed.lock().len(), 1);
        timer.shutdown();
    }

    #[test]
    fn does_not_fire_when_placeholder_already_resolved() {
        let missing_bop = Arc::new(MissingBopSet::new());
        missing_bop.insert(9);
        let eop_status = Arc::new(EopStatusMap::new());
        let (tx, _rx) = request_queue();
        let collaborator = Arc::new(RecordingCollaborator::default());

        let timer = BopTimer::spawn(
            Arc::clone(&missing_bop),
            Arc::clone(&eop_status),
            tx,
            collaborator.clone(),
        );
        timer.handle().arm(9, Duration::from_millis(200));
        missing_bop.remove(9); // BOP arrived before the timer fired.

        thread::sleep(Duration::from_millis(300));
        assert_eq!(collaborator.failed.lock().len(), 0);
        timer.shutdown();
    }
}
