// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retransmission request queue: a FIFO fed by the multicast reader, the
//! retransmission receiver, and the BOP timer, drained in order by the
//! single requester thread (see [`crate::retransmission::requester`]).
//!
//! Grounded on `reliability/reader.rs`'s `NackScheduler`, which accumulates
//! gap-fill requests before handing them to a writer thread. FMTP's queue
//! skips the time-windowed coalescing — invariant 3 already guarantees a
//! `MissingData` is only enqueued while the bit is still clear, so there is
//! nothing to de-duplicate at send time — leaving a plain producer/consumer
//! FIFO, the shape `crossbeam::channel` is built for.

use crate::wire::RequestMsg;
use crossbeam::channel::{unbounded, Receiver, RecvError, Sender, TryRecvError};

/// An item on the request queue: either a real request or the distinguished
/// shutdown marker the supervisor uses to unblock the requester thread
/// cooperatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItem {
    Request(RequestMsg),
    Stop,
}

/// Producer handle. Cheap to clone; held by the reader, the retransmission
/// receiver, and the BOP timer.
#[derive(Clone)]
pub struct RequestQueueSender {
    tx: Sender<QueueItem>,
}

impl RequestQueueSender {
    pub fn push(&self, msg: RequestMsg) {
        // An unbounded channel send only fails if every receiver has been
        // dropped, which only happens after the requester thread has
        // already exited during shutdown; there's nothing useful to do
        // with that error here.
        let _ = self.tx.send(QueueItem::Request(msg));
    }

    /// Unblock the requester thread. Idempotent: sending `Stop` twice is
    /// harmless, the requester exits on the first one it drains.
    pub fn stop(&self) {
        let _ = self.tx.send(QueueItem::Stop);
    }
}

/// Consumer handle, owned exclusively by the requester thread.
pub struct RequestQueueReceiver {
    rx: Receiver<QueueItem>,
}

impl RequestQueueReceiver {
    /// Block until an item is available. `Err` means every sender has been
    /// dropped (the supervisor is tearing down the whole session).
    pub fn recv(&self) -> Result<QueueItem, RecvError> {
        self.rx.recv()
    }

    /// Non-blocking poll, used by tests to assert that nothing was enqueued.
    pub fn try_recv(&self) -> Result<QueueItem, TryRecvError> {
        self.rx.try_recv()
    }
}

/// Construct a fresh request queue, returning the producer/consumer pair.
#[must_use]
pub fn request_queue() -> (RequestQueueSender, RequestQueueReceiver) {
    let (tx, rx) = unbounded();
    (RequestQueueSender { tx }, RequestQueueReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let (tx, rx) = request_queue();
        tx.push(RequestMsg::MissingBop(1));
        tx.push(RequestMsg::MissingEop(2));
        assert_eq!(rx.recv().unwrap(), QueueItem::Request(RequestMsg::MissingBop(1)));
        assert_eq!(rx.recv().unwrap(), QueueItem::Request(RequestMsg::MissingEop(2)));
    }

    #[test]
    fn stop_is_observed_by_receiver() {
        let (tx, rx) = request_queue();
        tx.push(RequestMsg::MissingBop(1));
        tx.stop();
        assert_eq!(rx.recv().unwrap(), QueueItem::Request(RequestMsg::MissingBop(1)));
        assert_eq!(rx.recv().unwrap(), QueueItem::Stop);
    }

    #[test]
    fn recv_errors_once_all_senders_dropped() {
        let (tx, rx) = request_queue();
        drop(tx);
        assert!(rx.recv().is_err());
    }
}
