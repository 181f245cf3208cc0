// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast reader: the single thread that classifies every multicast
//! packet and dispatches it into the product tracker (spec section 4.2).
//!
//! Grounded on `core/discovery/spdp_announcer.rs`'s responsive sleep-loop
//! pattern (a short socket read/recv timeout so the thread can notice the
//! shutdown flag promptly) rather than an unbounded blocking `recv`.

use crate::completion::{CompletionSender, TerminalOutcome, WorkerKind};
use crate::dispatch::{self, BlockSource};
use crate::error::FmtpError;
use crate::notifier::DeliveryFailureReason;
use crate::session::shared::SessionShared;
use crate::wire::bop::BopPayload;
use crate::wire::{Header, HEADER_LEN, MAX_PACKET_LEN};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the reader re-checks the shutdown flag while otherwise idle.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct MulticastReader {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl MulticastReader {
    #[must_use]
    pub fn spawn(
        socket: UdpSocket,
        shared: Arc<SessionShared>,
        completion_tx: CompletionSender,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .expect("setting a finite read timeout never fails");

        let handle = thread::spawn(move || {
            let outcome = reader_loop(&socket, &shared, &shutdown_clone);
            let _ = completion_tx.send(TerminalOutcome {
                worker: WorkerKind::MulticastReader,
                result: outcome,
            });
        });

        Self {
            handle: Some(handle),
            shutdown,
        }
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MulticastReader {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn reader_loop(
    socket: &UdpSocket,
    shared: &SessionShared,
    shutdown: &AtomicBool,
) -> Result<(), FmtpError> {
    let mut buf = [0u8; MAX_PACKET_LEN];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Err(FmtpError::ShutdownRequested);
        }

        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => return Err(FmtpError::Io(e)),
        };

        let packet = &buf[..n];
        let header = match Header::decode(packet) {
            Ok(h) => h,
            Err(_) => {
                shared.metrics.record_malformed_packet();
                continue;
            }
        };

        if header.is_bop() {
            handle_bop(shared, header, &packet[HEADER_LEN..]);
        } else if header.is_eop() {
            dispatch::mark_eop(shared, header.product_index);
        } else if header.is_data() {
            let payload = &packet[HEADER_LEN..HEADER_LEN + header.payload_length as usize];
            dispatch::record_block(shared, header.product_index, header.sequence, payload, BlockSource::Multicast);
        } else {
            // A retransmission-only flag combination (REQ/RETX/RETX_END)
            // arriving on the multicast group is malformed for this path.
            shared.metrics.record_malformed_packet();
        }
    }
}

fn handle_bop(shared: &SessionShared, header: Header, rest: &[u8]) {
    let index = header.product_index;
    if shared.tracker_map.contains(index) {
        return; // Duplicate BOP for a product already in flight.
    }

    let meta = match BopPayload::decode(rest) {
        Ok(m) => m,
        Err(_) => {
            shared.metrics.record_malformed_packet();
            return;
        }
    };

    dispatch::fill_bop_gap(shared, index);

    let buffer = match shared.notifier.on_bop(index, &meta) {
        Ok(buf) => buf,
        Err(reason) => {
            log::warn!("[reader] notifier refused BOP for product {index}: {reason}");
            shared.metrics.record_product_aborted();
            shared
                .notifier
                .on_delivery_failed(index, DeliveryFailureReason::SessionAborted);
            return;
        }
    };

    let signature = meta.signature;
    let tracker = crate::tracker::ProductTracker::new(meta.total_size, meta.payload_len, signature, buffer);
    if shared.tracker_map.create(index, tracker) {
        shared.missing_bop.remove(index);
        shared.observe_index(index);
        shared.notify_first_arrival(signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notifier::test_support::RecordingCollaborator;
    use crate::request_queue::request_queue;
    use crate::wire::bop::BopPayload;
    use crate::wire::{Header, FLAG_BOP};
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn test_shared_with_queue(
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
        let missing_bop = Arc::new(crate::tracker::MissingBopSet::new());
        let eop_status = Arc::new(crate::tracker::EopStatusMap::new());
        let notifier: Arc<dyn crate::notifier::ProductNotifier> = collaborator.clone();
        let queue: Arc<dyn crate::notifier::ProductQueue> = collaborator.clone();
        let timer = crate::bop_timer::BopTimer::spawn(
            Arc::clone(&missing_bop),
            Arc::clone(&eop_status),
            tx.clone(),
            notifier.clone(),
        );
        let handle = timer.handle();
        // Leaked rather than threaded through every caller's return tuple —
        // these tests only ever read `shared`, never the memory file itself.
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        let memory = Arc::new(parking_lot::Mutex::new(
            crate::session::memory::SessionMemory::open(dir.path(), "source-a", "conduit/grib2", false).unwrap(),
        ));
        let shared = Arc::new(SessionShared::new(
            config, notifier, queue, tx, handle, missing_bop, eop_status, memory,
        ));
        (shared, collaborator, timer)
    }

    fn test_shared() -> (Arc<SessionShared>, Arc<RecordingCollaborator>, crate::bop_timer::BopTimer) {
        let (tx, _rx) = request_queue();
        test_shared_with_queue(tx)
    }

    #[test]
    fn perfect_delivery_completes_exactly_once() {
        let (shared, collaborator, timer) = test_shared();

        let bop = BopPayload {
            total_size: 3000,
            signature: [0xAB; 16],
            payload_len: 1200,
            metadata: Vec::new(),
        };
        let mut bop_packet = Header::new(7, 0, 0, FLAG_BOP).encode().to_vec();
        bop_packet.extend_from_slice(&bop.encode());
        let header = Header::decode(&bop_packet).unwrap();
        handle_bop(&shared, header, &bop_packet[HEADER_LEN..]);

        for (seq, len) in [(0u32, 1200u16), (1200, 1200), (2400, 600)] {
            let mut packet = Header::new(7, seq, len, 0).encode().to_vec();
            packet.extend_from_slice(&vec![seq as u8; len as usize]);
            let header = Header::decode(&packet).unwrap();
            dispatch::record_block(
                &shared,
                header.product_index,
                header.sequence,
                &packet[HEADER_LEN..HEADER_LEN + len as usize],
                BlockSource::Multicast,
            );
        }

        dispatch::mark_eop(&shared, 7);

        assert_eq!(collaborator.inserted.lock().len(), 1);
        assert_eq!(shared.metrics.snapshot().products_completed, 1);
        assert!(!shared.tracker_map.contains(7));
        timer.shutdown();
    }

    #[test]
    fn missing_interior_block_triggers_request() {
        let (tx, rx) = request_queue();
        let (shared, _collaborator, timer) = test_shared_with_queue(tx);

        let bop = BopPayload {
            total_size: 3000,
            signature: [0xCD; 16],
            payload_len: 1200,
            metadata: Vec::new(),
        };
        let mut bop_packet = Header::new(7, 0, 0, FLAG_BOP).encode().to_vec();
        bop_packet.extend_from_slice(&bop.encode());
        let header = Header::decode(&bop_packet).unwrap();
        handle_bop(&shared, header, &bop_packet[HEADER_LEN..]);

        // seq=1200 dropped; seq=2400 arrives next.
        let mut packet = Header::new(7, 2400, 600, 0).encode().to_vec();
        packet.extend_from_slice(&[3u8; 600]);
        let header = Header::decode(&packet).unwrap();
        dispatch::record_block(
            &shared,
            header.product_index,
            header.sequence,
            &packet[HEADER_LEN..HEADER_LEN + 600],
            BlockSource::Multicast,
        );

        let item = rx.recv().unwrap();
        assert_eq!(
            item,
            crate::request_queue::QueueItem::Request(crate::wire::RequestMsg::MissingData {
                index: 7,
                seq: 1200,
                len: 1200,
            })
        );
        timer.shutdown();
    }
}
