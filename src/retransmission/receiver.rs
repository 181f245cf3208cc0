// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retransmission receiver: the thread that reads framed messages off the
//! persistent TCP retransmission socket and dispatches them the same way the
//! multicast reader dispatches datagrams (spec section 4.5).
//!
//! Framing differs from multicast: there is no datagram boundary, so every
//! message is read as a 16-byte header followed by exactly
//! `header.payload_length` bytes, with a short read timeout standing in for
//! the multicast reader's `recv` timeout so shutdown stays responsive.

use crate::completion::{CompletionSender, TerminalOutcome, WorkerKind};
use crate::dispatch::{self, BlockSource};
use crate::error::FmtpError;
use crate::notifier::DeliveryFailureReason;
use crate::session::shared::SessionShared;
use crate::wire::bop::BopPayload;
use crate::wire::{Header, HEADER_LEN};
use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct RetransmissionReceiver {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl RetransmissionReceiver {
    #[must_use]
    pub fn spawn(
        stream: TcpStream,
        shared: Arc<SessionShared>,
        completion_tx: CompletionSender,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        stream
            .set_read_timeout(Some(POLL_INTERVAL))
            .expect("setting a finite read timeout never fails");

        let handle = thread::spawn(move || {
            let outcome = receiver_loop(stream, &shared, &shutdown_clone);
            let _ = completion_tx.send(TerminalOutcome {
                worker: WorkerKind::RetransmissionReceiver,
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

impl Drop for RetransmissionReceiver {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn receiver_loop(
    mut stream: TcpStream,
    shared: &SessionShared,
    shutdown: &AtomicBool,
) -> Result<(), FmtpError> {
    let mut header_buf = [0u8; HEADER_LEN];
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Err(FmtpError::ShutdownRequested);
        }

        match read_exact_responsive(&mut stream, &mut header_buf, shutdown)? {
            ReadOutcome::WouldBlock => continue,
            ReadOutcome::Shutdown => return Err(FmtpError::ShutdownRequested),
            ReadOutcome::Got => {}
        }

        let header = Header::decode(&header_buf).map_err(|reason| FmtpError::InvalidHeader { reason })?;

        let mut payload = vec![0u8; header.payload_length as usize];
        if !payload.is_empty() {
            stream.read_exact(&mut payload)?;
        }

        dispatch_retransmitted(shared, header, &payload);
    }
}

enum ReadOutcome {
    Got,
    WouldBlock,
    Shutdown,
}

/// Read exactly `buf.len()` bytes, treating the stream's read timeout as a
/// chance to re-check `shutdown` rather than an error, and a clean EOF as a
/// session-ending condition (the sender closed the connection).
fn read_exact_responsive(
    stream: &mut TcpStream,
    buf: &mut [u8],
    shutdown: &AtomicBool,
) -> Result<ReadOutcome, FmtpError> {
    let mut filled = 0;
    while filled < buf.len() {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(ReadOutcome::Shutdown);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(FmtpError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                if filled == 0 {
                    return Ok(ReadOutcome::WouldBlock);
                }
                // Already mid-header: keep blocking for the rest of it.
                continue;
            }
            Err(e) => return Err(FmtpError::Io(e)),
        }
    }
    Ok(ReadOutcome::Got)
}

fn dispatch_retransmitted(shared: &SessionShared, header: Header, payload: &[u8]) {
    let index = header.product_index;

    if header.is_no_such_product() {
        dispatch::abort_product(shared, index);
        shared
            .notifier
            .on_delivery_failed(index, DeliveryFailureReason::NoSuchProduct);
        log::warn!("[retransmission] sender reports no such product for index {index}");
        return;
    }

    if header.is_bop() {
        handle_retx_bop(shared, index, payload);
    } else if header.is_eop() {
        dispatch::mark_eop(shared, index);
    } else if header.is_retx_end() {
        // Acknowledgement-only; the sender is freeing its own per-product
        // state. The receiver has no matching state to free here.
    } else if header.is_data() {
        dispatch::record_block(shared, index, header.sequence, payload, BlockSource::Retransmission);
    } else {
        shared.metrics.record_malformed_packet();
    }
}

fn handle_retx_bop(shared: &SessionShared, index: u32, payload: &[u8]) {
    if shared.tracker_map.contains(index) {
        return;
    }

    let meta = match BopPayload::decode(payload) {
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
            log::warn!("[retransmission] notifier refused retransmitted BOP for product {index}: {reason}");
            shared.metrics.record_product_aborted();
            shared
                .notifier
                .on_delivery_failed(index, DeliveryFailureReason::SessionAborted);
            return;
        }
    };

    let tracker = crate::tracker::ProductTracker::new(meta.total_size, meta.payload_len, meta.signature, buffer);
    if shared.tracker_map.create(index, tracker) {
        shared.missing_bop.remove(index);
        shared.observe_index(index);
        request_already_missed_blocks(shared, index);
    }
}

/// A retransmitted BOP implies the product's DATA already passed by on
/// multicast with no tracker to catch it (spec section 4.5's Retx-BOP rule:
/// "request any already-missed data blocks on this product"). Request every
/// block the fresh tracker doesn't have yet — `missing_before` bounded by
/// `u32::MAX` walks its whole bitmap rather than just the blocks seen so far.
fn request_already_missed_blocks(shared: &SessionShared, index: u32) {
    let Some(missing) = shared.tracker_map.with_mut(index, |tracker| tracker.missing_before(u32::MAX)) else {
        return;
    };
    for (seq, len) in missing {
        shared.tracker_map.with_mut(index, |tracker| tracker.note_retransmission_request());
        shared.request_tx.push(crate::wire::RequestMsg::MissingData { index, seq, len });
        shared.metrics.record_missing_data_request();
    }
}
