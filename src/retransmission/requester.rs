// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retransmission requester: the single thread that drains the request
//! queue in FIFO order and writes each request to the TCP retransmission
//! socket (spec section 4.4).

use crate::completion::{CompletionSender, TerminalOutcome, WorkerKind};
use crate::error::FmtpError;
use crate::request_queue::{QueueItem, RequestQueueReceiver};
use std::io::Write;
use std::net::TcpStream;
use std::thread::{self, JoinHandle};

pub struct RetransmissionRequester {
    handle: Option<JoinHandle<()>>,
}

impl RetransmissionRequester {
    #[must_use]
    pub fn spawn(
        mut stream: TcpStream,
        queue_rx: RequestQueueReceiver,
        completion_tx: CompletionSender,
    ) -> Self {
        let handle = thread::spawn(move || {
            let outcome = requester_loop(&mut stream, &queue_rx);
            let _ = completion_tx.send(TerminalOutcome {
                worker: WorkerKind::RetransmissionRequester,
                result: outcome,
            });
        });

        Self {
            handle: Some(handle),
        }
    }

    /// The requester has no independent shutdown flag: the supervisor stops
    /// it by calling `RequestQueueSender::stop()`, which the loop observes
    /// cooperatively via the `QueueItem::Stop` marker.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn requester_loop(stream: &mut TcpStream, queue_rx: &RequestQueueReceiver) -> Result<(), FmtpError> {
    loop {
        let item = match queue_rx.recv() {
            Ok(item) => item,
            Err(_) => return Err(FmtpError::ShutdownRequested), // every sender dropped
        };

        match item {
            QueueItem::Stop => return Err(FmtpError::ShutdownRequested),
            QueueItem::Request(msg) => {
                let bytes = msg.encode();
                if let Err(e) = stream.write_all(&bytes).and_then(|()| stream.flush()) {
                    return Err(FmtpError::Io(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::completion_channel;
    use crate::request_queue::request_queue;
    use crate::wire::{Header, RequestMsg, HEADER_LEN};
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn drains_queue_in_order_and_stops_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; HEADER_LEN * 2];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let client = TcpStream::connect(addr).unwrap();
        let (req_tx, req_rx) = request_queue();
        let (comp_tx, comp_rx) = completion_channel();

        req_tx.push(RequestMsg::MissingBop(8));
        req_tx.push(RequestMsg::MissingEop(12));
        req_tx.stop();

        let requester = RetransmissionRequester::spawn(client, req_rx, comp_tx);
        let outcome = comp_rx.recv().unwrap();
        assert!(outcome.is_shutdown());
        requester.join();

        let received = server.join().unwrap();
        assert_eq!(
            Header::decode(&received[..HEADER_LEN]).unwrap(),
            Header::new(8, 0, 0, crate::wire::FLAG_RETX_REQ | crate::wire::FLAG_BOP)
        );
        assert_eq!(
            Header::decode(&received[HEADER_LEN..]).unwrap(),
            Header::new(12, 0, 0, crate::wire::FLAG_RETX_REQ | crate::wire::FLAG_EOP)
        );
    }
}
