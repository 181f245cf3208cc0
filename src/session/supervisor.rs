// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session supervisor: the state machine that owns one downstream session's
//! lifecycle (spec section 4.7) — subscribe, spawn the three long-running
//! worker threads plus the BOP timer, wait for any of them to fail or for
//! `stop()`, and nap-and-retry on a transient session abort.
//!
//! Grounded on `core/discovery/spdp_announcer.rs`'s spawn/shutdown/Drop
//! lifecycle (the same file every worker thread in this crate is grounded
//! on — see `DESIGN.md`), generalized here from "one announcement thread"
//! to "one driver thread that owns a whole session iteration, including
//! three sub-workers of its own".

use crate::bop_timer::BopTimer;
use crate::completion::completion_channel;
use crate::config::Config;
use crate::error::{FmtpError, Severity};
use crate::notifier::{ProductNotifier, ProductQueue};
use crate::reader::MulticastReader;
use crate::request_queue::request_queue;
use crate::retransmission::{RetransmissionReceiver, RetransmissionRequester};
use crate::rpc::client::RpcClient;
use crate::session::memory::{SessionMemory, SharedSessionMemory};
use crate::session::shared::SessionShared;
use crate::tracker::{EopStatusMap, MissingBopSet};
use crate::transport;
use crate::wire::bop::Signature;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the driver loop re-checks `stop_requested` while otherwise
/// idle, whether waiting on worker completion or napping after a failure.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// States of [`Supervisor`]'s lifecycle (spec section 4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initialized,
    Executing,
    Nap,
    Stopping,
    Stopped,
}

/// The condition-variable-guarded state cell the driver thread updates and
/// `stop()`/`state()` observe from any other thread.
struct StateCell {
    state: Mutex<SupervisorState>,
    wake: Condvar,
}

impl StateCell {
    fn new(initial: SupervisorState) -> Self {
        Self {
            state: Mutex::new(initial),
            wake: Condvar::new(),
        }
    }

    fn set(&self, next: SupervisorState) {
        *self.state.lock() = next;
        self.wake.notify_all();
    }

    fn get(&self) -> SupervisorState {
        *self.state.lock()
    }

    /// Sleep up to `timeout`, waking early the moment `stop_requested` flips.
    /// A condvar wait can return before its full duration elapses for
    /// reasons unrelated to `stop()`, so re-check the deadline in a loop
    /// rather than trusting a single `wait_for` call.
    fn nap(&self, timeout: Duration, stop_requested: &AtomicBool) {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock();
        loop {
            if stop_requested.load(Ordering::Relaxed) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            self.wake.wait_for(&mut guard, deadline - now);
        }
    }
}

/// Owns one downstream session's lifecycle: subscription, the tracker map
/// and its auxiliary bookkeeping, the request queue, and all long-running
/// worker threads for every iteration it runs (spec section 3:
/// "Ownership").
pub struct Supervisor {
    config: Config,
    memory_dir: PathBuf,
    notifier: Arc<dyn ProductNotifier>,
    completed: Arc<dyn ProductQueue>,
    state: Arc<StateCell>,
    stop_requested: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        config: Config,
        memory_dir: impl Into<PathBuf>,
        notifier: Arc<dyn ProductNotifier>,
        completed: Arc<dyn ProductQueue>,
    ) -> Self {
        Self {
            config,
            memory_dir: memory_dir.into(),
            notifier,
            completed,
            state: Arc::new(StateCell::new(SupervisorState::Initialized)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(None)),
            driver: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state.get()
    }

    /// The most recent fatal or session-aborting error, if any. Cleared only
    /// by constructing a new `Supervisor`.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Open session memory and start the driver thread. A no-op if already
    /// started (spec section 4.7: `INITIALIZED` -> `EXECUTING` on `start()`).
    pub fn start(&self) {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return;
        }

        let config = self.config.clone();
        let memory_dir = self.memory_dir.clone();
        let notifier = Arc::clone(&self.notifier);
        let completed = Arc::clone(&self.completed);
        let state = Arc::clone(&self.state);
        let stop_requested = Arc::clone(&self.stop_requested);
        let last_error = Arc::clone(&self.last_error);

        *driver = Some(thread::spawn(move || {
            run_loop(config, memory_dir, notifier, completed, state, stop_requested, last_error);
        }));
    }

    /// Request a clean shutdown (spec section 5: "sets a shutdown flag and
    /// signals all condition variables"). Idempotent and safe to call before
    /// `start()`, from `NAP`, or from `EXECUTING`.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
        self.state.wake.notify_all();
    }

    /// Block until the driver thread has reached `STOPPED`. A no-op if
    /// `start()` was never called.
    pub fn join(&self) {
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Convenience: request shutdown and block until it completes.
    pub fn stop_and_join(&self) {
        self.stop();
        self.join();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

/// The driver thread's top-level loop: `EXECUTING` <-> `NAP` until a fatal
/// error or `stop()`, then `STOPPING` -> `STOPPED`.
#[allow(clippy::too_many_arguments)]
fn run_loop(
    config: Config,
    memory_dir: PathBuf,
    notifier: Arc<dyn ProductNotifier>,
    completed: Arc<dyn ProductQueue>,
    state: Arc<StateCell>,
    stop_requested: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    if let Err(reason) = config.validate() {
        log::error!("[supervisor] invalid configuration: {reason}");
        *last_error.lock() = Some(reason.to_string());
        state.set(SupervisorState::Stopped);
        return;
    }

    let memory = match SessionMemory::open(
        &memory_dir,
        &config.source_id,
        &config.feed_spec,
        config.session_memory_fsync,
    ) {
        Ok(m) => Arc::new(Mutex::new(m)),
        Err(e) => {
            log::error!("[supervisor] failed to open session memory: {e}");
            *last_error.lock() = Some(e.to_string());
            state.set(SupervisorState::Stopped);
            return;
        }
    };

    loop {
        if stop_requested.load(Ordering::Relaxed) {
            break;
        }
        state.set(SupervisorState::Executing);

        match run_iteration(&config, &notifier, &completed, &memory, &stop_requested) {
            IterationOutcome::Stopped => break,
            IterationOutcome::Fatal(e) => {
                log::error!("[supervisor] fatal session error, stopping: {e}");
                *last_error.lock() = Some(e.to_string());
                break;
            }
            IterationOutcome::Retry(e) => {
                log::warn!("[supervisor] session iteration aborted, napping before retry: {e}");
                *last_error.lock() = Some(e.to_string());
                state.set(SupervisorState::Nap);
                state.nap(config.retry_nap, &stop_requested);
                if stop_requested.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }

    state.set(SupervisorState::Stopping);
    drop(memory); // Closes the session memory file (spec section 4.8's lifecycle).
    state.set(SupervisorState::Stopped);
}

/// How one session iteration ended, already classified against the error
/// taxonomy in spec section 7.
enum IterationOutcome {
    /// Clean shutdown: `stop()` was requested, or a worker reported one.
    Stopped,
    /// A session-level (not product-level) failure; nap and retry.
    Retry(FmtpError),
    /// Unrecoverable; the supervisor stops and surfaces the error.
    Fatal(FmtpError),
}

fn classify(e: FmtpError) -> IterationOutcome {
    match e.severity() {
        Severity::Fatal => IterationOutcome::Fatal(e),
        Severity::Shutdown => IterationOutcome::Stopped,
        Severity::SessionAbort | Severity::Continue | Severity::ProductAbort => IterationOutcome::Retry(e),
    }
}

/// One full session iteration (spec section 4.7): subscribe, open sockets,
/// spawn workers, wait, and tear everything down cooperatively before
/// returning.
fn run_iteration(
    config: &Config,
    notifier: &Arc<dyn ProductNotifier>,
    completed: &Arc<dyn ProductQueue>,
    memory: &SharedSessionMemory,
    stop_requested: &Arc<AtomicBool>,
) -> IterationOutcome {
    // Step 3 (opened early so its local address can be offered to the
    // sender as `receiver_endpoint` in the subscribe call below): the TCP
    // connection used for retransmission for the rest of this iteration.
    let retrans_stream = match TcpStream::connect(config.sender_endpoint) {
        Ok(s) => s,
        Err(e) => return classify(FmtpError::Io(e)),
    };
    let receiver_endpoint = match retrans_stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => return classify(FmtpError::Io(e)),
    };

    // Step 1: subscribe.
    let rpc = RpcClient::new(config);
    let multicast_info = match rpc.subscribe(&config.feed_spec, receiver_endpoint) {
        Ok(info) => info,
        Err(e) => return classify(e),
    };

    // The sender's reply authoritatively names the multicast group/port for
    // this subscription; `config`'s own fields are only the defaults used
    // before the first successful subscribe (see `DESIGN.md`).
    let mut effective_config = config.clone();
    effective_config.multicast_group = multicast_info.group;
    effective_config.multicast_port = multicast_info.port;

    // Step 2: open multicast socket, joining the group named by subscribe.
    let multicast_socket = match transport::open_multicast_socket(&effective_config) {
        Ok(s) => s,
        Err(e) => return classify(e),
    };

    // Requester writes, receiver reads — each direction of the one
    // retransmission connection is exclusively owned by one worker (spec
    // section 5: "each owns one direction").
    let retrans_read = match retrans_stream.try_clone() {
        Ok(s) => s,
        Err(e) => return classify(FmtpError::Io(e)),
    };

    // Step 4: the signature this session bridges forward from. Session
    // memory is authoritative when present; fall back to the external
    // product queue's own "most recent signature" (spec section 1's second
    // core-to-collaborator call) for the case where session memory was never
    // written — e.g. the very first iteration ever run against a product
    // queue that already has history from before this crate was introduced.
    let previous_last_signature = memory
        .lock()
        .get_last_signature()
        .or_else(|| completed.most_recent_signature());

    // Crash-recovery replay (spec section 4.8): anything durably recorded as
    // missing-but-not-yet-requested by a prior process must be requested
    // again now, since the in-memory request queue that would have carried
    // it did not survive the crash.
    let mut resume_indices = Vec::new();
    loop {
        match memory.lock().dequeue_missed() {
            Ok(Some(index)) => resume_indices.push(index),
            Ok(None) => break,
            Err(e) => {
                log::warn!("[supervisor] failed to drain durable missed-index queue: {e}");
                break;
            }
        }
    }

    // Step 5: BOP timer, shared per-iteration state, then the three workers.
    let (request_tx, request_rx) = request_queue();
    let missing_bop = Arc::new(MissingBopSet::new());
    let eop_status = Arc::new(EopStatusMap::new());
    let bop_timer = BopTimer::spawn(
        Arc::clone(&missing_bop),
        Arc::clone(&eop_status),
        request_tx.clone(),
        Arc::clone(notifier),
    );
    let bop_timer_handle = bop_timer.handle();

    let shared = Arc::new(SessionShared::new(
        effective_config.clone(),
        Arc::clone(notifier),
        Arc::clone(completed),
        request_tx.clone(),
        bop_timer_handle,
        Arc::clone(&missing_bop),
        Arc::clone(&eop_status),
        Arc::clone(memory),
    ));

    for index in resume_indices {
        shared.resume_missing_bop(index, effective_config.rtt_seed);
    }

    let (first_arrival_tx, first_arrival_rx) = bounded::<Signature>(1);
    shared.set_first_arrival_notifier(first_arrival_tx);
    let backlog_handle = spawn_backlog_task(
        effective_config.clone(),
        previous_last_signature,
        first_arrival_rx,
        Arc::clone(stop_requested),
    );

    let (comp_tx, comp_rx) = completion_channel();
    let reader = MulticastReader::spawn(multicast_socket, Arc::clone(&shared), comp_tx.clone());
    let requester = RetransmissionRequester::spawn(retrans_stream, request_rx, comp_tx.clone());
    let receiver = RetransmissionReceiver::spawn(retrans_read, Arc::clone(&shared), comp_tx.clone());
    drop(comp_tx);

    // Step 7: wait until any worker terminates, or `stop()` is requested.
    let failure = loop {
        if stop_requested.load(Ordering::Relaxed) {
            break None;
        }
        match comp_rx.recv_timeout(POLL_INTERVAL) {
            Ok(terminal) if terminal.is_shutdown() => break None,
            Ok(terminal) => break terminal.result.err(),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break None,
        }
    };

    // Teardown: stop every worker cooperatively, regardless of which one (if
    // any) failed first (spec section 4.7: "the supervisor must cleanly
    // stop each task even if another has already failed. Stop is
    // idempotent.").
    request_tx.stop();
    reader.shutdown();
    receiver.shutdown();
    requester.join();
    bop_timer.shutdown();
    drop(shared); // Drops the first-arrival sender, releasing the backlog task if idle.
    let _ = backlog_handle.join();
    while comp_rx.try_recv().is_ok() {}

    match failure {
        Some(e) => classify(e),
        None => IterationOutcome::Stopped,
    }
}

/// Spawn the one-shot "backlog request" task (spec section 4.7, step 6): on
/// the first multicast (or retransmitted) arrival this iteration, ask the
/// sender for every product between the previous session's last signature
/// and this one's first — or, if there was no previous session, everything
/// within `Config::backlog_time_offset`.
fn spawn_backlog_task(
    config: Config,
    previous_last_signature: Option<Signature>,
    first_arrival_rx: Receiver<Signature>,
    stop_requested: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        if stop_requested.load(Ordering::Relaxed) {
            return;
        }
        match first_arrival_rx.recv_timeout(POLL_INTERVAL) {
            Ok(to_signature) => {
                let rpc = RpcClient::new(&config);
                let time_offset_secs = u32::try_from(config.backlog_time_offset.as_secs()).unwrap_or(u32::MAX);
                if let Err(e) = rpc.request_backlog(&config, previous_last_signature, to_signature, time_offset_secs) {
                    log::warn!("[supervisor] backlog request failed: {e}");
                }
                return;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::test_support::RecordingCollaborator;
    use crate::rpc::protocol::{ControlMessage, SubscribeReply, SubscribeStatus};
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};

    fn collaborators() -> (Arc<dyn ProductNotifier>, Arc<dyn ProductQueue>) {
        let collaborator = Arc::new(RecordingCollaborator::default());
        (collaborator.clone(), collaborator)
    }

    fn wait_for_stopped(supervisor: &Supervisor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.state() != SupervisorState::Stopped && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn stop_before_start_skips_iteration_entirely() {
        let config = Config::new(
            "source-a",
            "conduit/grib2",
            Ipv4Addr::new(239, 1, 1, 1),
            6000,
            "10.255.255.1:1".parse().unwrap(),
            "/tmp/q",
        );
        let (notifier, completed) = collaborators();
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(config, dir.path(), notifier, completed);

        supervisor.stop();
        supervisor.start();
        supervisor.join();

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.last_error().is_none());
    }

    #[test]
    fn invalid_config_is_fatal_without_attempting_network() {
        let mut config = Config::new(
            "source-a",
            "conduit/grib2",
            Ipv4Addr::new(239, 1, 1, 1),
            6000,
            "10.255.255.1:1".parse().unwrap(),
            "/tmp/q",
        );
        config.source_id.clear();
        let (notifier, completed) = collaborators();
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(config, dir.path(), notifier, completed);

        supervisor.start();
        supervisor.join();

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.last_error().unwrap().contains("source_id"));
    }

    #[test]
    fn subscription_refused_transitions_supervisor_to_stopped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            // The retransmission connection opens first and never sends
            // anything; the subscribe RPC opens second, on its own
            // short-lived connection, and does.
            let mut idle_connections = Vec::new();
            loop {
                let (mut stream, _) = listener.accept().unwrap();
                stream.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
                let mut len_buf = [0u8; 4];
                match stream.read_exact(&mut len_buf) {
                    Ok(()) => {
                        let len = u32::from_be_bytes(len_buf) as usize;
                        let mut body = vec![0u8; len];
                        stream.read_exact(&mut body).unwrap();
                        assert!(matches!(
                            ControlMessage::decode(&body).unwrap(),
                            ControlMessage::Subscribe { .. }
                        ));

                        let reply = SubscribeReply {
                            status: SubscribeStatus::Refused("unknown feed".to_string()),
                            multicast_info: None,
                        };
                        let body = reply.encode();
                        stream.write_all(&(body.len() as u32).to_be_bytes()).unwrap();
                        stream.write_all(&body).unwrap();
                        return;
                    }
                    Err(_) => {
                        idle_connections.push(stream);
                        continue;
                    }
                }
            }
        });

        let config = Config::new(
            "source-a",
            "conduit/grib2",
            Ipv4Addr::new(239, 1, 1, 1),
            6000,
            addr,
            "/tmp/q",
        )
        .with_subscribe_timeout(Duration::from_secs(2));
        let (notifier, completed) = collaborators();
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(config, dir.path(), notifier, completed);

        supervisor.start();
        wait_for_stopped(&supervisor);

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.last_error().unwrap().contains("subscription refused"));

        supervisor.join();
        server.join().unwrap();
    }
}
