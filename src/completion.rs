// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared "task completion" channel (spec section 7: "worker threads record
//! their terminal outcome on a shared task completion channel owned by the
//! supervisor").
//!
//! Design note (spec section 9): "exceptions thrown across thread
//! boundaries" become per-thread terminal-result values pushed through this
//! channel instead; the supervisor polls and folds them, taking the first
//! non-shutdown outcome as the session's verdict.

use crate::error::FmtpError;
use crossbeam::channel::{unbounded, Receiver, Sender};

/// Which long-running worker produced a [`TerminalOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    MulticastReader,
    RetransmissionRequester,
    RetransmissionReceiver,
    BopTimer,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MulticastReader => "multicast reader",
            Self::RetransmissionRequester => "retransmission requester",
            Self::RetransmissionReceiver => "retransmission receiver",
            Self::BopTimer => "BOP timer",
        };
        write!(f, "{name}")
    }
}

/// A worker thread's terminal outcome, folded by the supervisor when
/// deciding whether the session iteration should abort.
#[derive(Debug)]
pub struct TerminalOutcome {
    pub worker: WorkerKind,
    pub result: Result<(), FmtpError>,
}

impl TerminalOutcome {
    #[must_use]
    pub fn ok(worker: WorkerKind) -> Self {
        Self {
            worker,
            result: Ok(()),
        }
    }

    #[must_use]
    pub fn err(worker: WorkerKind, error: FmtpError) -> Self {
        Self {
            worker,
            result: Err(error),
        }
    }

    /// Clean shutdown is not treated as a session-ending failure.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(&self.result, Err(FmtpError::ShutdownRequested))
    }
}

pub type CompletionSender = Sender<TerminalOutcome>;
pub type CompletionReceiver = Receiver<TerminalOutcome>;

#[must_use]
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    unbounded()
}

/// Fold a batch of terminal outcomes into a single session verdict: the
/// first non-shutdown error wins, otherwise `Ok(())`.
#[must_use]
pub fn fold_outcomes(outcomes: &[TerminalOutcome]) -> Result<(), &FmtpError> {
    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            if !matches!(e, FmtpError::ShutdownRequested) {
                return Err(e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_prefers_first_non_shutdown_error() {
        let outcomes = vec![
            TerminalOutcome::ok(WorkerKind::BopTimer),
            TerminalOutcome::err(WorkerKind::MulticastReader, FmtpError::ShutdownRequested),
            TerminalOutcome::err(
                WorkerKind::RetransmissionReceiver,
                FmtpError::WorkerFailed("receiver"),
            ),
        ];
        assert!(fold_outcomes(&outcomes).is_err());
    }

    #[test]
    fn fold_is_ok_when_everything_is_clean_shutdown() {
        let outcomes = vec![
            TerminalOutcome::ok(WorkerKind::BopTimer),
            TerminalOutcome::err(WorkerKind::MulticastReader, FmtpError::ShutdownRequested),
        ];
        assert!(fold_outcomes(&outcomes).is_ok());
    }
}
