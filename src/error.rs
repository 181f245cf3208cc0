// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.
//!
//! Written by hand rather than derived, matching the core reliability library's
//! own convention: a single enum grouped by category, with manual `Display` and
//! `std::error::Error` impls. `thiserror` is left for the service-level crates
//! that wrap this one; it earns nothing here over a dozen match arms.

use std::fmt;
use std::io;

/// Product-index type used throughout error contexts.
pub type ProductIndex = u32;

/// Errors surfaced by the FMTP downstream receiver.
#[derive(Debug)]
pub enum FmtpError {
    // --- Transport errors ---
    /// A socket operation failed in a way that aborts the current session.
    Io(io::Error),
    /// The local interface named in `Config` could not be resolved.
    InterfaceNotFound(String),

    // --- Protocol errors ---
    /// A header failed to decode (too short, inconsistent length, or invalid flags).
    InvalidHeader { reason: &'static str },
    /// A block's length or offset disagreed with the product's declared geometry.
    OutOfRange { index: ProductIndex, seq: u32 },
    /// `create()` was called twice for the same product index while the first is live.
    DuplicateProduct(ProductIndex),

    // --- Session errors ---
    /// `Config::validate()` rejected the configuration before a session was ever attempted.
    InvalidConfig(&'static str),
    /// The sender refused the subscription (unauthorized or unknown feed).
    SubscriptionRefused(String),
    /// The control-channel RPC did not complete within its configured timeout.
    RpcTimeout { call: &'static str },
    /// `stop()` was requested; not a failure, but carried through the same
    /// terminal-outcome channel as real errors so the supervisor can fold it.
    ShutdownRequested,

    // --- System errors ---
    /// Persistent session memory could not be opened, read, or durably replaced.
    SessionMemory(String),
    /// A background worker thread panicked or exited unexpectedly.
    WorkerFailed(&'static str),
}

impl fmt::Display for FmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InterfaceNotFound(iface) => write!(f, "local interface not found: {iface}"),
            Self::InvalidHeader { reason } => write!(f, "invalid FMTP header: {reason}"),
            Self::OutOfRange { index, seq } => {
                write!(f, "block seq={seq} out of range for product {index}")
            }
            Self::DuplicateProduct(index) => write!(f, "duplicate product index {index}"),
            Self::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            Self::SubscriptionRefused(reason) => write!(f, "subscription refused: {reason}"),
            Self::RpcTimeout { call } => write!(f, "RPC call '{call}' timed out"),
            Self::ShutdownRequested => write!(f, "shutdown requested"),
            Self::SessionMemory(reason) => write!(f, "session memory error: {reason}"),
            Self::WorkerFailed(which) => write!(f, "worker '{which}' failed"),
        }
    }
}

impl std::error::Error for FmtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FmtpError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Result alias used throughout the crate.
pub type FmtpResult<T> = Result<T, FmtpError>;

/// Severity bucket a [`FmtpError`] falls into, matching the taxonomy in the spec's
/// error-handling design section. The supervisor uses this to decide whether a
/// worker's terminal outcome should abort the session or just be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Drop the packet/request and continue (malformed packet, out-of-range block).
    Continue,
    /// Abort the current product only; the session continues.
    ProductAbort,
    /// Abort the current session; the supervisor naps and retries.
    SessionAbort,
    /// Fatal; surfaced to the embedder, no further retry.
    Fatal,
    /// Clean shutdown, not a failure.
    Shutdown,
}

impl FmtpError {
    /// Classify this error for supervisor handling.
    pub fn severity(&self) -> Severity {
        match self {
            Self::InvalidHeader { .. } | Self::OutOfRange { .. } => Severity::Continue,
            Self::DuplicateProduct(_) => Severity::ProductAbort,
            Self::Io(_) | Self::InterfaceNotFound(_) | Self::RpcTimeout { .. } => {
                Severity::SessionAbort
            }
            Self::InvalidConfig(_)
            | Self::SubscriptionRefused(_)
            | Self::SessionMemory(_)
            | Self::WorkerFailed(_) => Severity::Fatal,
            Self::ShutdownRequested => Severity::Shutdown,
        }
    }
}
