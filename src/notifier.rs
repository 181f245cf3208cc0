// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capability objects for the two external collaborators named in the spec:
//! the content-addressed product queue, and the per-product BOP/failure
//! hooks the embedder supplies.
//!
//! Design note (spec section 9): "callback-driven control flow with
//! external C linkage" — the original passes raw function pointers plus an
//! opaque user pointer through global tables. Here that becomes a pair of
//! plain traits, matching the donor's own preference for small trait
//! objects (`ProductBuffer` in `tracker/product_tracker.rs`) over function
//! pointers anywhere a capability needs to cross a thread boundary.

use crate::error::ProductIndex;
use crate::tracker::ProductBuffer;
use crate::wire::bop::{BopPayload, Signature};

/// Why a product was never delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailureReason {
    /// The BOP timer fired before a BOP (multicast or retransmitted)
    /// arrived for this index.
    BopTimeout,
    /// The sender explicitly declared the product unrecoverable.
    NoSuchProduct,
    /// The session aborted with the product still in flight.
    SessionAborted,
}

impl std::fmt::Display for DeliveryFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BopTimeout => write!(f, "BOP timer expired"),
            Self::NoSuchProduct => write!(f, "sender reports no such product"),
            Self::SessionAborted => write!(f, "session aborted with product in flight"),
        }
    }
}

/// Per-product hooks supplied by the embedder. One instance is shared by
/// every worker thread in a session (reader, requester, receiver, timer),
/// so implementations must be `Send + Sync`.
pub trait ProductNotifier: Send + Sync {
    /// Called when a BOP (multicast or retransmitted) is accepted for
    /// `index`, to obtain a destination buffer sized for `meta.total_size`.
    /// Returning `Err` aborts this product without creating a tracker.
    fn on_bop(
        &self,
        index: ProductIndex,
        meta: &BopPayload,
    ) -> Result<Box<dyn ProductBuffer>, String>;

    /// Called when a product could not be delivered, after all related
    /// tracker state has already been dropped.
    fn on_delivery_failed(&self, index: ProductIndex, reason: DeliveryFailureReason);
}

/// The external, content-addressed product store. The core only ever calls
/// these two operations (spec section 1): insert a completed product, and
/// report the most recently delivered signature (used to seed the backlog
/// request at the start of a session).
pub trait ProductQueue: Send + Sync {
    /// Hand a completed product's bytes to the queue, keyed by signature.
    fn insert(&self, signature: Signature, bytes: Vec<u8>);

    /// The signature of the most recently inserted product, if any.
    fn most_recent_signature(&self) -> Option<Signature>;
}
