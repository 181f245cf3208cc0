// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # fmtp — File Multicast Transfer Protocol
//!
//! A reliable file/product transfer protocol layered over UDP multicast,
//! with TCP-based gap recovery and a small persistent memory of what a
//! downstream session has already received.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fmtp::{Config, Supervisor};
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! # fn embedder_notifier() -> Arc<dyn fmtp::ProductNotifier> { unimplemented!() }
//! # fn embedder_queue() -> Arc<dyn fmtp::ProductQueue> { unimplemented!() }
//! let config = Config::new(
//!     "NOAAPORT",
//!     "conduit/grib2",
//!     Ipv4Addr::new(224, 0, 1, 1),
//!     5001,
//!     "sender.example.org:5002".parse().unwrap(),
//!     "/var/fmtp/queue",
//! );
//! let supervisor = Supervisor::new(config, "/var/fmtp/sessions", embedder_notifier(), embedder_queue());
//! supervisor.start();
//! // ... run until the embedder decides to shut down ...
//! supervisor.stop_and_join();
//! ```
//!
//! ## Modules Overview
//!
//! - [`session`] - supervisor state machine, per-iteration shared state, persistent memory
//! - [`wire`] - the 16-byte header codec and BOP/request payload encodings
//! - [`tracker`] - per-product block bitmap and the concurrent tracker map
//! - [`reader`] - the multicast reader worker
//! - [`retransmission`] - the TCP requester/receiver worker pair
//! - [`rpc`] - the control-channel client (subscribe, request-missed, request-backlog)
//! - [`transport`] - multicast socket setup
//! - [`config`] - receiver configuration
//! - [`error`] - crate-wide error type and severity classification
//! - [`metrics`] - atomic counters exposed for embedder-side observability
//! - [`notifier`] - the `ProductNotifier`/`ProductQueue` collaborator traits

// Clippy: no blanket suppressions at the crate level; module-local `#[allow]`s carry a reason.

pub mod bop_timer;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod reader;
pub mod request_queue;
pub mod retransmission;
pub mod rpc;
pub mod session;
pub mod tracker;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use error::{FmtpError, FmtpResult, ProductIndex, Severity};
pub use notifier::{DeliveryFailureReason, ProductNotifier, ProductQueue};
pub use session::{Supervisor, SupervisorState};
