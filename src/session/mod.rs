// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session state: persistent cross-restart memory, the per-iteration shared
//! worker state, and the supervisor that drives one downstream session's
//! lifecycle (spec section 4.7).

pub mod memory;
pub mod shared;
pub mod supervisor;

pub use memory::SessionMemory;
pub use shared::SessionShared;
pub use supervisor::{Supervisor, SupervisorState};
