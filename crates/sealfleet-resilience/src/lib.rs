// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for sealfleet.

pub mod retry;

pub use retry::{retry_transient, RetryPolicy};
