// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for sealfleet integration tests.
//!
//! Provides in-memory stand-ins for hosts and key backends so rotation
//! scenarios run fast and deterministically without ssh or cloud services.
//!
//! # Components
//!
//! - [`MockFleet`] - In-memory hosts with failure injection
//! - [`InMemoryKeyProvider`] - Two-phase key rotation held in memory
//! - [`TestHarness`] - A complete orchestrator over a temp state store

pub mod harness;
pub mod mock_fleet;
pub mod mock_keys;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_fleet::MockFleet;
pub use mock_keys::InMemoryKeyProvider;
