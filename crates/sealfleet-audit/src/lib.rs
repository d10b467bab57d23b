// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission audit for deployed artifacts and key files.
//!
//! The auditor only ever stats paths. It reports drift together with the
//! command that would fix it and leaves fixing to the operator.

pub mod policy;
pub mod record;
pub mod scanner;

pub use policy::AccessPolicy;
pub use record::{AuditRecord, AuditSummary, PathKind, Verdict};
pub use scanner::{Auditor, HostAudit};
