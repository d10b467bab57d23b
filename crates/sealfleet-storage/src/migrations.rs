// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations, compiled in with refinery.

use sealfleet_core::SealError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Apply pending migrations. Refinery records applied versions in
/// `refinery_schema_history`.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), SealError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(SealError::storage)?;
    for migration in report.applied_migrations() {
        tracing::debug!(
            version = migration.version(),
            name = migration.name(),
            "applied schema migration"
        );
    }
    Ok(())
}
