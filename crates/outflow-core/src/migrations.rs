// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for outflow-core.
//!
//! Migrations are embedded at compile time and can be run programmatically,
//! which is what [`crate::store::SqliteStore::from_path`] does. Products
//! managing their own pool can call [`run_sqlite`] directly.

use sqlx::migrate::MigrateError;

/// SQLite migrator with all queue migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run SQLite migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple
/// times; already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
