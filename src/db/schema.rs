//! Schema migrations
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry of
//! [`MIGRATIONS`] moves the database up by one version inside its own
//! transaction, so a crash mid-upgrade leaves the previous version intact.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::types::{Result, TipRelayError};

/// Ordered migrations; entry `i` upgrades version `i` to `i + 1`
const MIGRATIONS: &[(&str, &str)] = &[
    ("users and processed events", USERS_AND_EVENTS),
    ("poll cursors and lookup indexes", CURSORS_AND_LOOKUPS),
];

/// Schema version this build writes
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`SCHEMA_VERSION`].
///
/// A database written by a newer build is refused rather than downgraded.
pub fn migrate(conn: &Connection) -> Result<()> {
    let found = user_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(TipRelayError::Config(format!(
            "database schema v{} is newer than this build (v{})",
            found, SCHEMA_VERSION
        )));
    }
    if found == SCHEMA_VERSION {
        debug!(version = found, "Schema up to date");
        return Ok(());
    }

    for (index, (name, sql)) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let target = index as u32 + 1;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| TipRelayError::Database(format!("migration to v{} failed: {}", target, e)))?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        info!(version = target, migration = %name, "Applied schema migration");
    }
    Ok(())
}

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

const USERS_AND_EVENTS: &str = r#"
-- One row per social identity; never deleted
CREATE TABLE IF NOT EXISTS users (
    identity TEXT PRIMARY KEY NOT NULL,
    challenge_code TEXT,

    -- Opaque wallet references (public data only)
    primary_wallet_ref TEXT,
    cosigner_wallet_ref TEXT,
    ledger_address TEXT,

    registration_state TEXT NOT NULL DEFAULT 'unregistered',
    registration_event_id TEXT,

    -- Optimistic concurrency stamp
    version INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_challenge_code
    ON users(challenge_code) WHERE challenge_code IS NOT NULL;

-- Events whose handler ran to completion
CREATE TABLE IF NOT EXISTS processed_events (
    event_class TEXT NOT NULL,
    event_id TEXT NOT NULL,
    observed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (event_class, event_id)
);
"#;

const CURSORS_AND_LOOKUPS: &str = r#"
-- Last position each poll source has fully handled
CREATE TABLE IF NOT EXISTS poll_cursors (
    source TEXT PRIMARY KEY NOT NULL,
    position INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_users_registration_event
    ON users(registration_event_id) WHERE registration_event_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_users_ledger_address
    ON users(ledger_address) WHERE ledger_address IS NOT NULL;
"#;
