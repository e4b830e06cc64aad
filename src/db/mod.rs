//! SQLite persistence for users, processed events and poll cursors
//!
//! ## Tables
//!
//! - `users` - one row per social identity, optimistic `version` stamp
//! - `processed_events` - dedupe ledger keyed by `(event_class, event_id)`
//! - `poll_cursors` - last fully handled position per poll source
//!
//! Connections are never held across an `.await`: callers take the lock,
//! run one short statement batch, and release it.

pub mod events;
pub mod schema;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::types::{Result, TipRelayError};

/// SQLite database handle shared by the registry and the event ledger
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database file
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| TipRelayError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL keeps readers off the writer's back
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| TipRelayError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (dev mode and tests)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            TipRelayError::Database(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.with_conn(schema::migrate)
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TipRelayError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Row counts for the startup banner and tests
    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn| {
            let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let registered: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE registration_state = 'registered'",
                [],
                |row| row.get(0),
            )?;
            let processed_events: i64 =
                conn.query_row("SELECT COUNT(*) FROM processed_events", [], |row| row.get(0))?;

            Ok(DbStats {
                users: users as u64,
                registered_users: registered as u64,
                processed_events: processed_events as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub users: u64,
    pub registered_users: u64,
    pub processed_events: u64,
}
