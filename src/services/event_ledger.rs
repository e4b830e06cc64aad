//! Idempotent Event Ledger
//!
//! Dedupe gate in front of every handler. A `processed_events` row means the
//! handler for that event ran to completion (effect submitted, or the event
//! classified as not actionable). Rows are written after the effect, so a
//! crash in between can only repeat a side effect, never lose one.
//!
//! Within one process an event is additionally claimed while a handler works
//! on it, so the same id seen twice in one poll batch (or by two pollers)
//! runs one handler.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::db::{events, Database};
use crate::types::{EventKey, ProcessedEvent, Result};

pub struct EventLedger {
    db: Arc<Database>,
    in_flight: Arc<DashMap<EventKey, ()>>,
}

impl EventLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn already_processed(&self, key: &EventKey) -> Result<bool> {
        self.db.with_conn(|conn| events::is_processed(conn, key))
    }

    /// Record `key` as handled. Calling again is a no-op.
    pub fn mark_processed(&self, key: &EventKey) -> Result<()> {
        let inserted = self.db.with_conn(|conn| events::mark_processed(conn, key))?;
        if !inserted {
            debug!(event = %key, "Event was already marked processed");
        }
        Ok(())
    }

    pub fn get(&self, key: &EventKey) -> Result<Option<ProcessedEvent>> {
        self.db.with_conn(|conn| events::get_processed(conn, key))
    }

    /// Claim `key` for handling.
    ///
    /// Returns `None` when the event is already processed or another task
    /// holds the claim. The claim is released when the guard drops; call
    /// [`EventClaim::complete`] to mark the event processed first.
    pub fn begin(&self, key: &EventKey) -> Result<Option<EventClaim>> {
        if self.already_processed(key)? {
            return Ok(None);
        }

        if self.in_flight.insert(key.clone(), ()).is_some() {
            debug!(event = %key, "Event already claimed by another handler");
            return Ok(None);
        }
        let claim = EventClaim {
            key: key.clone(),
            in_flight: Arc::clone(&self.in_flight),
            db: Arc::clone(&self.db),
        };

        // A handler may have completed between the first check and the claim
        if self.already_processed(key)? {
            return Ok(None);
        }
        Ok(Some(claim))
    }

    /// Number of events currently claimed
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Exclusive in-process claim on one event
#[must_use = "dropping the claim releases the event without marking it"]
pub struct EventClaim {
    key: EventKey,
    in_flight: Arc<DashMap<EventKey, ()>>,
    db: Arc<Database>,
}

impl EventClaim {
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Mark the event processed and release the claim
    pub fn complete(self) -> Result<()> {
        self.db
            .with_conn(|conn| events::mark_processed(conn, &self.key))?;
        Ok(())
    }
}

impl Drop for EventClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}
