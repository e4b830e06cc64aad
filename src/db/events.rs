//! Processed-event and poll-cursor rows

use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{EventKey, ProcessedEvent, Result, TipRelayError};

/// Whether a row exists for `key`
pub fn is_processed(conn: &Connection, key: &EventKey) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM processed_events WHERE event_class = ? AND event_id = ?",
            params![key.class.as_str(), key.id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| TipRelayError::Database(format!("Failed to query processed event: {}", e)))?;
    Ok(found.is_some())
}

/// Record `key` as processed. Repeat calls are no-ops.
///
/// Returns true when this call inserted the row.
pub fn mark_processed(conn: &Connection, key: &EventKey) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO processed_events (event_class, event_id) VALUES (?, ?)",
            params![key.class.as_str(), key.id],
        )
        .map_err(|e| TipRelayError::Database(format!("Failed to mark event processed: {}", e)))?;
    Ok(inserted == 1)
}

/// Fetch the stored record for `key`
pub fn get_processed(conn: &Connection, key: &EventKey) -> Result<Option<ProcessedEvent>> {
    conn.query_row(
        "SELECT event_class, event_id, observed_at FROM processed_events
         WHERE event_class = ? AND event_id = ?",
        params![key.class.as_str(), key.id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )
    .optional()
    .map_err(|e| TipRelayError::Database(format!("Failed to get processed event: {}", e)))?
    .map(|(class, event_id, observed_at)| {
        Ok(ProcessedEvent {
            event_class: class.parse()?,
            event_id,
            observed_at,
        })
    })
    .transpose()
}

/// Last stored position for a poll source
pub fn get_cursor(conn: &Connection, source: &str) -> Result<Option<u64>> {
    let position: Option<i64> = conn
        .query_row(
            "SELECT position FROM poll_cursors WHERE source = ?",
            params![source],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| TipRelayError::Database(format!("Failed to read cursor: {}", e)))?;
    Ok(position.map(|p| p.max(0) as u64))
}

/// Store the position for a poll source
pub fn set_cursor(conn: &Connection, source: &str, position: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO poll_cursors (source, position) VALUES (?1, ?2)
         ON CONFLICT(source) DO UPDATE SET
            position = excluded.position,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        params![source, position as i64],
    )
    .map_err(|e| TipRelayError::Database(format!("Failed to write cursor: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::migrate;
    use crate::types::EventClass;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_mark_is_idempotent() {
        let conn = setup();
        let key = EventKey::post("t1_abc");

        assert!(!is_processed(&conn, &key).unwrap());
        assert!(mark_processed(&conn, &key).unwrap());
        assert!(!mark_processed(&conn, &key).unwrap());
        assert!(is_processed(&conn, &key).unwrap());

        let row = get_processed(&conn, &key).unwrap().unwrap();
        assert_eq!(row.event_class, EventClass::Post);
        assert_eq!(row.event_id, "t1_abc");
    }

    #[test]
    fn test_classes_are_separate_namespaces() {
        let conn = setup();
        mark_processed(&conn, &EventKey::tx("42")).unwrap();

        assert!(is_processed(&conn, &EventKey::tx("42")).unwrap());
        assert!(!is_processed(&conn, &EventKey::message("42")).unwrap());
    }

    #[test]
    fn test_cursor_upsert() {
        let conn = setup();
        assert_eq!(get_cursor(&conn, "blocks").unwrap(), None);

        set_cursor(&conn, "blocks", 10).unwrap();
        set_cursor(&conn, "blocks", 12).unwrap();
        assert_eq!(get_cursor(&conn, "blocks").unwrap(), Some(12));
    }
}
