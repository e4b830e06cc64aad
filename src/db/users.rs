//! User row operations
//!
//! Writes are conditional on the row's `version` column. Callers go through
//! `services::registry::UserRegistry`, never these functions directly.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::types::{RegistrationState, Result, TipRelayError, User, WalletRef};

const USER_COLUMNS: &str = "identity, challenge_code, primary_wallet_ref, cosigner_wallet_ref,
    ledger_address, registration_state, registration_event_id, version, created_at, updated_at";

/// Column values as stored, before parsing into domain types
struct UserRow {
    identity: String,
    challenge_code: Option<String>,
    primary_wallet_ref: Option<String>,
    cosigner_wallet_ref: Option<String>,
    ledger_address: Option<String>,
    registration_state: String,
    registration_event_id: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity: row.get(0)?,
            challenge_code: row.get(1)?,
            primary_wallet_ref: row.get(2)?,
            cosigner_wallet_ref: row.get(3)?,
            ledger_address: row.get(4)?,
            registration_state: row.get(5)?,
            registration_event_id: row.get(6)?,
            version: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_user(self) -> Result<User> {
        Ok(User {
            identity: self.identity,
            challenge_code: self.challenge_code,
            primary_wallet: self
                .primary_wallet_ref
                .as_deref()
                .map(str::parse::<WalletRef>)
                .transpose()?,
            cosigner_wallet: self
                .cosigner_wallet_ref
                .as_deref()
                .map(str::parse::<WalletRef>)
                .transpose()?,
            ledger_address: self.ledger_address,
            registration_state: self.registration_state.parse()?,
            registration_event_id: self.registration_event_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn query_one(conn: &Connection, filter: &str, value: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, filter);
    conn.query_row(&sql, params![value], UserRow::from_row)
        .optional()
        .map_err(|e| TipRelayError::Database(format!("Failed to get user: {}", e)))?
        .map(UserRow::into_user)
        .transpose()
}

/// Get a user by identity
pub fn get_user(conn: &Connection, identity: &str) -> Result<Option<User>> {
    query_one(conn, "identity", identity)
}

/// Exact-match lookup by outstanding challenge code
pub fn find_by_challenge(conn: &Connection, code: &str) -> Result<Option<User>> {
    query_one(conn, "challenge_code", code)
}

/// Find the user whose registration was started by ledger transaction `event_id`
pub fn find_by_registration_event(conn: &Connection, event_id: &str) -> Result<Option<User>> {
    query_one(conn, "registration_event_id", event_id)
}

/// Insert an empty row for `identity` unless one exists.
///
/// Returns true when this call created the row.
pub fn insert_if_absent(conn: &Connection, identity: &str) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO users (identity, registration_state, version) VALUES (?, ?, 0)",
            params![identity, RegistrationState::Unregistered.as_str()],
        )
        .map_err(|e| TipRelayError::Database(format!("Failed to create user: {}", e)))?;
    Ok(inserted == 1)
}

/// Write `user` if the stored version still equals `expected_version`.
///
/// Returns false on a version mismatch. A challenge-code collision with
/// another row is reported as `Conflict` so the caller retries with a
/// fresh code.
pub fn update_if_version(conn: &Connection, user: &User, expected_version: i64) -> Result<bool> {
    let result = conn.execute(
        "UPDATE users SET
            challenge_code = ?1,
            primary_wallet_ref = ?2,
            cosigner_wallet_ref = ?3,
            ledger_address = ?4,
            registration_state = ?5,
            registration_event_id = ?6,
            version = ?7 + 1,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE identity = ?8 AND version = ?7",
        params![
            user.challenge_code,
            user.primary_wallet.as_ref().map(|w| w.to_string()),
            user.cosigner_wallet.as_ref().map(|w| w.to_string()),
            user.ledger_address,
            user.registration_state.as_str(),
            user.registration_event_id,
            expected_version,
            user.identity,
        ],
    );

    match result {
        Ok(rows) => Ok(rows == 1),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(TipRelayError::Conflict(format!(
                "unique constraint on user {}",
                user.identity
            )))
        }
        Err(e) => Err(TipRelayError::Database(format!("Failed to update user: {}", e))),
    }
}

/// `(identity, address)` of users whose registration may still complete
pub fn pending_addresses(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare(
            "SELECT identity, ledger_address FROM users
             WHERE ledger_address IS NOT NULL
               AND registration_state IN (?, ?)
             ORDER BY identity",
        )
        .map_err(|e| TipRelayError::Database(format!("Failed to prepare statement: {}", e)))?;

    let rows = stmt
        .query_map(
            params![
                RegistrationState::ChallengeIssued.as_str(),
                RegistrationState::AwaitingConfirmation.as_str()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .map_err(|e| TipRelayError::Database(format!("Failed to query pending users: {}", e)))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row.map_err(|e| TipRelayError::Database(format!("Failed to read row: {}", e)))?);
    }
    Ok(results)
}

/// Number of rows stored for `identity` (0 or 1)
pub fn count_identity(conn: &Connection, identity: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE identity = ?",
        params![identity],
        |row| row.get(0),
    )
    .map_err(|e| TipRelayError::Database(format!("Failed to count users: {}", e)))
}
