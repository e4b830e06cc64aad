//! User Registry
//!
//! Sole owner of `users` rows. Two write paths:
//! - [`UserRegistry::get_or_create`]: the only place rows are created
//! - [`UserRegistry::compare_and_update`]: every mutation, conditioned on
//!   the row's version stamp
//!
//! No lock is held between the read and the conditional write, so callers
//! may await network calls in between. A concurrent writer makes the write
//! report a conflict and the caller re-reads and re-decides
//! ([`UserRegistry::update_with_retry`] packages that loop).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::{users, Database};
use crate::types::{Result, TipRelayError, User};

/// Local retries before a persistent conflict is surfaced as transient
const MAX_CAS_ATTEMPTS: usize = 16;

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// Written; carries the row as stored, with its new version
    Updated(User),
    /// Version moved on; carries the current row
    Conflict(User),
}

/// Decision returned by an [`UserRegistry::update_with_retry`] closure
#[derive(Debug)]
pub enum Step<T> {
    /// Persist the mutated row, then return the value
    Commit(T),
    /// Leave the row untouched and return the value
    Skip(T),
}

pub struct UserRegistry {
    db: Arc<Database>,
}

impl UserRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Get the row for `identity`, creating an empty one if unseen.
    ///
    /// Concurrent callers for the same identity all observe the same row.
    pub fn get_or_create(&self, identity: &str) -> Result<User> {
        if identity.trim().is_empty() {
            return Err(TipRelayError::Validation("identity must not be empty".into()));
        }

        self.db.with_conn(|conn| {
            if users::insert_if_absent(conn, identity)? {
                debug!(identity = %identity, "Created user");
            }
            users::get_user(conn, identity)?.ok_or_else(|| {
                TipRelayError::Internal(format!("user {} vanished after insert", identity))
            })
        })
    }

    pub fn get(&self, identity: &str) -> Result<Option<User>> {
        self.db.with_conn(|conn| users::get_user(conn, identity))
    }

    /// Exact-match lookup by outstanding challenge code
    pub fn find_by_challenge(&self, code: &str) -> Result<Option<User>> {
        self.db.with_conn(|conn| users::find_by_challenge(conn, code))
    }

    /// The user whose registration was started by ledger transaction `event_id`
    pub fn find_by_registration_event(&self, event_id: &str) -> Result<Option<User>> {
        self.db
            .with_conn(|conn| users::find_by_registration_event(conn, event_id))
    }

    /// `(identity, primary address)` of users whose registration may still complete
    pub fn pending_addresses(&self) -> Result<Vec<(String, String)>> {
        self.db.with_conn(users::pending_addresses)
    }

    /// Apply `mutation` to the stored row if its version still equals
    /// `expected_version`.
    ///
    /// The mutated row is validated against the state-machine invariants
    /// before it is written. Mutations may not change the identity.
    pub fn compare_and_update<F>(
        &self,
        identity: &str,
        expected_version: i64,
        mutation: F,
    ) -> Result<CasOutcome>
    where
        F: FnOnce(&mut User),
    {
        self.db.with_conn(|conn| {
            let current = users::get_user(conn, identity)?
                .ok_or_else(|| TipRelayError::NotFound(format!("user {}", identity)))?;
            if current.version != expected_version {
                return Ok(CasOutcome::Conflict(current));
            }

            let mut next = current.clone();
            mutation(&mut next);
            if next.identity != current.identity {
                return Err(TipRelayError::Internal(format!(
                    "mutation changed identity of {}",
                    identity
                )));
            }
            next.validate()?;

            if users::update_if_version(conn, &next, expected_version)? {
                match users::get_user(conn, identity)? {
                    Some(stored) => Ok(CasOutcome::Updated(stored)),
                    None => Err(TipRelayError::Internal(format!(
                        "user {} vanished after update",
                        identity
                    ))),
                }
            } else {
                let latest = users::get_user(conn, identity)?.unwrap_or(current);
                Ok(CasOutcome::Conflict(latest))
            }
        })
    }

    /// Read-decide-write loop over [`Self::compare_and_update`].
    ///
    /// `decide` sees a fresh copy of the row on every attempt and either
    /// mutates it and returns [`Step::Commit`], or returns [`Step::Skip`].
    /// Returns the decision value and the row as it stands afterwards.
    /// Errors from `decide` abort without writing. A unique-index collision
    /// (`Conflict` error) is retried like a version conflict.
    pub fn update_with_retry<T, F>(&self, identity: &str, mut decide: F) -> Result<(T, User)>
    where
        F: FnMut(&mut User) -> Result<Step<T>>,
    {
        let mut current = self.get_or_create(identity)?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut draft = current.clone();
            let value = match decide(&mut draft)? {
                Step::Skip(value) => return Ok((value, current)),
                Step::Commit(value) => value,
            };

            let write = self.compare_and_update(identity, current.version, |row| *row = draft);
            match write {
                Ok(CasOutcome::Updated(stored)) => return Ok((value, stored)),
                Ok(CasOutcome::Conflict(latest)) => {
                    debug!(identity = %identity, attempt, "Version conflict, retrying");
                    current = latest;
                }
                Err(TipRelayError::Conflict(reason)) => {
                    debug!(identity = %identity, attempt, reason = %reason, "Write conflict, retrying");
                    current = self.get_or_create(identity)?;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(identity = %identity, "Giving up after {} conflicting writes", MAX_CAS_ATTEMPTS);
        Err(TipRelayError::Conflict(format!(
            "user {} kept changing under concurrent writers",
            identity
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegistrationState;

    fn registry() -> UserRegistry {
        UserRegistry::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_get_or_create_returns_same_row() {
        let registry = registry();
        let first = registry.get_or_create("alice").unwrap();
        let second = registry.get_or_create("alice").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.version, 0);
        assert_eq!(first.registration_state, RegistrationState::Unregistered);
    }

    #[test]
    fn test_get_or_create_rejects_blank_identity() {
        let registry = registry();
        assert!(matches!(
            registry.get_or_create(" "),
            Err(TipRelayError::Validation(_))
        ));
    }

    #[test]
    fn test_stale_version_conflicts() {
        let registry = registry();
        let user = registry.get_or_create("bob").unwrap();

        let first = registry
            .compare_and_update("bob", user.version, |u| u.ledger_address = Some("T1".into()))
            .unwrap();
        let CasOutcome::Updated(updated) = first else {
            panic!("expected update");
        };
        assert_eq!(updated.version, user.version + 1);

        let second = registry
            .compare_and_update("bob", user.version, |u| u.ledger_address = Some("T2".into()))
            .unwrap();
        let CasOutcome::Conflict(latest) = second else {
            panic!("expected conflict");
        };
        assert_eq!(latest.ledger_address.as_deref(), Some("T1"));
    }

    #[test]
    fn test_invalid_mutation_is_not_written() {
        let registry = registry();
        let user = registry.get_or_create("bob").unwrap();

        let result = registry.compare_and_update("bob", user.version, |u| {
            u.registration_state = RegistrationState::Registered;
        });
        assert!(result.is_err());
        assert_eq!(registry.get("bob").unwrap().unwrap().version, user.version);
    }

    #[test]
    fn test_update_with_retry_rereads_after_conflict() {
        let registry = registry();
        registry.get_or_create("carol").unwrap();

        let mut calls = 0;
        let (value, stored) = registry
            .update_with_retry("carol", |user| {
                calls += 1;
                if calls == 1 {
                    // Another writer lands between our read and write
                    let CasOutcome::Updated(_) = registry
                        .compare_and_update("carol", user.version, |u| {
                            u.ledger_address = Some("TOTHER".into())
                        })
                        .unwrap()
                    else {
                        panic!("interleaved write failed");
                    };
                }
                assert_eq!(calls > 1, user.ledger_address.is_some());
                user.registration_state = RegistrationState::RegistrationFailed;
                Ok(Step::Commit(calls))
            })
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(stored.registration_state, RegistrationState::RegistrationFailed);
        assert_eq!(stored.ledger_address.as_deref(), Some("TOTHER"));
    }

    #[test]
    fn test_skip_leaves_row_untouched() {
        let registry = registry();
        let (value, stored) = registry
            .update_with_retry("dave", |_| Ok(Step::Skip("nothing to do")))
            .unwrap();
        assert_eq!(value, "nothing to do");
        assert_eq!(stored.version, 0);
    }
}
