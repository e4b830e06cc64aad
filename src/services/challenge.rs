//! Challenge Protocol
//!
//! Issues single-use codes binding a social identity to a ledger account and
//! consumes them when they come back in a ledger message.

use std::sync::Arc;

use tracing::{debug, info};

use crate::custodial_keys::generate_challenge_code;
use crate::types::{RegistrationState, Result, TipRelayError, User};

use super::registry::{Step, UserRegistry};

/// What `issue_challenge` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A new code was stored
    Fresh(String),
    /// An unconsumed code already existed and is returned unchanged
    Reissued(String),
    AlreadyRegistered,
    /// The code was consumed and the account setup is outstanding
    InProgress,
}

impl IssueOutcome {
    /// The code to show the user, if one is outstanding
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Fresh(code) | Self::Reissued(code) => Some(code),
            Self::AlreadyRegistered | Self::InProgress => None,
        }
    }
}

pub struct ChallengeProtocol {
    registry: Arc<UserRegistry>,
}

impl ChallengeProtocol {
    pub fn new(registry: Arc<UserRegistry>) -> Self {
        Self { registry }
    }

    /// Issue (or re-issue) the registration challenge for `identity`.
    ///
    /// A user in `RegistrationFailed` gets a fresh code, restarting the flow.
    pub fn issue_challenge(&self, identity: &str) -> Result<IssueOutcome> {
        let (outcome, _) = self.registry.update_with_retry(identity, |user| {
            match user.registration_state {
                RegistrationState::Registered => Ok(Step::Skip(IssueOutcome::AlreadyRegistered)),
                RegistrationState::AwaitingConfirmation => Ok(Step::Skip(IssueOutcome::InProgress)),
                RegistrationState::ChallengeIssued => match &user.challenge_code {
                    Some(code) => Ok(Step::Skip(IssueOutcome::Reissued(code.clone()))),
                    None => Err(TipRelayError::Internal(format!(
                        "user {} in challenge_issued without a code",
                        user.identity
                    ))),
                },
                RegistrationState::Unregistered | RegistrationState::RegistrationFailed => {
                    // A colliding code fails the unique index and is retried with a new one
                    let code = generate_challenge_code();
                    user.challenge_code = Some(code.clone());
                    user.registration_state = RegistrationState::ChallengeIssued;
                    user.registration_event_id = None;
                    Ok(Step::Commit(IssueOutcome::Fresh(code)))
                }
            }
        })?;

        match &outcome {
            IssueOutcome::Fresh(_) => info!(identity = %identity, "Issued challenge"),
            other => debug!(identity = %identity, outcome = ?other, "Challenge not reissued"),
        }
        Ok(outcome)
    }

    /// Consume `code`, moving its owner to `AwaitingConfirmation` and
    /// recording `event_id` as the transaction that consumed it.
    ///
    /// Unknown or already-consumed codes return `NotFound`.
    pub fn verify_and_consume(&self, code: &str, event_id: &str) -> Result<User> {
        let not_found = || TipRelayError::NotFound("challenge code".into());

        if code.is_empty() {
            return Err(not_found());
        }
        let owner = self.registry.find_by_challenge(code)?.ok_or_else(not_found)?;

        let ((), user) = self.registry.update_with_retry(&owner.identity, |user| {
            // A concurrent consumer may have cleared the code since the lookup
            if user.challenge_code.as_deref() != Some(code) {
                return Err(not_found());
            }
            user.challenge_code = None;
            user.registration_state = RegistrationState::AwaitingConfirmation;
            user.registration_event_id = Some(event_id.to_string());
            Ok(Step::Commit(()))
        })?;

        info!(identity = %user.identity, event_id = %event_id, "Challenge consumed");
        Ok(user)
    }
}
