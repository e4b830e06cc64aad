//! Registration Orchestrator
//!
//! Drives a user from a "register" request to a 2-of-3 multisig account:
//!
//! 1. Inbox "register" → provision the primary account, issue a challenge,
//!    reply with the address and code
//! 2. Ledger transaction to that address carrying `<code> <cosigner key>` →
//!    consume the challenge (`AwaitingConfirmation`)
//! 3. Provision primary + cosigner, submit the multisig setup naming the
//!    transaction signer, the supplied cosigner key and the bot's cosigner
//! 4. Accepted → `Registered`; rejected → `RegistrationFailed`; user notified
//!
//! Transient failures leave the event unmarked. A redelivered transaction
//! whose challenge was already consumed resumes the same user through
//! `registration_event_id`, and the ledger's multisig state is checked before
//! resubmitting so the setup is never sent twice.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clients::{
    InboxMessage, LedgerClient, LedgerTransaction, MultisigSetup, SocialClient, SubmitOutcome,
};
use crate::types::{EventKey, RegistrationState, Result, TipRelayError, User, WalletRole};

use super::challenge::{ChallengeProtocol, IssueOutcome};
use super::event_ledger::EventLedger;
use super::notices;
use super::provisioner::WalletProvisioner;
use super::registry::{Step, UserRegistry};

/// Signatures required on a registered account
pub const MULTISIG_THRESHOLD: u8 = 2;

/// Registration payload carried in a ledger transaction message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePayload {
    pub code: String,
    pub cosigner_public_key: String,
}

impl ChallengePayload {
    /// Exactly two whitespace-separated tokens: code, then cosigner key
    pub fn decode(message: &str) -> Option<Self> {
        let mut tokens = message.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(code), Some(key), None) => Some(Self {
                code: code.to_string(),
                cosigner_public_key: key.to_string(),
            }),
            _ => None,
        }
    }
}

/// Terminal classification of a ledger transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Already processed, or being handled by another task
    Duplicate,
    /// No registration payload
    Ignored,
    /// Payload did not match an outstanding challenge
    NoMatch,
    /// Multisig installed; `tx_hash` is `None` when it was found already on chain
    Registered { identity: String, tx_hash: Option<String> },
    Failed { identity: String, reason: String },
}

/// Terminal classification of an inbox message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    Duplicate,
    NotActionable,
    Replied(IssueOutcome),
    /// The request could not be served; the author was told why
    Failed { reason: String },
}

/// Summary of a startup reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub addresses: usize,
    pub transactions: usize,
    pub registered: usize,
    pub failed: usize,
    /// Addresses skipped because of a transient error
    pub deferred: usize,
}

pub struct RegistrationOrchestrator {
    registry: Arc<UserRegistry>,
    events: Arc<EventLedger>,
    challenge: Arc<ChallengeProtocol>,
    provisioner: Arc<WalletProvisioner>,
    ledger: Arc<dyn LedgerClient>,
    social: Arc<dyn SocialClient>,
}

impl RegistrationOrchestrator {
    pub fn new(
        registry: Arc<UserRegistry>,
        events: Arc<EventLedger>,
        challenge: Arc<ChallengeProtocol>,
        provisioner: Arc<WalletProvisioner>,
        ledger: Arc<dyn LedgerClient>,
        social: Arc<dyn SocialClient>,
    ) -> Self {
        Self {
            registry,
            events,
            challenge,
            provisioner,
            ledger,
            social,
        }
    }

    /// Whether an inbox message asks to register
    pub fn is_register_command(message: &InboxMessage) -> bool {
        let is_register = |text: &str| text.trim().eq_ignore_ascii_case("register");
        message.subject.as_deref().is_some_and(is_register) || is_register(&message.body)
    }

    /// Answer a registration request. The message is marked processed only
    /// once the reply went out.
    pub async fn handle_inbox_message(&self, message: &InboxMessage) -> Result<InboxOutcome> {
        let key = EventKey::message(&message.message_id);
        let Some(claim) = self.events.begin(&key)? else {
            return Ok(InboxOutcome::Duplicate);
        };

        if !Self::is_register_command(message) {
            debug!(message_id = %message.message_id, "Inbox message is not a command");
            claim.complete()?;
            return Ok(InboxOutcome::NotActionable);
        }

        let identity = message.author.as_str();
        let (outcome, text) = match self.answer_register(identity).await {
            Ok(answer) => answer,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                let reason = terminal_reason(e);
                warn!(identity = %identity, reason = %reason, "Cannot serve registration request");
                self.send_reply(&message.message_id, &notices::registration_unavailable(&reason))
                    .await?;
                claim.complete()?;
                return Ok(InboxOutcome::Failed { reason });
            }
        };

        self.send_reply(&message.message_id, &text).await?;
        claim.complete()?;

        info!(identity = %identity, outcome = ?outcome, "Answered registration request");
        Ok(InboxOutcome::Replied(outcome))
    }

    /// Decide the answer to "register" and the reply text that carries it
    async fn answer_register(&self, identity: &str) -> Result<(IssueOutcome, String)> {
        let user = self.registry.get_or_create(identity)?;
        let outcome = match user.registration_state {
            RegistrationState::Registered => IssueOutcome::AlreadyRegistered,
            RegistrationState::AwaitingConfirmation => IssueOutcome::InProgress,
            _ => {
                // The address goes into the instructions, so it must exist first
                self.provisioner.provision_primary(identity).await?;
                self.challenge.issue_challenge(identity)?
            }
        };

        let text = match &outcome {
            IssueOutcome::Fresh(code) | IssueOutcome::Reissued(code) => {
                let address = self
                    .registry
                    .get(identity)?
                    .and_then(|u| u.ledger_address)
                    .ok_or_else(|| {
                        TipRelayError::Internal(format!("no ledger address for {}", identity))
                    })?;
                notices::register_instructions(&address, code)
            }
            IssueOutcome::AlreadyRegistered => notices::already_registered(),
            IssueOutcome::InProgress => notices::registration_in_progress(),
        };
        Ok((outcome, text))
    }

    /// Reply to an inbox message. A transient failure is returned so the
    /// message is retried; a refused reply is logged and dropped.
    async fn send_reply(&self, message_id: &str, text: &str) -> Result<()> {
        match self.social.reply(message_id, text).await {
            Err(e) if !e.is_transient() => {
                warn!(message_id = %message_id, error = %e, "Reply refused, not retrying");
                Ok(())
            }
            other => other,
        }
    }

    /// Handle one ledger transaction addressed to a pending user.
    pub async fn handle_ledger_transaction(
        &self,
        tx: &LedgerTransaction,
    ) -> Result<RegistrationOutcome> {
        let key = EventKey::tx(&tx.hash);
        let Some(claim) = self.events.begin(&key)? else {
            return Ok(RegistrationOutcome::Duplicate);
        };

        let Some(payload) = tx.message.as_deref().and_then(ChallengePayload::decode) else {
            debug!(tx = %tx.hash, "Transaction carries no registration payload");
            claim.complete()?;
            return Ok(RegistrationOutcome::Ignored);
        };

        let user = match self.challenge.verify_and_consume(&payload.code, &tx.hash) {
            Ok(user) => user,
            Err(TipRelayError::NotFound(_)) => match self.registry.find_by_registration_event(&tx.hash)? {
                Some(user) if user.registration_state == RegistrationState::AwaitingConfirmation => {
                    info!(identity = %user.identity, tx = %tx.hash, "Resuming registration");
                    user
                }
                _ => {
                    debug!(tx = %tx.hash, "No outstanding challenge matches");
                    claim.complete()?;
                    return Ok(RegistrationOutcome::NoMatch);
                }
            },
            Err(e) => return Err(e),
        };

        let outcome = match self.finalize(&user, tx, &payload).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                let reason = terminal_reason(e);
                self.fail_registration(&user.identity, tx, reason).await?
            }
        };
        claim.complete()?;
        Ok(outcome)
    }

    async fn finalize(
        &self,
        user: &User,
        tx: &LedgerTransaction,
        payload: &ChallengePayload,
    ) -> Result<RegistrationOutcome> {
        let identity = user.identity.as_str();
        let (primary, address) = self.provisioner.provision_primary(identity).await?;
        let bot_cosigner = self.provisioner.provision(identity, WalletRole::Cosigner).await?;

        let setup = MultisigSetup {
            account: primary,
            cosignatories: vec![
                tx.signer_public_key.clone(),
                payload.cosigner_public_key.clone(),
                bot_cosigner.public_key.clone(),
            ],
            min_cosignatories: MULTISIG_THRESHOLD,
        };

        let submitted = match self.ledger.multisig_info(&address).await? {
            Some(info) if info.satisfies(&setup) => {
                info!(identity = %identity, "Multisig already installed on chain");
                None
            }
            _ => Some(self.submit_setup(&setup).await?),
        };

        match submitted {
            None => self.complete_registration(identity, tx, None).await,
            Some(SubmitOutcome::Accepted { tx_hash }) => {
                self.complete_registration(identity, tx, Some(tx_hash)).await
            }
            Some(SubmitOutcome::Rejected { reason }) => self.fail_registration(identity, tx, reason).await,
        }
    }

    async fn submit_setup(&self, setup: &MultisigSetup) -> Result<SubmitOutcome> {
        match self.ledger.submit_multisig_setup(setup).await {
            Err(TipRelayError::ProviderRejected(reason)) => Ok(SubmitOutcome::Rejected { reason }),
            other => other,
        }
    }

    async fn complete_registration(
        &self,
        identity: &str,
        tx: &LedgerTransaction,
        tx_hash: Option<String>,
    ) -> Result<RegistrationOutcome> {
        let (moved, user) = self.registry.update_with_retry(identity, |user| {
            if user.registration_state != RegistrationState::AwaitingConfirmation
                || user.registration_event_id.as_deref() != Some(tx.hash.as_str())
            {
                return Ok(Step::Skip(false));
            }
            user.registration_state = RegistrationState::Registered;
            user.registration_event_id = None;
            Ok(Step::Commit(true))
        })?;

        if !moved {
            warn!(
                identity = %identity,
                state = %user.registration_state,
                "Registration state changed while the setup was outstanding"
            );
            return Ok(match user.registration_state {
                RegistrationState::Registered => RegistrationOutcome::Registered {
                    identity: identity.to_string(),
                    tx_hash,
                },
                _ => RegistrationOutcome::Duplicate,
            });
        }

        info!(identity = %identity, tx_hash = ?tx_hash, "Registration complete");
        let address = user.ledger_address.unwrap_or_default();
        self.notify(identity, &notices::registration_complete(&address)).await;

        Ok(RegistrationOutcome::Registered {
            identity: identity.to_string(),
            tx_hash,
        })
    }

    async fn fail_registration(
        &self,
        identity: &str,
        tx: &LedgerTransaction,
        reason: String,
    ) -> Result<RegistrationOutcome> {
        let (moved, user) = self.registry.update_with_retry(identity, |user| {
            if user.registration_event_id.as_deref() != Some(tx.hash.as_str()) {
                return Ok(Step::Skip(false));
            }
            user.registration_state = RegistrationState::RegistrationFailed;
            user.registration_event_id = None;
            user.challenge_code = None;
            Ok(Step::Commit(true))
        })?;

        if !moved {
            warn!(
                identity = %identity,
                state = %user.registration_state,
                reason = %reason,
                "Registration settled elsewhere before the failure was recorded"
            );
            return Ok(RegistrationOutcome::Duplicate);
        }

        warn!(identity = %identity, reason = %reason, "Multisig setup rejected");
        self.notify(identity, &notices::registration_failed(&reason)).await;

        Ok(RegistrationOutcome::Failed {
            identity: identity.to_string(),
            reason,
        })
    }

    /// Best effort: the registration outcome is already durable
    async fn notify(&self, identity: &str, text: &str) {
        if let Err(e) = self
            .social
            .send_direct_message(identity, notices::REGISTRATION_SUBJECT, text)
            .await
        {
            warn!(identity = %identity, error = %e, "Failed to send registration notice");
        }
    }

    /// Replay incoming transactions of every pending user's address through
    /// [`Self::handle_ledger_transaction`], covering blocks missed offline.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let pending = self.registry.pending_addresses()?;
        let mut report = ReconcileReport {
            addresses: pending.len(),
            ..Default::default()
        };

        for (identity, address) in pending {
            let transactions = match self.ledger.incoming_transactions(&address).await {
                Ok(txs) => txs,
                Err(e) if e.is_transient() => {
                    warn!(identity = %identity, error = %e, "Skipping reconciliation for now");
                    report.deferred += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Oldest first, so the first payload to arrive wins
            for tx in transactions.iter().rev() {
                report.transactions += 1;
                match self.handle_ledger_transaction(tx).await {
                    Ok(RegistrationOutcome::Registered { .. }) => report.registered += 1,
                    Ok(RegistrationOutcome::Failed { .. }) => report.failed += 1,
                    Ok(_) => {}
                    Err(e) if e.is_transient() => {
                        warn!(identity = %identity, tx = %tx.hash, error = %e, "Deferred reconciliation");
                        report.deferred += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            addresses = report.addresses,
            registered = report.registered,
            failed = report.failed,
            "Reconciled pending registrations"
        );
        Ok(report)
    }
}

/// Reason shown to the user for a non-retryable error
fn terminal_reason(err: TipRelayError) -> String {
    match err {
        TipRelayError::ProviderRejected(reason) => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_decode() {
        let payload = ChallengePayload::decode("ABC123\npubkey789").unwrap();
        assert_eq!(payload.code, "ABC123");
        assert_eq!(payload.cosigner_public_key, "pubkey789");

        assert_eq!(
            ChallengePayload::decode("  abc   def  "),
            Some(ChallengePayload {
                code: "abc".into(),
                cosigner_public_key: "def".into()
            })
        );
    }

    #[test]
    fn test_payload_shape_must_be_two_tokens() {
        assert!(ChallengePayload::decode("").is_none());
        assert!(ChallengePayload::decode("ABC123").is_none());
        assert!(ChallengePayload::decode("thanks for the coffee").is_none());
    }

    #[test]
    fn test_register_command_detection() {
        let message = |subject: Option<&str>, body: &str| InboxMessage {
            message_id: "m".into(),
            author: "bob".into(),
            subject: subject.map(str::to_string),
            body: body.into(),
        };

        assert!(RegistrationOrchestrator::is_register_command(&message(None, " Register\n")));
        assert!(RegistrationOrchestrator::is_register_command(&message(Some("REGISTER"), "hi")));
        assert!(!RegistrationOrchestrator::is_register_command(&message(
            Some("hello"),
            "please register me"
        )));
    }

    #[test]
    fn test_terminal_reason_unwraps_provider_text() {
        assert_eq!(
            terminal_reason(TipRelayError::ProviderRejected("FAILURE_MULTISIG_INVALID".into())),
            "FAILURE_MULTISIG_INVALID"
        );
        assert!(terminal_reason(TipRelayError::Validation("blank".into())).contains("blank"));
    }
}
