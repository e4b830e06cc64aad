//! Tip Relay
//!
//! Moves `amount` from the sender's primary account to the recipient's.
//! Recipients are provisioned silently; senders must already hold a primary
//! wallet. The relay never retries: redelivery is the caller's business,
//! keyed by the triggering event id.
//!
//! Every transfer carries `tip:<triggering event id>` as its message. Before
//! submitting, the recipient's incoming transactions are searched for that
//! reference, so a retry after an ambiguous failure does not pay twice.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clients::{LedgerClient, SubmitOutcome, TransferAuthority, TransferRequest};
use crate::types::{Amount, RegistrationState, Result, TipRelayError, User};

use super::provisioner::WalletProvisioner;
use super::registry::UserRegistry;

/// A tip to relay, as extracted from a social event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipRequest {
    pub from_identity: String,
    pub to_identity: String,
    /// Amount text as written by the sender
    pub amount: String,
    pub triggering_event_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InvalidAmount(String),
    SelfTip,
    SenderNotProvisioned,
    /// Terminal refusal from the ledger, e.g. insufficient balance
    Provider(String),
    /// A non-retryable error before anything was submitted
    Unprocessable(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount(text) => write!(f, "invalid amount {:?}", text),
            Self::SelfTip => f.write_str("you cannot tip yourself"),
            Self::SenderNotProvisioned => f.write_str("sender not provisioned"),
            Self::Provider(reason) => write!(f, "ledger rejected the transfer: {}", reason),
            Self::Unprocessable(reason) => write!(f, "the tip could not be processed ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Sent {
        tx_hash: String,
        amount: Amount,
        /// The sender must co-sign from their own wallet
        cosign_required: bool,
    },
    /// Not attempted now; the event should be retried later
    Deferred { reason: String },
    Rejected { reason: RejectReason },
}

/// Prefix of the message attached to relay transfers
pub const TIP_REFERENCE_PREFIX: &str = "tip:";

pub fn tip_reference(triggering_event_id: &str) -> String {
    format!("{}{}", TIP_REFERENCE_PREFIX, triggering_event_id)
}

pub struct TipRelay {
    registry: Arc<UserRegistry>,
    provisioner: Arc<WalletProvisioner>,
    ledger: Arc<dyn LedgerClient>,
}

impl TipRelay {
    pub fn new(
        registry: Arc<UserRegistry>,
        provisioner: Arc<WalletProvisioner>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            registry,
            provisioner,
            ledger,
        }
    }

    pub async fn relay(&self, request: &TipRequest) -> Result<RelayOutcome> {
        let reject = |reason: RejectReason| {
            debug!(event_id = %request.triggering_event_id, reason = %reason, "Tip rejected");
            Ok(RelayOutcome::Rejected { reason })
        };

        // Validation precedes any registry write or provisioning
        let amount = match Amount::parse(&request.amount) {
            Ok(amount) => amount,
            Err(_) => return reject(RejectReason::InvalidAmount(request.amount.clone())),
        };
        if request
            .from_identity
            .eq_ignore_ascii_case(&request.to_identity)
        {
            return reject(RejectReason::SelfTip);
        }

        let sender = self.registry.get_or_create(&request.from_identity)?;
        if sender.primary_wallet.is_none() {
            return reject(RejectReason::SenderNotProvisioned);
        }
        if sender.registration_state == RegistrationState::AwaitingConfirmation {
            return Ok(RelayOutcome::Deferred {
                reason: format!("account setup of {} is in flight", sender.identity),
            });
        }
        let authority = Self::authority_for(&sender)?;
        let cosign_required = matches!(authority, TransferAuthority::Multisig { .. });

        let (_, recipient_address) = self
            .provisioner
            .provision_primary(&request.to_identity)
            .await?;

        let reference = tip_reference(&request.triggering_event_id);
        let source_key = authority.account().public_key.clone();
        let incoming = self.ledger.incoming_transactions(&recipient_address).await?;
        // Anyone can tag a transfer with a public post id; only our own
        // transfer of the same amount counts
        if let Some(previous) = incoming.iter().find(|tx| {
            tx.message.as_deref() == Some(reference.as_str())
                && tx.signer_public_key.eq_ignore_ascii_case(&source_key)
                && tx.amount_micros == amount.micros()
        }) {
            info!(
                event_id = %request.triggering_event_id,
                tx_hash = %previous.hash,
                "Transfer already on the ledger, not resubmitting"
            );
            return Ok(RelayOutcome::Sent {
                tx_hash: previous.hash.clone(),
                amount,
                cosign_required,
            });
        }

        let transfer = TransferRequest {
            authority,
            recipient_address,
            amount,
            message: reference,
        };
        let submitted = match self.ledger.submit_transfer(&transfer).await {
            Err(TipRelayError::ProviderRejected(reason)) => SubmitOutcome::Rejected { reason },
            other => other?,
        };

        match submitted {
            SubmitOutcome::Accepted { tx_hash } => {
                info!(
                    from = %request.from_identity,
                    to = %request.to_identity,
                    amount = %amount,
                    tx_hash = %tx_hash,
                    "Tip submitted"
                );
                Ok(RelayOutcome::Sent {
                    tx_hash,
                    amount,
                    cosign_required,
                })
            }
            SubmitOutcome::Rejected { reason } => {
                warn!(
                    from = %request.from_identity,
                    reason = %reason,
                    "Ledger rejected tip"
                );
                reject(RejectReason::Provider(reason))
            }
        }
    }

    /// Who signs a transfer out of `sender`'s primary account
    fn authority_for(sender: &User) -> Result<TransferAuthority> {
        let primary = sender.primary_wallet.clone().ok_or_else(|| {
            TipRelayError::Internal(format!("{} has no primary wallet", sender.identity))
        })?;

        if !sender.is_registered() {
            return Ok(TransferAuthority::Direct { signer: primary });
        }
        let initiator = sender.cosigner_wallet.clone().ok_or_else(|| {
            TipRelayError::Internal(format!("registered {} has no cosigner wallet", sender.identity))
        })?;
        Ok(TransferAuthority::Multisig {
            initiator,
            account: primary,
        })
    }
}
