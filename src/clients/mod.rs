//! External collaborators: the ledger and the social platform
//!
//! The engine only consumes these two surfaces. Implementations:
//! - [`http`]: JSON gateways fronting the real ledger node and social API
//! - [`memory`]: in-process fakes for dev mode and tests

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Amount, Result, WalletRef, WalletRole};

// =============================================================================
// Ledger types
// =============================================================================

/// An account derived for `(identity, role)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAccount {
    pub wallet: WalletRef,
    pub address: String,
}

/// A transaction as observed on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Transaction hash, used as the event id
    pub hash: String,
    /// Public key (hex) of the signing account
    pub signer_public_key: String,
    pub recipient_address: String,
    /// Decoded plain-text message; `None` for empty or encrypted messages
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub amount_micros: u64,
}

/// A block and the transactions it carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub transactions: Vec<LedgerTransaction>,
}

/// Who authorizes a transfer out of a user's primary account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferAuthority {
    /// The primary account signs for itself (not yet converted to multisig)
    Direct { signer: WalletRef },
    /// The bot's cosigner initiates on behalf of the multisig primary account;
    /// the user co-signs from their own wallet
    Multisig { initiator: WalletRef, account: WalletRef },
}

impl TransferAuthority {
    /// The wallet whose key signs the submission
    pub fn signer(&self) -> &WalletRef {
        match self {
            Self::Direct { signer } => signer,
            Self::Multisig { initiator, .. } => initiator,
        }
    }

    /// The account the funds leave from
    pub fn account(&self) -> &WalletRef {
        match self {
            Self::Direct { signer } => signer,
            Self::Multisig { account, .. } => account,
        }
    }
}

/// A transfer to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub authority: TransferAuthority,
    pub recipient_address: String,
    pub amount: Amount,
    /// Plain-text message attached to the transfer
    pub message: String,
}

/// A 2-of-3 (or other M-of-N) account-control change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigSetup {
    /// Account being converted; signs the change
    pub account: WalletRef,
    /// Cosignatory public keys (hex)
    pub cosignatories: Vec<String>,
    pub min_cosignatories: u8,
}

/// Current multisig configuration of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigInfo {
    pub cosignatories: Vec<String>,
    pub min_cosignatories: u8,
}

impl MultisigInfo {
    /// Whether this configuration already includes `setup`
    pub fn satisfies(&self, setup: &MultisigSetup) -> bool {
        self.min_cosignatories >= setup.min_cosignatories
            && setup
                .cosignatories
                .iter()
                .all(|key| self.cosignatories.iter().any(|c| c.eq_ignore_ascii_case(key)))
    }
}

/// Provider verdict on a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted { tx_hash: String },
    Rejected { reason: String },
}

/// Ledger client surface consumed by the engine.
///
/// Submissions return `Ok(SubmitOutcome::Rejected)` for terminal provider
/// refusals and `Err(ProviderUnavailable)` when the outcome is unknown.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Deterministically derive the account for `(identity, role)`
    async fn derive_account(&self, identity: &str, role: WalletRole) -> Result<LedgerAccount>;

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<SubmitOutcome>;

    async fn submit_multisig_setup(&self, setup: &MultisigSetup) -> Result<SubmitOutcome>;

    /// Blocks with height strictly greater than `height`, ascending
    async fn blocks_after(&self, height: u64) -> Result<Vec<Block>>;

    /// Transactions received by `address`, newest first
    async fn incoming_transactions(&self, address: &str) -> Result<Vec<LedgerTransaction>>;

    /// Multisig configuration of `address`, `None` for a plain account
    async fn multisig_info(&self, address: &str) -> Result<Option<MultisigInfo>>;
}

// =============================================================================
// Social types
// =============================================================================

/// A post matching the tip pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionPost {
    pub post_id: String,
    pub author: String,
    /// Author of the post being replied to; the tip recipient
    #[serde(default)]
    pub parent_author: Option<String>,
    /// Amount text captured by the pattern
    pub matched_amount: String,
}

/// A private message in the bot's inbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub message_id: String,
    pub author: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

/// Social platform surface consumed by the engine
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Recent posts matching `pattern`
    async fn matching_posts(&self, pattern: &str) -> Result<Vec<MentionPost>>;

    /// Recent inbox messages
    async fn inbox(&self) -> Result<Vec<InboxMessage>>;

    /// Reply to a post or message
    async fn reply(&self, target_id: &str, text: &str) -> Result<()>;

    async fn send_direct_message(&self, identity: &str, subject: &str, text: &str) -> Result<()>;
}
