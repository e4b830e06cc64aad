//! In-process ledger and social adapters
//!
//! Used for `DEV_MODE` and as test fakes. Both keep their state behind a
//! tokio `RwLock` and support scripted failures:
//! - `set_unavailable(true)` makes every call fail with `ProviderUnavailable`
//! - `MemoryLedger::reject_next` queues terminal rejections for submissions

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::custodial_keys::KeyVault;
use crate::types::{Result, TipRelayError, WalletRole};

use super::{
    Block, InboxMessage, LedgerAccount, LedgerClient, LedgerTransaction, MentionPost,
    MultisigInfo, MultisigSetup, SocialClient, SubmitOutcome, TransferRequest,
};

// =============================================================================
// Ledger
// =============================================================================

#[derive(Default)]
struct LedgerState {
    blocks: Vec<Block>,
    /// Incoming transactions per address, oldest first
    incoming: HashMap<String, Vec<LedgerTransaction>>,
    multisig: HashMap<String, MultisigInfo>,
    transfers: Vec<TransferRequest>,
    setups: Vec<MultisigSetup>,
    rejections: VecDeque<String>,
    unavailable: bool,
    derive_calls: u64,
    submissions: u64,
}

/// Ledger with derived addresses, recorded submissions and injectable blocks
pub struct MemoryLedger {
    vault: Arc<KeyVault>,
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self {
            vault,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Address of the account owning `public_key`
    pub fn address_of(public_key: &str) -> String {
        let digest = Sha256::digest(public_key.to_ascii_lowercase().as_bytes());
        format!("T{}", hex::encode_upper(&digest[..20]))
    }

    /// Append a block carrying `transactions` and return its height
    pub async fn push_block(&self, transactions: Vec<LedgerTransaction>) -> u64 {
        let mut state = self.state.write().await;
        let height = state.blocks.last().map(|b| b.height + 1).unwrap_or(1);
        for tx in &transactions {
            state
                .incoming
                .entry(tx.recipient_address.clone())
                .or_default()
                .push(tx.clone());
        }
        state.blocks.push(Block { height, transactions });
        height
    }

    /// Queue a terminal rejection for the next submission
    pub async fn reject_next(&self, reason: impl Into<String>) {
        self.state.write().await.rejections.push_back(reason.into());
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Accepted transfers, in submission order
    pub async fn transfers(&self) -> Vec<TransferRequest> {
        self.state.read().await.transfers.clone()
    }

    /// Accepted multisig setups, in submission order
    pub async fn multisig_setups(&self) -> Vec<MultisigSetup> {
        self.state.read().await.setups.clone()
    }

    /// Number of submissions attempted, accepted or rejected
    pub async fn submission_count(&self) -> u64 {
        self.state.read().await.submissions
    }

    pub async fn derive_calls(&self) -> u64 {
        self.state.read().await.derive_calls
    }

    async fn begin_submission(&self) -> Result<Option<String>> {
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(TipRelayError::ProviderUnavailable("memory ledger offline".into()));
        }
        state.submissions += 1;
        Ok(state.rejections.pop_front())
    }

    fn tx_hash(kind: &str, sequence: u64) -> String {
        hex::encode(Sha256::digest(format!("{}/{}", kind, sequence).as_bytes()))
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn derive_account(&self, identity: &str, role: WalletRole) -> Result<LedgerAccount> {
        {
            let mut state = self.state.write().await;
            if state.unavailable {
                return Err(TipRelayError::ProviderUnavailable("memory ledger offline".into()));
            }
            state.derive_calls += 1;
        }

        let wallet = self.vault.wallet_ref(identity, role);
        let address = Self::address_of(&wallet.public_key);
        Ok(LedgerAccount { wallet, address })
    }

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<SubmitOutcome> {
        if let Some(reason) = self.begin_submission().await? {
            debug!(reason = %reason, "Memory ledger rejecting transfer");
            return Ok(SubmitOutcome::Rejected { reason });
        }

        let source = request.authority.account();

        let mut state = self.state.write().await;
        let tx_hash = Self::tx_hash("transfer", state.submissions);
        let tx = LedgerTransaction {
            hash: tx_hash.clone(),
            signer_public_key: source.public_key.clone(),
            recipient_address: request.recipient_address.clone(),
            message: Some(request.message.clone()),
            amount_micros: request.amount.micros(),
        };
        state
            .incoming
            .entry(request.recipient_address.clone())
            .or_default()
            .push(tx);
        state.transfers.push(request.clone());

        Ok(SubmitOutcome::Accepted { tx_hash })
    }

    async fn submit_multisig_setup(&self, setup: &MultisigSetup) -> Result<SubmitOutcome> {
        if let Some(reason) = self.begin_submission().await? {
            debug!(reason = %reason, "Memory ledger rejecting multisig setup");
            return Ok(SubmitOutcome::Rejected { reason });
        }

        let mut state = self.state.write().await;
        let tx_hash = Self::tx_hash("multisig", state.submissions);
        state.multisig.insert(
            Self::address_of(&setup.account.public_key),
            MultisigInfo {
                cosignatories: setup.cosignatories.clone(),
                min_cosignatories: setup.min_cosignatories,
            },
        );
        state.setups.push(setup.clone());

        Ok(SubmitOutcome::Accepted { tx_hash })
    }

    async fn blocks_after(&self, height: u64) -> Result<Vec<Block>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(TipRelayError::ProviderUnavailable("memory ledger offline".into()));
        }
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.height > height)
            .cloned()
            .collect())
    }

    async fn incoming_transactions(&self, address: &str) -> Result<Vec<LedgerTransaction>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(TipRelayError::ProviderUnavailable("memory ledger offline".into()));
        }
        Ok(state
            .incoming
            .get(address)
            .map(|txs| txs.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn multisig_info(&self, address: &str) -> Result<Option<MultisigInfo>> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(TipRelayError::ProviderUnavailable("memory ledger offline".into()));
        }
        Ok(state.multisig.get(address).cloned())
    }
}

// =============================================================================
// Social
// =============================================================================

/// A direct message recorded by [`MemorySocial`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Default)]
struct SocialState {
    posts: Vec<MentionPost>,
    inbox: Vec<InboxMessage>,
    replies: Vec<(String, String)>,
    direct_messages: Vec<SentMessage>,
    unavailable: bool,
    failing_replies: bool,
    refused_replies: bool,
}

/// Social platform with a scripted feed and recorded outbound messages.
///
/// `matching_posts` returns every queued post: pattern matching and amount
/// capture happen on the platform side.
#[derive(Default)]
pub struct MemorySocial {
    state: RwLock<SocialState>,
}

impl MemorySocial {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_post(&self, post: MentionPost) {
        self.state.write().await.posts.push(post);
    }

    pub async fn add_inbox_message(&self, message: InboxMessage) {
        self.state.write().await.inbox.push(message);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Make `reply` fail transiently while other calls keep working
    pub async fn set_failing_replies(&self, failing: bool) {
        self.state.write().await.failing_replies = failing;
    }

    /// Make `reply` fail terminally, as for a deleted or locked thread
    pub async fn set_refused_replies(&self, refused: bool) {
        self.state.write().await.refused_replies = refused;
    }

    /// `(target_id, text)` pairs, in order
    pub async fn replies(&self) -> Vec<(String, String)> {
        self.state.read().await.replies.clone()
    }

    pub async fn direct_messages(&self) -> Vec<SentMessage> {
        self.state.read().await.direct_messages.clone()
    }

    fn check(state: &SocialState) -> Result<()> {
        if state.unavailable {
            return Err(TipRelayError::ProviderUnavailable("memory social offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SocialClient for MemorySocial {
    async fn matching_posts(&self, _pattern: &str) -> Result<Vec<MentionPost>> {
        let state = self.state.read().await;
        Self::check(&state)?;
        Ok(state.posts.clone())
    }

    async fn inbox(&self) -> Result<Vec<InboxMessage>> {
        let state = self.state.read().await;
        Self::check(&state)?;
        Ok(state.inbox.clone())
    }

    async fn reply(&self, target_id: &str, text: &str) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check(&state)?;
        if state.failing_replies {
            return Err(TipRelayError::ProviderUnavailable("reply rate limited".into()));
        }
        if state.refused_replies {
            return Err(TipRelayError::ProviderRejected("403 thread locked".into()));
        }
        state.replies.push((target_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_direct_message(&self, identity: &str, subject: &str, text: &str) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check(&state)?;
        state.direct_messages.push(SentMessage {
            to: identity.to_string(),
            subject: subject.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
