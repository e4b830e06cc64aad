//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tiprelay::clients::memory::{MemoryLedger, MemorySocial};
use tiprelay::clients::{
    Block, InboxMessage, LedgerAccount, LedgerClient, LedgerTransaction, MentionPost,
    MultisigInfo, MultisigSetup, SubmitOutcome, TransferRequest,
};
use tiprelay::custodial_keys::KeyVault;
use tiprelay::db::Database;
use tiprelay::services::{CasOutcome, InboxOutcome, RegistrationOutcome};
use tiprelay::types::{RegistrationState, Result, TipRelayError, User, WalletRole};
use tiprelay::{Engine, EngineConfig};

/// Key of the wallet a user sends their registration transaction from
pub const EXTERNAL_KEY: &str = "e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1";

/// Backup cosigner key a user supplies in the payload
pub const BACKUP_KEY: &str = "b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2";

pub struct Harness {
    pub engine: Engine,
    pub ledger: Arc<MemoryLedger>,
    pub social: Arc<MemorySocial>,
    pub vault: Arc<KeyVault>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, |ledger, _| ledger as Arc<dyn LedgerClient>)
    }

    /// Engine whose ledger client is `wrap(memory ledger, store)`. The
    /// memory ledger stays reachable through `self.ledger`.
    pub fn with_ledger<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<MemoryLedger>, Arc<Database>) -> Arc<dyn LedgerClient>,
    {
        Self::build(EngineConfig::default(), wrap)
    }

    fn build<F>(config: EngineConfig, wrap: F) -> Self
    where
        F: FnOnce(Arc<MemoryLedger>, Arc<Database>) -> Arc<dyn LedgerClient>,
    {
        let vault = Arc::new(KeyVault::from_secret("integration-test-secret").unwrap());
        let ledger = Arc::new(MemoryLedger::new(Arc::clone(&vault)));
        let social = Arc::new(MemorySocial::new());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let client = wrap(Arc::clone(&ledger), Arc::clone(&db));
        let engine = Engine::new(db, client, social.clone(), config);

        Self {
            engine,
            ledger,
            social,
            vault,
        }
    }

    pub fn user(&self, identity: &str) -> User {
        self.engine.registry.get(identity).unwrap().unwrap()
    }

    /// Send "register" from `identity` and return the issued code
    pub async fn request_registration(&self, identity: &str, message_id: &str) -> String {
        let outcome = self
            .engine
            .orchestrator
            .handle_inbox_message(&inbox_message(message_id, identity, "register"))
            .await
            .unwrap();
        match outcome {
            InboxOutcome::Replied(issued) => issued.code().unwrap().to_string(),
            other => panic!("unexpected inbox outcome: {:?}", other),
        }
    }

    /// Replace the outstanding challenge code of `identity`
    pub fn pin_code(&self, identity: &str, code: &str) {
        let user = self.user(identity);
        assert_eq!(user.registration_state, RegistrationState::ChallengeIssued);
        let outcome = self
            .engine
            .registry
            .compare_and_update(identity, user.version, |u| u.challenge_code = Some(code.into()))
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Updated(_)));
    }

    /// The transaction a user sends to confirm registration
    pub fn confirmation_tx(&self, identity: &str, hash: &str, code: &str) -> LedgerTransaction {
        LedgerTransaction {
            hash: hash.to_string(),
            signer_public_key: EXTERNAL_KEY.to_string(),
            recipient_address: self.user(identity).ledger_address.unwrap(),
            message: Some(format!("{}\n{}", code, BACKUP_KEY)),
            amount_micros: 1,
        }
    }

    /// Take `identity` all the way to `Registered`
    pub async fn register(&self, identity: &str) -> User {
        let code = self
            .request_registration(identity, &format!("register-{}", identity))
            .await;
        let tx = self.confirmation_tx(identity, &format!("confirm-{}", identity), &code);
        let outcome = self
            .engine
            .orchestrator
            .handle_ledger_transaction(&tx)
            .await
            .unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Registered { .. }));
        self.user(identity)
    }

    /// Give `identity` a custodial primary wallet without registering
    pub async fn provision(&self, identity: &str) {
        self.engine
            .provisioner
            .provision(identity, WalletRole::Primary)
            .await
            .unwrap();
    }
}

pub fn inbox_message(message_id: &str, author: &str, body: &str) -> InboxMessage {
    InboxMessage {
        message_id: message_id.to_string(),
        author: author.to_string(),
        subject: None,
        body: body.to_string(),
    }
}

pub fn mention(post_id: &str, author: &str, parent_author: &str, amount: &str) -> MentionPost {
    MentionPost {
        post_id: post_id.to_string(),
        author: author.to_string(),
        parent_author: Some(parent_author.to_string()),
        matched_amount: amount.to_string(),
    }
}

type SetupHook = Box<dyn Fn() + Send + Sync>;

/// Memory ledger with selected calls refused the way a gateway answers 4xx
pub struct ScriptedLedger {
    inner: Arc<MemoryLedger>,
    refuse_multisig_info: bool,
    refuse_derive_for: Option<String>,
    after_setup: Option<SetupHook>,
}

impl ScriptedLedger {
    pub fn new(inner: Arc<MemoryLedger>) -> Self {
        Self {
            inner,
            refuse_multisig_info: false,
            refuse_derive_for: None,
            after_setup: None,
        }
    }

    pub fn refusing_multisig_info(mut self) -> Self {
        self.refuse_multisig_info = true;
        self
    }

    pub fn refusing_derive_for(mut self, identity: &str) -> Self {
        self.refuse_derive_for = Some(identity.to_string());
        self
    }

    /// Run `hook` after each accepted multisig setup
    pub fn after_setup(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_setup = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn derive_account(&self, identity: &str, role: WalletRole) -> Result<LedgerAccount> {
        if self.refuse_derive_for.as_deref() == Some(identity) {
            return Err(TipRelayError::ProviderRejected("400 account name not allowed".into()));
        }
        self.inner.derive_account(identity, role).await
    }

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<SubmitOutcome> {
        self.inner.submit_transfer(request).await
    }

    async fn submit_multisig_setup(&self, setup: &MultisigSetup) -> Result<SubmitOutcome> {
        let outcome = self.inner.submit_multisig_setup(setup).await?;
        if let (SubmitOutcome::Accepted { .. }, Some(hook)) = (&outcome, &self.after_setup) {
            hook();
        }
        Ok(outcome)
    }

    async fn blocks_after(&self, height: u64) -> Result<Vec<Block>> {
        self.inner.blocks_after(height).await
    }

    async fn incoming_transactions(&self, address: &str) -> Result<Vec<LedgerTransaction>> {
        self.inner.incoming_transactions(address).await
    }

    async fn multisig_info(&self, address: &str) -> Result<Option<MultisigInfo>> {
        if self.refuse_multisig_info {
            return Err(TipRelayError::ProviderRejected("403 multisig lookup refused".into()));
        }
        self.inner.multisig_info(address).await
    }
}
