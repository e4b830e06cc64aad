//! HTTP gateway adapters
//!
//! The ledger gateway fronts a ledger node: it turns signed JSON intents into
//! native transactions and exposes blocks, incoming transactions and
//! multisig state. The social gateway fronts the platform API (posting,
//! inbox, comment search, rate limiting).
//!
//! Private keys never leave the process: every ledger submission carries a
//! signature from the [`KeyVault`] over the canonical JSON of the intent.
//!
//! Status mapping: 429 and 5xx are transient (`ProviderUnavailable`), other
//! non-success statuses are terminal (`ProviderRejected`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::custodial_keys::KeyVault;
use crate::types::{Result, TipRelayError, WalletRef, WalletRole};

use super::{
    Block, InboxMessage, LedgerAccount, LedgerClient, LedgerTransaction, MentionPost,
    MultisigInfo, MultisigSetup, SocialClient, SubmitOutcome, TransferAuthority, TransferRequest,
};

/// Connection settings for one gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Bearer token, if the gateway requires one
    pub token: Option<String>,
    pub request_timeout: Duration,
}

/// Thin JSON transport shared by both gateways
struct GatewayTransport {
    base_url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl GatewayTransport {
    fn new(config: &GatewayConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("tiprelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TipRelayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!(path = %path, "Gateway GET");
        let response = self
            .authorize(self.http_client.get(self.url(path)).query(query))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        debug!(path = %path, "Gateway POST");
        let response = self
            .authorize(self.http_client.post(self.url(path)).json(body))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn post_no_content<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        debug!(path = %path, "Gateway POST");
        self.authorize(self.http_client.post(self.url(path)).json(body))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

// =============================================================================
// Ledger gateway
// =============================================================================

#[derive(Debug, Serialize)]
struct TransferIntent<'a> {
    network: &'a str,
    signer_public_key: &'a str,
    /// Set when the signer initiates on behalf of a multisig account
    #[serde(skip_serializing_if = "Option::is_none")]
    multisig_account_public_key: Option<&'a str>,
    recipient_address: &'a str,
    amount_micros: u64,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct MultisigIntent<'a> {
    network: &'a str,
    account_public_key: &'a str,
    cosignatories: &'a [String],
    min_cosignatories: u8,
}

/// Intent plus the custodial signature over its canonical JSON
#[derive(Debug, Serialize)]
struct Signed<'a, T: Serialize> {
    intent: &'a T,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
}

/// Ledger client backed by the ledger gateway
pub struct HttpLedgerGateway {
    transport: GatewayTransport,
    vault: Arc<KeyVault>,
    network: String,
}

impl HttpLedgerGateway {
    pub fn new(config: &GatewayConfig, vault: Arc<KeyVault>, network: impl Into<String>) -> Result<Self> {
        Ok(Self {
            transport: GatewayTransport::new(config)?,
            vault,
            network: network.into(),
        })
    }

    fn sign<'a, T: Serialize>(&self, signer: &WalletRef, intent: &'a T) -> Result<Signed<'a, T>> {
        let canonical = serde_json::to_vec(intent)?;
        let signature = self.vault.sign(signer, &canonical)?;
        Ok(Signed { intent, signature })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerGateway {
    async fn derive_account(&self, identity: &str, role: WalletRole) -> Result<LedgerAccount> {
        let wallet = self.vault.wallet_ref(identity, role);
        let response: AddressResponse = self
            .transport
            .get(
                "/accounts/address",
                &[("public_key", wallet.public_key.as_str()), ("network", self.network.as_str())],
            )
            .await?;

        Ok(LedgerAccount {
            wallet,
            address: response.address,
        })
    }

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<SubmitOutcome> {
        let multisig_account = match &request.authority {
            TransferAuthority::Direct { .. } => None,
            TransferAuthority::Multisig { account, .. } => Some(account.public_key.as_str()),
        };
        let signer = request.authority.signer();

        let intent = TransferIntent {
            network: &self.network,
            signer_public_key: &signer.public_key,
            multisig_account_public_key: multisig_account,
            recipient_address: &request.recipient_address,
            amount_micros: request.amount.micros(),
            message: &request.message,
        };
        let signed = self.sign(signer, &intent)?;
        self.transport.post("/transfers", &signed).await
    }

    async fn submit_multisig_setup(&self, setup: &MultisigSetup) -> Result<SubmitOutcome> {
        let intent = MultisigIntent {
            network: &self.network,
            account_public_key: &setup.account.public_key,
            cosignatories: &setup.cosignatories,
            min_cosignatories: setup.min_cosignatories,
        };
        let signed = self.sign(&setup.account, &intent)?;
        self.transport.post("/multisig", &signed).await
    }

    async fn blocks_after(&self, height: u64) -> Result<Vec<Block>> {
        let after = height.to_string();
        self.transport.get("/blocks", &[("after", after.as_str())]).await
    }

    async fn incoming_transactions(&self, address: &str) -> Result<Vec<LedgerTransaction>> {
        self.transport
            .get(&format!("/accounts/{}/incoming", address), &[])
            .await
    }

    async fn multisig_info(&self, address: &str) -> Result<Option<MultisigInfo>> {
        self.transport
            .get(&format!("/accounts/{}/multisig", address), &[])
            .await
    }
}

// =============================================================================
// Social gateway
// =============================================================================

#[derive(Debug, Serialize)]
struct ReplyBody<'a> {
    target_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct DirectMessageBody<'a> {
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Social client backed by the social gateway
pub struct HttpSocialGateway {
    transport: GatewayTransport,
    community: String,
}

impl HttpSocialGateway {
    pub fn new(config: &GatewayConfig, community: impl Into<String>) -> Result<Self> {
        Ok(Self {
            transport: GatewayTransport::new(config)?,
            community: community.into(),
        })
    }
}

#[async_trait]
impl SocialClient for HttpSocialGateway {
    async fn matching_posts(&self, pattern: &str) -> Result<Vec<MentionPost>> {
        self.transport
            .get(
                "/posts",
                &[("community", self.community.as_str()), ("pattern", pattern)],
            )
            .await
    }

    async fn inbox(&self) -> Result<Vec<InboxMessage>> {
        self.transport.get("/inbox", &[]).await
    }

    async fn reply(&self, target_id: &str, text: &str) -> Result<()> {
        self.transport
            .post_no_content("/replies", &ReplyBody { target_id, text })
            .await
    }

    async fn send_direct_message(&self, identity: &str, subject: &str, text: &str) -> Result<()> {
        self.transport
            .post_no_content(
                "/messages",
                &DirectMessageBody {
                    to: identity,
                    subject,
                    text,
                },
            )
            .await
    }
}
