//! Wallet Provisioner
//!
//! Derives a user's custodial accounts on first need and records the
//! references on their row. Derivation is deterministic in
//! `(identity, role)`, and the write is a compare-and-set, so concurrent
//! provisioners converge on whichever reference landed first.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::LedgerClient;
use crate::types::{Result, TipRelayError, WalletRef, WalletRole};

use super::registry::{Step, UserRegistry};

pub struct WalletProvisioner {
    registry: Arc<UserRegistry>,
    ledger: Arc<dyn LedgerClient>,
}

impl WalletProvisioner {
    pub fn new(registry: Arc<UserRegistry>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { registry, ledger }
    }

    /// Reference to the `role` account of `identity`, deriving and storing
    /// it if the row has none yet.
    ///
    /// Provisioning the primary account also caches its ledger address.
    pub async fn provision(&self, identity: &str, role: WalletRole) -> Result<WalletRef> {
        let user = self.registry.get_or_create(identity)?;
        if let Some(existing) = user.wallet(role) {
            if role == WalletRole::Cosigner || user.ledger_address.is_some() {
                return Ok(existing.clone());
            }
        }

        // No registry state is held across the ledger call
        let account = self.ledger.derive_account(identity, role).await?;

        let (wallet, stored) = self.registry.update_with_retry(identity, |user| {
            let mut changed = false;
            let wallet = match user.wallet(role) {
                Some(existing) => existing.clone(),
                None => {
                    user.set_wallet(account.wallet.clone());
                    changed = true;
                    account.wallet.clone()
                }
            };
            if role == WalletRole::Primary
                && user.ledger_address.is_none()
                && wallet == account.wallet
            {
                user.ledger_address = Some(account.address.clone());
                changed = true;
            }
            Ok(if changed { Step::Commit(wallet) } else { Step::Skip(wallet) })
        })?;

        if wallet != account.wallet {
            warn!(
                identity = %identity,
                role = %role,
                "Stored wallet ref differs from current derivation"
            );
        } else if stored.version > user.version {
            info!(identity = %identity, role = %role, "Provisioned wallet");
        }
        Ok(wallet)
    }

    /// Primary wallet of `identity` together with its ledger address
    pub async fn provision_primary(&self, identity: &str) -> Result<(WalletRef, String)> {
        let wallet = self.provision(identity, WalletRole::Primary).await?;
        let address = self
            .registry
            .get(identity)?
            .and_then(|user| user.ledger_address)
            .ok_or_else(|| {
                TipRelayError::Internal(format!("no ledger address cached for {}", identity))
            })?;
        Ok((wallet, address))
    }
}
