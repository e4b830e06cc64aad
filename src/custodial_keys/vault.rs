//! Key vault - the only holder of custodial signing material
//!
//! Wallet references stored in the registry carry public data only. The
//! vault re-derives the signing key from `(identity, role)` when a ledger
//! adapter needs a signature, and refuses if the derived public key no
//! longer matches the reference (e.g. the master secret was rotated).

use ed25519_dalek::SigningKey;
use tracing::debug;
use zeroize::Zeroizing;

use crate::types::{Result, TipRelayError, WalletRef, WalletRole};

use super::crypto::{
    derive_signing_key, master_secret_from_passphrase, public_key_hex, sign_payload,
    MASTER_SECRET_LEN,
};

/// Holds the master secret and derives per-user custodial keys.
pub struct KeyVault {
    master: Zeroizing<[u8; MASTER_SECRET_LEN]>,
}

impl KeyVault {
    /// Build a vault from the operator's wallet secret.
    pub fn from_secret(secret: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(TipRelayError::Config("wallet secret must not be empty".into()));
        }
        Ok(Self {
            master: master_secret_from_passphrase(secret.as_bytes()),
        })
    }

    fn signing_key(&self, identity: &str, role: WalletRole) -> SigningKey {
        derive_signing_key(&self.master, identity, role)
    }

    /// Public key (hex) of the account for `(identity, role)`
    pub fn public_key(&self, identity: &str, role: WalletRole) -> String {
        public_key_hex(&self.signing_key(identity, role).verifying_key())
    }

    /// Reference to the account for `(identity, role)`
    pub fn wallet_ref(&self, identity: &str, role: WalletRole) -> WalletRef {
        WalletRef::new(identity, role, self.public_key(identity, role))
    }

    /// Sign `payload` with the account behind `wallet`.
    ///
    /// Returns the hex-encoded 64-byte Ed25519 signature.
    pub fn sign(&self, wallet: &WalletRef, payload: &[u8]) -> Result<String> {
        let key = self.signing_key(&wallet.identity, wallet.role);
        if public_key_hex(&key.verifying_key()) != wallet.public_key {
            return Err(TipRelayError::Internal(format!(
                "wallet ref {} does not match vault derivation",
                wallet
            )));
        }

        debug!(identity = %wallet.identity, role = %wallet.role, "Signing with custodial key");
        Ok(hex::encode(sign_payload(&key, payload).to_bytes()))
    }
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}
