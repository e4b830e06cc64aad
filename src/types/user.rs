//! User records and custodial wallet references

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{Result, TipRelayError};

// =============================================================================
// Registration State
// =============================================================================

/// Registration lifecycle of a social identity.
///
/// `Unregistered → ChallengeIssued → AwaitingConfirmation → Registered`, with
/// `RegistrationFailed` reachable from any step and left again by issuing a
/// fresh challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    ChallengeIssued,
    AwaitingConfirmation,
    Registered,
    RegistrationFailed,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::ChallengeIssued => "challenge_issued",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Registered => "registered",
            Self::RegistrationFailed => "registration_failed",
        }
    }

    /// States in which a ledger message may still complete registration
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::ChallengeIssued | Self::AwaitingConfirmation)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationState {
    type Err = TipRelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unregistered" => Ok(Self::Unregistered),
            "challenge_issued" => Ok(Self::ChallengeIssued),
            "awaiting_confirmation" => Ok(Self::AwaitingConfirmation),
            "registered" => Ok(Self::Registered),
            "registration_failed" => Ok(Self::RegistrationFailed),
            other => Err(TipRelayError::Internal(format!(
                "unknown registration state: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Wallet References
// =============================================================================

/// Which of a user's two custodial accounts a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletRole {
    /// The account that holds funds (becomes the 2-of-3 multisig account)
    Primary,
    /// The bot-held cosignatory of the primary account
    Cosigner,
}

impl WalletRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Cosigner => "cosigner",
        }
    }
}

impl fmt::Display for WalletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletRole {
    type Err = TipRelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Self::Primary),
            "cosigner" => Ok(Self::Cosigner),
            other => Err(TipRelayError::Internal(format!("unknown wallet role: {}", other))),
        }
    }
}

/// Opaque handle to a custodial account.
///
/// Carries only public data: the key vault re-derives signing material from
/// `(identity, role)` and checks it against `public_key`.
///
/// Serialized as `v1/<role>/<public key hex>/<identity>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletRef {
    pub identity: String,
    pub role: WalletRole,
    pub public_key: String,
}

const WALLET_REF_VERSION: &str = "v1";

impl WalletRef {
    pub fn new(identity: impl Into<String>, role: WalletRole, public_key: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            role,
            public_key: public_key.into(),
        }
    }
}

impl fmt::Display for WalletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            WALLET_REF_VERSION, self.role, self.public_key, self.identity
        )
    }
}

impl FromStr for WalletRef {
    type Err = TipRelayError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(4, '/');
        let (Some(version), Some(role), Some(public_key), Some(identity)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TipRelayError::Internal(format!("malformed wallet ref: {}", s)));
        };

        if version != WALLET_REF_VERSION {
            return Err(TipRelayError::Internal(format!(
                "unsupported wallet ref version: {}",
                version
            )));
        }
        if public_key.is_empty() || identity.is_empty() {
            return Err(TipRelayError::Internal(format!("malformed wallet ref: {}", s)));
        }

        Ok(Self {
            identity: identity.to_string(),
            role: role.parse()?,
            public_key: public_key.to_string(),
        })
    }
}

// =============================================================================
// User
// =============================================================================

/// One row per social identity. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub identity: String,
    pub challenge_code: Option<String>,
    pub primary_wallet: Option<WalletRef>,
    pub cosigner_wallet: Option<WalletRef>,
    /// Cached address of the primary account
    pub ledger_address: Option<String>,
    pub registration_state: RegistrationState,
    /// Ledger transaction that consumed the challenge, kept while the
    /// multisig setup is outstanding so a redelivered event can resume it
    pub registration_event_id: Option<String>,
    /// Optimistic concurrency stamp, bumped on every write
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// A fresh, unwritten row for `identity`
    pub fn new(identity: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            identity: identity.into(),
            challenge_code: None,
            primary_wallet: None,
            cosigner_wallet: None,
            ledger_address: None,
            registration_state: RegistrationState::Unregistered,
            registration_event_id: None,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn wallet(&self, role: WalletRole) -> Option<&WalletRef> {
        match role {
            WalletRole::Primary => self.primary_wallet.as_ref(),
            WalletRole::Cosigner => self.cosigner_wallet.as_ref(),
        }
    }

    pub fn set_wallet(&mut self, wallet: WalletRef) {
        match wallet.role {
            WalletRole::Primary => self.primary_wallet = Some(wallet),
            WalletRole::Cosigner => self.cosigner_wallet = Some(wallet),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration_state == RegistrationState::Registered
    }

    /// Check the state-machine invariants. Every write path calls this
    /// before persisting.
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: &str| {
            Err(TipRelayError::Internal(format!(
                "user {} violates invariant: {}",
                self.identity, msg
            )))
        };

        if self.identity.trim().is_empty() {
            return violation("empty identity");
        }
        if self.challenge_code.is_some() && !self.registration_state.is_pending() {
            return violation("challenge code outside challenge states");
        }
        if self.registration_state == RegistrationState::ChallengeIssued
            && self.challenge_code.is_none()
        {
            return violation("challenge issued without a code");
        }
        if self.registration_state == RegistrationState::Registered
            && (self.primary_wallet.is_none()
                || self.cosigner_wallet.is_none()
                || self.ledger_address.is_none())
        {
            return violation("registered without wallets and address");
        }
        if self.registration_event_id.is_some()
            && self.registration_state != RegistrationState::AwaitingConfirmation
        {
            return violation("registration event outside awaiting confirmation");
        }
        for (role, wallet) in [
            (WalletRole::Primary, &self.primary_wallet),
            (WalletRole::Cosigner, &self.cosigner_wallet),
        ] {
            if let Some(w) = wallet {
                if w.role != role || w.identity != self.identity {
                    return violation("wallet ref belongs to another slot");
                }
            }
        }
        Ok(())
    }
}
