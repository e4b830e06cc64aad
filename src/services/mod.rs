//! Services layer for tiprelay
//!
//! Reconciliation logic between the registry, the dedupe ledger and the two
//! external clients.
//!
//! ## Services
//!
//! - **UserRegistry**: user rows, optimistic compare-and-update
//! - **EventLedger**: processed-event dedupe gate with in-flight claims
//! - **ChallengeProtocol**: single-use registration codes
//! - **WalletProvisioner**: deterministic custodial accounts per `(identity, role)`
//! - **RegistrationOrchestrator**: challenge → 2-of-3 multisig account
//! - **TipRelay**: transfers between primary accounts
//! - **MentionHandler**: tip posts → relay → notifications

pub mod challenge;
pub mod event_ledger;
pub mod mentions;
pub mod notices;
pub mod provisioner;
pub mod registration;
pub mod registry;
pub mod tip_relay;

pub use challenge::{ChallengeProtocol, IssueOutcome};
pub use event_ledger::{EventClaim, EventLedger};
pub use mentions::{MentionHandler, MentionOutcome};
pub use provisioner::WalletProvisioner;
pub use registration::{
    ChallengePayload, InboxOutcome, ReconcileReport, RegistrationOrchestrator, RegistrationOutcome,
    MULTISIG_THRESHOLD,
};
pub use registry::{CasOutcome, Step, UserRegistry};
pub use tip_relay::{tip_reference, RejectReason, RelayOutcome, TipRelay, TipRequest};
