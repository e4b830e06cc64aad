//! Cryptographic primitives for custodial accounts.
//!
//! # Algorithms
//!
//! - **Key Derivation**: SHA-256 over a domain-separated
//!   `(master secret, role, identity)` tuple, used as an Ed25519 seed
//! - **Signing**: Ed25519
//! - **Challenge codes**: 8 bytes from the OS RNG, hex encoded
//!
//! Derivation is deterministic so a lost registry row can be rebuilt from
//! the identity alone, and concurrent provisioners agree on the result.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::types::WalletRole;

// =============================================================================
// Constants
// =============================================================================

/// Domain separation tag mixed into every derivation
pub const DERIVATION_DOMAIN: &[u8] = b"tiprelay/custodial-key/v1";

/// Master secret length (32 bytes)
pub const MASTER_SECRET_LEN: usize = 32;

/// Random bytes in a challenge code (64 bits)
pub const CHALLENGE_CODE_BYTES: usize = 8;

// =============================================================================
// Key Derivation
// =============================================================================

/// Stretch an operator-supplied secret into the 32-byte master secret.
pub fn master_secret_from_passphrase(passphrase: &[u8]) -> Zeroizing<[u8; MASTER_SECRET_LEN]> {
    let mut hasher = Sha256::new();
    hasher.update(DERIVATION_DOMAIN);
    hasher.update(b"/master");
    hasher.update(passphrase);
    Zeroizing::new(hasher.finalize().into())
}

/// Derive the Ed25519 signing key for `(identity, role)`.
///
/// Identity and role are length-prefixed so no two distinct tuples hash
/// the same input.
pub fn derive_signing_key(
    master: &[u8; MASTER_SECRET_LEN],
    identity: &str,
    role: WalletRole,
) -> SigningKey {
    let mut hasher = Sha256::new();
    hasher.update(DERIVATION_DOMAIN);
    hasher.update(master);
    for part in [role.as_str().as_bytes(), identity.as_bytes()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let seed: Zeroizing<[u8; 32]> = Zeroizing::new(hasher.finalize().into());
    SigningKey::from_bytes(&seed)
}

/// Hex-encoded public key for a verifying key
pub fn public_key_hex(key: &VerifyingKey) -> String {
    hex::encode(key.to_bytes())
}

// =============================================================================
// Randomness
// =============================================================================

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Fresh single-use challenge code (16 lowercase hex characters)
pub fn generate_challenge_code() -> String {
    hex::encode(generate_random_bytes::<CHALLENGE_CODE_BYTES>())
}

// =============================================================================
// Signing
// =============================================================================

/// Sign a payload with an Ed25519 private key.
pub fn sign_payload(signing_key: &SigningKey, payload: &[u8]) -> Signature {
    signing_key.sign(payload)
}

// =============================================================================
// Tests
// =============================================================================
