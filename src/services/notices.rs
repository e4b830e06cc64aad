//! User-facing message texts

use crate::types::Amount;

/// Subject line for registration notices
pub const REGISTRATION_SUBJECT: &str = "Tip bot registration";

/// Subject line for tip notices
pub const TIP_SUBJECT: &str = "Tip";

/// Sample cosigner key shown in the instructions
const EXAMPLE_COSIGNER_KEY: &str = "1c9ffd4361887a5bb448060df37b2f500c51580e57d512f97dddc7b7e547508a";

pub fn register_instructions(address: &str, code: &str) -> String {
    format!(
        "To finish registering, send a transaction of any amount from your own wallet to \
         {address}\n\n\
         The transaction message must contain your challenge code on the first line and \
         the public key of your backup cosigner account on the second line, for example:\n\n\
         {code}\n{EXAMPLE_COSIGNER_KEY}\n\n\
         Your account will then be converted to a 2-of-3 multisig between your wallet, \
         your backup key and this bot."
    )
}

pub fn already_registered() -> String {
    "You are already registered.".to_string()
}

pub fn registration_in_progress() -> String {
    "Your registration is in progress. You will get a message once the account setup is \
     confirmed."
        .to_string()
}

pub fn registration_unavailable(reason: &str) -> String {
    format!("Registration could not be started: {reason}\n\nPlease try again later.")
}

pub fn registration_complete(address: &str) -> String {
    format!(
        "Account registered! Tips you send from {address} now need your co-signature from \
         your own wallet."
    )
}

pub fn registration_failed(reason: &str) -> String {
    format!("Registration error! The ledger rejected the account setup: {reason}\n\nSend \"register\" to start over.")
}

pub fn tip_received(recipient: &str, sender: &str, amount: Amount, symbol: &str) -> String {
    format!(
        "u/{recipient}, you received a tip of {amount} {symbol} from u/{sender}. \
         Send me a message with \"register\" to claim your wallet."
    )
}

pub fn tip_initiated(recipient: &str, amount: Amount, symbol: &str, tx_hash: &str, needs_cosign: bool) -> String {
    let mut text = format!("Your tip of {amount} {symbol} to u/{recipient} was submitted (tx {tx_hash}).");
    if needs_cosign {
        text.push_str(" Co-sign it from your wallet to release the funds.");
    }
    text
}

pub fn tip_rejected(recipient: &str, reason: &str) -> String {
    format!("Your tip to u/{recipient} was not sent: {reason}")
}
