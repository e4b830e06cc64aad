//! Mention handler: turns a matching post into a relay and tells both
//! parties how it went.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clients::{MentionPost, SocialClient};
use crate::types::{EventKey, Result};

use super::event_ledger::EventLedger;
use super::notices;
use super::tip_relay::{RejectReason, RelayOutcome, TipRelay, TipRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionOutcome {
    Duplicate,
    /// Top-level post or otherwise without a recipient
    NotActionable,
    Relayed(RelayOutcome),
}

pub struct MentionHandler {
    events: Arc<EventLedger>,
    relay: Arc<TipRelay>,
    social: Arc<dyn SocialClient>,
    token_symbol: String,
}

impl MentionHandler {
    pub fn new(
        events: Arc<EventLedger>,
        relay: Arc<TipRelay>,
        social: Arc<dyn SocialClient>,
        token_symbol: impl Into<String>,
    ) -> Self {
        Self {
            events,
            relay,
            social,
            token_symbol: token_symbol.into(),
        }
    }

    pub async fn handle_post(&self, post: &MentionPost) -> Result<MentionOutcome> {
        let key = EventKey::post(&post.post_id);
        let Some(claim) = self.events.begin(&key)? else {
            return Ok(MentionOutcome::Duplicate);
        };

        let Some(recipient) = post
            .parent_author
            .as_deref()
            .map(str::trim)
            .filter(|author| !author.is_empty())
        else {
            debug!(post_id = %post.post_id, "Mention has no parent author");
            claim.complete()?;
            return Ok(MentionOutcome::NotActionable);
        };

        let request = TipRequest {
            from_identity: post.author.clone(),
            to_identity: recipient.to_string(),
            amount: post.matched_amount.clone(),
            triggering_event_id: post.post_id.clone(),
        };
        let outcome = match self.relay.relay(&request).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                warn!(post_id = %post.post_id, error = %e, kind = e.kind(), "Tip failed terminally");
                RelayOutcome::Rejected {
                    reason: RejectReason::Unprocessable(e.to_string()),
                }
            }
        };

        match &outcome {
            RelayOutcome::Sent {
                tx_hash,
                amount,
                cosign_required,
            } => {
                let public = notices::tip_received(recipient, &post.author, *amount, &self.token_symbol);
                if let Err(e) = self.social.reply(&post.post_id, &public).await {
                    warn!(post_id = %post.post_id, error = %e, "Failed to reply to tip post");
                }
                let private = notices::tip_initiated(
                    recipient,
                    *amount,
                    &self.token_symbol,
                    tx_hash,
                    *cosign_required,
                );
                self.direct_message(&post.author, &private).await;
            }
            RelayOutcome::Deferred { reason } => {
                debug!(post_id = %post.post_id, reason = %reason, "Tip deferred");
            }
            RelayOutcome::Rejected {
                reason: RejectReason::InvalidAmount(_),
            } => {}
            RelayOutcome::Rejected { reason } => {
                let text = notices::tip_rejected(recipient, &reason.to_string());
                self.direct_message(&post.author, &text).await;
            }
        }

        // Deferred posts stay unmarked and are picked up on a later cycle
        if !matches!(outcome, RelayOutcome::Deferred { .. }) {
            claim.complete()?;
        }
        Ok(MentionOutcome::Relayed(outcome))
    }

    async fn direct_message(&self, identity: &str, text: &str) {
        if let Err(e) = self
            .social
            .send_direct_message(identity, notices::TIP_SUBJECT, text)
            .await
        {
            warn!(identity = %identity, error = %e, "Failed to send tip notice");
        }
    }
}
