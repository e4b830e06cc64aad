//! Registration flow integration tests: inbox request, ledger confirmation,
//! multisig setup, failure and resume paths.

mod common;

use std::sync::Arc;

use common::{inbox_message, Harness, ScriptedLedger, BACKUP_KEY, EXTERNAL_KEY};
use tiprelay::clients::{LedgerClient, LedgerTransaction};
use tiprelay::services::{
    CasOutcome, InboxOutcome, IssueOutcome, RegistrationOutcome, Step, UserRegistry,
};
use tiprelay::types::{EventKey, RegistrationState};
use tiprelay::worker::Poller;

#[tokio::test]
async fn test_bob_registers_with_two_of_three_multisig() {
    let h = Harness::new();

    h.request_registration("bob", "m-bob").await;
    h.pin_code("bob", "ABC123");

    let tx = LedgerTransaction {
        hash: "tx-bob".into(),
        signer_public_key: EXTERNAL_KEY.into(),
        recipient_address: h.user("bob").ledger_address.unwrap(),
        message: Some("ABC123\npubkey789".into()),
        amount_micros: 1,
    };
    let outcome = h.engine.orchestrator.handle_ledger_transaction(&tx).await.unwrap();
    assert!(matches!(
        outcome,
        RegistrationOutcome::Registered { ref identity, tx_hash: Some(_) } if identity == "bob"
    ));

    let bob = h.user("bob");
    assert_eq!(bob.registration_state, RegistrationState::Registered);
    assert_eq!(bob.challenge_code, None);
    assert_eq!(bob.registration_event_id, None);

    let setups = h.ledger.multisig_setups().await;
    assert_eq!(setups.len(), 1);
    assert_eq!(Some(&setups[0].account), bob.primary_wallet.as_ref());
    assert_eq!(
        setups[0].cosignatories,
        vec![
            EXTERNAL_KEY.to_string(),
            "pubkey789".to_string(),
            bob.cosigner_wallet.unwrap().public_key,
        ]
    );
    assert_eq!(setups[0].min_cosignatories, 2);

    let dms = h.social.direct_messages().await;
    assert!(dms.iter().any(|m| m.to == "bob" && m.text.contains("Account registered!")));
    assert!(h.engine.events.already_processed(&EventKey::tx("tx-bob")).unwrap());
}

#[tokio::test]
async fn test_register_reply_carries_address_and_code() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;

    let replies = h.social.replies().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "m1");
    assert!(replies[0].1.contains(&code));
    assert!(replies[0].1.contains(&h.user("bob").ledger_address.unwrap()));
}

#[tokio::test]
async fn test_repeated_register_keeps_code() {
    let h = Harness::new();
    let first = h.request_registration("bob", "m1").await;
    let second = h.request_registration("bob", "m2").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_duplicate_inbox_message_replies_once() {
    let h = Harness::new();
    let message = inbox_message("m1", "bob", "register");

    let first = h.engine.orchestrator.handle_inbox_message(&message).await.unwrap();
    let second = h.engine.orchestrator.handle_inbox_message(&message).await.unwrap();

    assert!(matches!(first, InboxOutcome::Replied(IssueOutcome::Fresh(_))));
    assert_eq!(second, InboxOutcome::Duplicate);
    assert_eq!(h.social.replies().await.len(), 1);
}

#[tokio::test]
async fn test_other_inbox_messages_not_actionable() {
    let h = Harness::new();
    let outcome = h
        .engine
        .orchestrator
        .handle_inbox_message(&inbox_message("m1", "bob", "thanks for the tip!"))
        .await
        .unwrap();

    assert_eq!(outcome, InboxOutcome::NotActionable);
    assert!(h.social.replies().await.is_empty());
    assert!(h.engine.registry.get("bob").unwrap().is_none());
}

#[tokio::test]
async fn test_failed_reply_leaves_message_for_retry() {
    let h = Harness::new();
    let message = inbox_message("m1", "bob", "register");

    h.social.set_failing_replies(true).await;
    let err = h.engine.orchestrator.handle_inbox_message(&message).await.unwrap_err();
    assert!(err.is_transient());
    assert!(!h.engine.events.already_processed(&EventKey::message("m1")).unwrap());

    h.social.set_failing_replies(false).await;
    let outcome = h.engine.orchestrator.handle_inbox_message(&message).await.unwrap();
    assert!(matches!(outcome, InboxOutcome::Replied(IssueOutcome::Reissued(_))));
    assert_eq!(h.social.replies().await.len(), 1);
}

#[tokio::test]
async fn test_registered_user_told_so() {
    let h = Harness::new();
    h.register("bob").await;

    let outcome = h
        .engine
        .orchestrator
        .handle_inbox_message(&inbox_message("m-again", "bob", "register"))
        .await
        .unwrap();
    assert_eq!(outcome, InboxOutcome::Replied(IssueOutcome::AlreadyRegistered));
}

#[tokio::test]
async fn test_unrelated_and_unknown_transactions() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;
    let address = h.user("bob").ledger_address.unwrap();

    let mut tx = h.confirmation_tx("bob", "tx-noise", &code);
    tx.message = Some("thanks for the coffee".into());
    assert_eq!(
        h.engine.orchestrator.handle_ledger_transaction(&tx).await.unwrap(),
        RegistrationOutcome::Ignored
    );

    let unknown = LedgerTransaction {
        hash: "tx-guess".into(),
        signer_public_key: EXTERNAL_KEY.into(),
        recipient_address: address,
        message: Some(format!("0000000000000000 {}", BACKUP_KEY)),
        amount_micros: 1,
    };
    assert_eq!(
        h.engine.orchestrator.handle_ledger_transaction(&unknown).await.unwrap(),
        RegistrationOutcome::NoMatch
    );

    // Both were classified terminally, and bob's challenge is untouched
    assert!(h.engine.events.already_processed(&EventKey::tx("tx-noise")).unwrap());
    assert!(h.engine.events.already_processed(&EventKey::tx("tx-guess")).unwrap());
    assert_eq!(h.user("bob").challenge_code, Some(code));
}

#[tokio::test]
async fn test_second_payload_for_same_code_does_not_register_twice() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;

    let first = h.confirmation_tx("bob", "tx-1", &code);
    let second = h.confirmation_tx("bob", "tx-2", &code);

    h.engine.orchestrator.handle_ledger_transaction(&first).await.unwrap();
    let outcome = h.engine.orchestrator.handle_ledger_transaction(&second).await.unwrap();

    assert_eq!(outcome, RegistrationOutcome::NoMatch);
    assert_eq!(h.ledger.multisig_setups().await.len(), 1);
}

#[tokio::test]
async fn test_rejected_setup_fails_then_restarts() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;

    h.ledger.reject_next("FAILURE_MULTISIG_INVALID").await;
    let tx = h.confirmation_tx("bob", "tx-1", &code);
    let outcome = h.engine.orchestrator.handle_ledger_transaction(&tx).await.unwrap();

    assert!(matches!(outcome, RegistrationOutcome::Failed { ref reason, .. } if reason == "FAILURE_MULTISIG_INVALID"));
    assert_eq!(h.user("bob").registration_state, RegistrationState::RegistrationFailed);
    assert!(h.engine.events.already_processed(&EventKey::tx("tx-1")).unwrap());

    let dms = h.social.direct_messages().await;
    assert!(dms
        .iter()
        .any(|m| m.to == "bob" && m.text.contains("Registration error!") && m.text.contains("FAILURE_MULTISIG_INVALID")));

    let fresh = h.request_registration("bob", "m2").await;
    assert_ne!(fresh, code);
    assert_eq!(h.user("bob").registration_state, RegistrationState::ChallengeIssued);
}

#[tokio::test]
async fn test_transient_failure_resumes_on_redelivery() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;
    let tx = h.confirmation_tx("bob", "tx-1", &code);

    h.ledger.set_unavailable(true).await;
    let err = h.engine.orchestrator.handle_ledger_transaction(&tx).await.unwrap_err();
    assert!(err.is_transient());

    let bob = h.user("bob");
    assert_eq!(bob.registration_state, RegistrationState::AwaitingConfirmation);
    assert_eq!(bob.registration_event_id.as_deref(), Some("tx-1"));
    assert!(!h.engine.events.already_processed(&EventKey::tx("tx-1")).unwrap());

    h.ledger.set_unavailable(false).await;
    let outcome = h.engine.orchestrator.handle_ledger_transaction(&tx).await.unwrap();
    assert!(matches!(outcome, RegistrationOutcome::Registered { .. }));
    assert_eq!(h.ledger.multisig_setups().await.len(), 1);
}

#[tokio::test]
async fn test_setup_already_on_chain_is_not_resubmitted() {
    let h = Harness::new();
    h.register("bob").await;
    assert_eq!(h.ledger.multisig_setups().await.len(), 1);

    // The state write was lost after the setup landed
    let bob = h.user("bob");
    let outcome = h
        .engine
        .registry
        .compare_and_update("bob", bob.version, |u| {
            u.registration_state = RegistrationState::AwaitingConfirmation;
            u.registration_event_id = Some("tx-replayed".into());
        })
        .unwrap();
    assert!(matches!(outcome, CasOutcome::Updated(_)));

    let tx = h.confirmation_tx("bob", "tx-replayed", "already-consumed");
    let outcome = h.engine.orchestrator.handle_ledger_transaction(&tx).await.unwrap();

    assert!(matches!(outcome, RegistrationOutcome::Registered { tx_hash: None, .. }));
    assert_eq!(h.ledger.multisig_setups().await.len(), 1);
    assert_eq!(h.user("bob").registration_state, RegistrationState::Registered);
}

#[tokio::test]
async fn test_block_poller_registers_and_advances_cursor() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;
    let poller = h.engine.block_poller();

    let noise = LedgerTransaction {
        hash: "tx-elsewhere".into(),
        signer_public_key: EXTERNAL_KEY.into(),
        recipient_address: "TSOMEONEELSE".into(),
        message: Some(format!("{} {}", code, BACKUP_KEY)),
        amount_micros: 1,
    };
    let first = h.ledger.push_block(vec![noise]).await;
    let second = h
        .ledger
        .push_block(vec![h.confirmation_tx("bob", "tx-1", &code)])
        .await;

    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.handled, 1);
    assert!(second > first);
    assert_eq!(poller.cursor().unwrap(), second);
    assert_eq!(h.user("bob").registration_state, RegistrationState::Registered);

    let idle = poller.poll_once().await.unwrap();
    assert_eq!(idle.fetched, 0);
}

#[tokio::test]
async fn test_block_poller_holds_cursor_on_transient_failure() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;
    let poller = h.engine.block_poller();
    let height = h
        .ledger
        .push_block(vec![h.confirmation_tx("bob", "tx-1", &code)])
        .await;

    h.ledger.reject_next("ignored").await;
    h.social.set_unavailable(true).await;
    // Notifications failing is not a reason to hold the cursor
    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(poller.cursor().unwrap(), height);
    h.social.set_unavailable(false).await;

    let code = h.request_registration("bob", "m2").await;
    let retry_height = h
        .ledger
        .push_block(vec![h.confirmation_tx("bob", "tx-2", &code)])
        .await;

    h.ledger.set_unavailable(true).await;
    assert!(poller.poll_once().await.is_err());
    h.ledger.set_unavailable(false).await;

    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(poller.cursor().unwrap(), retry_height);
    assert_eq!(h.user("bob").registration_state, RegistrationState::Registered);
}

#[tokio::test]
async fn test_startup_reconciliation_catches_missed_confirmations() {
    let h = Harness::new();
    let code = h.request_registration("bob", "m1").await;
    h.ledger
        .push_block(vec![h.confirmation_tx("bob", "tx-offline", &code)])
        .await;

    let report = h.engine.reconcile_pending().await.unwrap();
    assert_eq!(report.addresses, 1);
    assert_eq!(report.registered, 1);
    assert_eq!(h.user("bob").registration_state, RegistrationState::Registered);

    // Nothing pending any more
    let again = h.engine.reconcile_pending().await.unwrap();
    assert_eq!(again.addresses, 0);
}

#[tokio::test]
async fn test_refused_ledger_lookup_fails_registration() {
    let h = Harness::with_ledger(|inner, _| {
        Arc::new(ScriptedLedger::new(inner).refusing_multisig_info()) as Arc<dyn LedgerClient>
    });
    let code = h.request_registration("bob", "m1").await;
    let poller = h.engine.block_poller();
    let height = h
        .ledger
        .push_block(vec![h.confirmation_tx("bob", "tx-1", &code)])
        .await;

    let report = poller.poll_once().await.unwrap();
    assert_eq!(report.handled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(poller.cursor().unwrap(), height);

    let bob = h.user("bob");
    assert_eq!(bob.registration_state, RegistrationState::RegistrationFailed);
    assert_eq!(bob.registration_event_id, None);
    assert!(h.engine.events.already_processed(&EventKey::tx("tx-1")).unwrap());

    let dms = h.social.direct_messages().await;
    assert!(dms
        .iter()
        .any(|m| m.to == "bob" && m.text.contains("Registration error!") && m.text.contains("403")));

    // The user can start over instead of being stuck in progress
    let outcome = h
        .engine
        .orchestrator
        .handle_inbox_message(&inbox_message("m2", "bob", "register"))
        .await
        .unwrap();
    assert!(matches!(outcome, InboxOutcome::Replied(IssueOutcome::Fresh(_))));
}

#[tokio::test]
async fn test_registration_settled_elsewhere_is_not_announced_twice() {
    let h = Harness::with_ledger(|inner, db| {
        let registry = Arc::new(UserRegistry::new(db));
        Arc::new(ScriptedLedger::new(inner).after_setup(move || {
            registry
                .update_with_retry("bob", |u| {
                    u.registration_state = RegistrationState::Registered;
                    u.registration_event_id = None;
                    Ok(Step::Commit(()))
                })
                .unwrap();
        })) as Arc<dyn LedgerClient>
    });
    let code = h.request_registration("bob", "m1").await;

    let tx = h.confirmation_tx("bob", "tx-1", &code);
    let outcome = h.engine.orchestrator.handle_ledger_transaction(&tx).await.unwrap();

    assert!(matches!(outcome, RegistrationOutcome::Registered { tx_hash: Some(_), .. }));
    assert_eq!(h.user("bob").registration_state, RegistrationState::Registered);
    let dms = h.social.direct_messages().await;
    assert!(!dms.iter().any(|m| m.text.contains("Account registered!")));
}

#[tokio::test]
async fn test_refused_provisioning_tells_the_user() {
    let h = Harness::with_ledger(|inner, _| {
        Arc::new(ScriptedLedger::new(inner).refusing_derive_for("bob")) as Arc<dyn LedgerClient>
    });
    let message = inbox_message("m1", "bob", "register");

    let outcome = h.engine.orchestrator.handle_inbox_message(&message).await.unwrap();
    let InboxOutcome::Failed { reason } = outcome else {
        panic!("expected a failed request, got {:?}", outcome);
    };
    assert!(reason.contains("400"));
    assert!(h.engine.events.already_processed(&EventKey::message("m1")).unwrap());

    let replies = h.social.replies().await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].1.contains("could not be started"));

    let again = h.engine.orchestrator.handle_inbox_message(&message).await.unwrap();
    assert_eq!(again, InboxOutcome::Duplicate);
}

#[tokio::test]
async fn test_refused_reply_does_not_retry_forever() {
    let h = Harness::new();
    h.social.set_refused_replies(true).await;

    let outcome = h
        .engine
        .orchestrator
        .handle_inbox_message(&inbox_message("m1", "bob", "register"))
        .await
        .unwrap();

    assert!(matches!(outcome, InboxOutcome::Replied(IssueOutcome::Fresh(_))));
    assert!(h.engine.events.already_processed(&EventKey::message("m1")).unwrap());
    assert!(h.social.replies().await.is_empty());
}
