//! User registry, event ledger and challenge integration tests

use std::sync::Arc;

use tiprelay::db::{users, Database};
use tiprelay::services::{ChallengeProtocol, EventLedger, UserRegistry};
use tiprelay::types::{EventKey, RegistrationState, TipRelayError};

fn store() -> (Arc<Database>, Arc<UserRegistry>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = Arc::new(UserRegistry::new(Arc::clone(&db)));
    (db, registry)
}

#[test]
fn test_concurrent_get_or_create_yields_one_row() {
    let (db, registry) = store();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.get_or_create("newcomer").unwrap())
        })
        .collect();
    let rows: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(rows.windows(2).all(|w| w[0] == w[1]));
    let count = db
        .with_conn(|conn| users::count_identity(conn, "newcomer"))
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_concurrent_get_or_create_across_tasks() {
    let (db, registry) = store();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..32 {
        let registry = Arc::clone(&registry);
        tasks.spawn(async move { registry.get_or_create("racer").map(|u| u.version) });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap(), 0);
    }

    assert_eq!(db.stats().unwrap().users, 1);
}

#[test]
fn test_consumed_code_cannot_be_reused() {
    let (_, registry) = store();
    let protocol = ChallengeProtocol::new(Arc::clone(&registry));

    let code = protocol
        .issue_challenge("bob")
        .unwrap()
        .code()
        .unwrap()
        .to_string();
    assert_eq!(code.len(), 16);

    protocol.verify_and_consume(&code, "tx-1").unwrap();
    let second = protocol.verify_and_consume(&code, "tx-2");
    assert!(matches!(second, Err(TipRelayError::NotFound(_))));

    let bob = registry.get("bob").unwrap().unwrap();
    assert_eq!(bob.registration_state, RegistrationState::AwaitingConfirmation);
    assert_eq!(bob.registration_event_id.as_deref(), Some("tx-1"));
}

#[test]
fn test_racing_consumers_only_one_wins() {
    let (_, registry) = store();
    let protocol = Arc::new(ChallengeProtocol::new(Arc::clone(&registry)));
    let code = protocol
        .issue_challenge("bob")
        .unwrap()
        .code()
        .unwrap()
        .to_string();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let protocol = Arc::clone(&protocol);
            let code = code.clone();
            std::thread::spawn(move || protocol.verify_and_consume(&code, &format!("tx-{}", i)))
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();

    assert_eq!(winners, 1);
}

#[test]
fn test_mark_processed_is_idempotent() {
    let (db, _) = store();
    let ledger = EventLedger::new(db);
    let key = EventKey::post("t1_abc");

    ledger.mark_processed(&key).unwrap();
    ledger.mark_processed(&key).unwrap();

    assert!(ledger.already_processed(&key).unwrap());
    assert!(ledger.begin(&key).unwrap().is_none());
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiprelay.db");

    let code = {
        let db = Arc::new(Database::open(&path).unwrap());
        let registry = Arc::new(UserRegistry::new(Arc::clone(&db)));
        let protocol = ChallengeProtocol::new(registry);
        EventLedger::new(db)
            .mark_processed(&EventKey::message("m1"))
            .unwrap();
        protocol
            .issue_challenge("carol")
            .unwrap()
            .code()
            .unwrap()
            .to_string()
    };

    let db = Arc::new(Database::open(&path).unwrap());
    let registry = Arc::new(UserRegistry::new(Arc::clone(&db)));
    assert!(EventLedger::new(Arc::clone(&db))
        .already_processed(&EventKey::message("m1"))
        .unwrap());

    let protocol = ChallengeProtocol::new(registry);
    let carol = protocol.verify_and_consume(&code, "tx-carol").unwrap();
    assert_eq!(carol.identity, "carol");
}
