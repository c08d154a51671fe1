mod common;

use chrono::Duration;
use std::sync::Arc;

use common::*;
use flick::models::{DestroyReason, ExchangeStatus, Gender, LookingFor, NewUser};
use flick::services::{run_cleanup, AcceptOutcome, ProximityVerdict, RequestOutcome};
use flick::utils::Clock;
use flick::{CoreError, Event};

async fn matched_with_phones(h: &Harness) {
    h.user_with("alice", Gender::Female, LookingFor::Male, "555-0100", origin()).await;
    h.user_with("bob", Gender::Male, LookingFor::Female, "555-0200", east_of_origin(40.0)).await;
    h.matched_pair("alice", "bob").await;
}

fn destroyed_reasons(events: &[Event]) -> Vec<DestroyReason> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ExchangeDestroyed { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_worked_example_scenario() {
    let h = harness(settings());
    h.user_with("a", Gender::Female, LookingFor::Male, "555-0100", origin()).await;
    h.user_with("b", Gender::Male, LookingFor::Female, "555-0200", east_of_origin(40.0)).await;
    let mut a_rx = h.listen("a");
    let mut b_rx = h.listen("b");

    assert!(h.core.engine.send_flick("a", "b").await.is_ok());
    assert!(!h.core.ledger.has_mutual("a", "b").await.unwrap());
    h.core.engine.send_flick("b", "a").await.unwrap();
    assert_eq!(count_matched(&drain(&mut a_rx)), 1);
    assert_eq!(count_matched(&drain(&mut b_rx)), 1);

    let outcome = h.core.vault.request("a", "b", "555-0100", "555-0200").await.unwrap();
    let RequestOutcome::Created(exchange) = outcome else {
        panic!("expected a new exchange, got {:?}", outcome);
    };
    assert_eq!(exchange.status, ExchangeStatus::Pending);
    assert_eq!(exchange.requested_by, "a");
    assert_eq!(exchange.expires_at - exchange.created_at, Duration::seconds(900));

    let AcceptOutcome::Accepted(accepted) = h.core.vault.accept(exchange.id, "b").await.unwrap() else {
        panic!("expected accept to succeed");
    };
    assert_eq!(accepted.status, ExchangeStatus::Accepted);
    let a_view = accepted.view_for("a", h.clock.now()).unwrap();
    let b_view = accepted.view_for("b", h.clock.now()).unwrap();
    assert_eq!(a_view.their_phone.as_deref(), Some("555-0200"));
    assert_eq!(b_view.their_phone.as_deref(), Some("555-0100"));

    drain(&mut a_rx);
    drain(&mut b_rx);
    h.clock.advance(Duration::seconds(901));

    assert!(h.core.vault.get_for_pair("a", "b").await.unwrap().is_none());
    assert_eq!(h.core.vault.sweep_expired().await.unwrap().len(), 1);
    assert!(h.store.exchange_rows().await.is_empty());
    assert_eq!(destroyed_reasons(&drain(&mut a_rx)), vec![DestroyReason::TimerExpired]);
    assert_eq!(destroyed_reasons(&drain(&mut b_rx)), vec![DestroyReason::TimerExpired]);
}

#[tokio::test]
async fn test_ttl_boundary_on_reads() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();

    h.clock.advance(Duration::seconds(899));
    assert!(h.core.vault.get_for_pair("alice", "bob").await.unwrap().is_some());
    assert!(h.core.vault.active_for_user("alice").await.unwrap().is_some());

    h.clock.advance(Duration::seconds(1));
    assert!(h.core.vault.get_for_pair("alice", "bob").await.unwrap().is_none());
    assert!(h.core.vault.active_for_user("alice").await.unwrap().is_none());
    assert!(h.core.vault.get(exchange.id).await.unwrap().is_none());
    assert!(matches!(
        h.core.vault.accept(exchange.id, "bob").await.unwrap(),
        AcceptOutcome::NotFound
    ));
}

#[tokio::test]
async fn test_duplicate_request_returns_existing() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let mut bob_rx = h.listen("bob");

    let first = h.core.vault.request_from_profiles("alice", "bob").await.unwrap();
    let second = h.core.vault.request_from_profiles("bob", "alice").await.unwrap();
    assert!(matches!(first, RequestOutcome::Created(_)));
    assert!(matches!(second, RequestOutcome::AlreadyExists(_)));
    assert_eq!(first.exchange().id, second.exchange().id);
    assert_eq!(second.exchange().requested_by, "alice");

    let requested = drain(&mut bob_rx)
        .into_iter()
        .filter(|e| matches!(e, Event::ExchangeRequested { .. }))
        .count();
    assert_eq!(requested, 1);

    // An expired row that nobody swept yet is replaced, and its end announced
    let mut alice_rx = h.listen("alice");
    h.clock.advance(Duration::seconds(900));
    let third = h.core.vault.request_from_profiles("bob", "alice").await.unwrap();
    assert!(matches!(third, RequestOutcome::Created(_)));
    assert_ne!(third.exchange().id, first.exchange().id);
    assert_eq!(h.store.exchange_rows().await.len(), 1);

    let alice_events = drain(&mut alice_rx);
    assert_eq!(destroyed_reasons(&alice_events), vec![DestroyReason::TimerExpired]);
    assert!(alice_events.iter().any(|e| matches!(
        e,
        Event::ExchangeDestroyed { exchange_id, .. } if *exchange_id == first.exchange().id
    )));
    assert_eq!(destroyed_reasons(&drain(&mut bob_rx)), vec![DestroyReason::TimerExpired]);

    // Nothing left for the sweeper to announce a second time
    assert!(h.core.vault.sweep_expired().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_request_requires_match_and_phones() {
    let h = harness(settings());
    h.user_with("alice", Gender::Female, LookingFor::Male, "555-0100", origin()).await;
    h.user("bob", east_of_origin(10.0)).await;

    assert!(matches!(
        h.core.vault.request("alice", "bob", "555-0100", "555-0200").await,
        Err(CoreError::PolicyBlocked(_))
    ));

    h.matched_pair("alice", "bob").await;
    assert!(matches!(
        h.core.vault.request_from_profiles("alice", "bob").await,
        Err(CoreError::Invalid(_))
    ));
    assert!(matches!(
        h.core.vault.request("alice", "bob", "555-0100", "not a phone").await,
        Err(CoreError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_request_copies_phones_at_request_time() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();

    h.core
        .presence
        .upsert_user(&NewUser {
            gender: Some(Gender::Male),
            looking_for: Some(LookingFor::Female),
            phone_number: Some("555-0999".to_string()),
            location: Some(east_of_origin(40.0)),
            ..profile("bob")
        })
        .await
        .unwrap();

    let AcceptOutcome::Accepted(accepted) = h.core.vault.accept(exchange.id, "bob").await.unwrap() else {
        panic!("expected accept to succeed");
    };
    assert_eq!(accepted.user_b_phone, "555-0200");
}

#[tokio::test]
async fn test_phones_hidden_until_accepted() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let mut bob_rx = h.listen("bob");

    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    let view = exchange.view_for("bob", h.clock.now()).unwrap();
    assert_eq!(view.their_phone, None);
    assert_eq!(view.my_phone, "555-0200");

    let json = serde_json::to_string(&drain(&mut bob_rx)).unwrap();
    assert!(!json.contains("555-0100"));
    assert!(!json.contains("555-0200"));
}

#[tokio::test]
async fn test_accept_rules() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    h.user("carol", east_of_origin(5.0)).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();

    assert!(matches!(h.core.vault.accept(exchange.id, "alice").await, Err(CoreError::Invalid(_))));
    assert!(matches!(h.core.vault.accept(exchange.id, "carol").await, Err(CoreError::Invalid(_))));
    assert!(matches!(
        h.core.vault.accept(exchange.id, "bob").await.unwrap(),
        AcceptOutcome::Accepted(_)
    ));
    assert!(matches!(
        h.core.vault.accept(exchange.id, "bob").await.unwrap(),
        AcceptOutcome::AlreadyAccepted(_)
    ));
}

#[tokio::test]
async fn test_decline_then_accept_is_not_found() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let mut alice_rx = h.listen("alice");
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();

    assert!(h.core.vault.decline(exchange.id, "bob").await.unwrap());
    assert!(!h.core.vault.decline(exchange.id, "bob").await.unwrap());
    assert!(matches!(
        h.core.vault.accept(exchange.id, "bob").await.unwrap(),
        AcceptOutcome::NotFound
    ));
    assert_eq!(destroyed_reasons(&drain(&mut alice_rx)), vec![DestroyReason::Declined]);
}

#[tokio::test]
async fn test_close_accepted_exchange() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();

    assert!(h.core.vault.close(exchange.id, "alice").await.unwrap());
    assert!(h.core.vault.active_for_user("bob").await.unwrap().is_none());
}

#[tokio::test]
async fn test_decline_accepted_exchange() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let mut alice_rx = h.listen("alice");
    let mut bob_rx = h.listen("bob");
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    assert!(h.core.vault.decline(exchange.id, "alice").await.unwrap());
    assert!(h.store.exchange_rows().await.is_empty());
    assert!(h.core.vault.active_for_user("bob").await.unwrap().is_none());
    assert_eq!(destroyed_reasons(&drain(&mut alice_rx)), vec![DestroyReason::Declined]);
    assert_eq!(destroyed_reasons(&drain(&mut bob_rx)), vec![DestroyReason::Declined]);

    assert!(!h.core.vault.decline(exchange.id, "bob").await.unwrap());
}

#[tokio::test]
async fn test_proximity_breach_destroys() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let mut pair_rx = h.listen_pair("alice", "bob");
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();

    assert_eq!(
        h.core.vault.check_proximity(exchange.id).await.unwrap(),
        ProximityVerdict::NotOpen
    );
    h.core.vault.accept(exchange.id, "bob").await.unwrap();
    assert!(matches!(
        h.core.vault.check_proximity(exchange.id).await.unwrap(),
        ProximityVerdict::Within { .. }
    ));

    h.core.presence.heartbeat("bob", Some(east_of_origin(150.0))).await.unwrap();
    assert!(matches!(
        h.core.vault.check_proximity(exchange.id).await.unwrap(),
        ProximityVerdict::Broken { .. }
    ));
    assert_eq!(
        h.core.vault.check_proximity(exchange.id).await.unwrap(),
        ProximityVerdict::Gone
    );
    assert!(h.store.exchange_rows().await.is_empty());
    assert_eq!(destroyed_reasons(&drain(&mut pair_rx)), vec![DestroyReason::ProximityBroken]);
}

#[tokio::test]
async fn test_proximity_unknown_location_keeps_exchange() {
    let h = harness(settings());
    h.user_with("alice", Gender::Female, LookingFor::Male, "555-0100", origin()).await;
    h.core
        .presence
        .upsert_user(&NewUser {
            phone_number: Some("555-0200".to_string()),
            location: None,
            ..profile("bob")
        })
        .await
        .unwrap();
    h.matched_pair("alice", "bob").await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();

    assert_eq!(
        h.core.vault.check_proximity(exchange.id).await.unwrap(),
        ProximityVerdict::Unknown
    );
    assert!(h.core.vault.get(exchange.id).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_destroy_succeeds_once() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();
    h.clock.advance(Duration::seconds(900));
    let mut pair_rx = h.listen_pair("alice", "bob");

    let (v1, v2, v3) = (
        Arc::clone(&h.core.vault),
        Arc::clone(&h.core.vault),
        Arc::clone(&h.core.vault),
    );
    let id = exchange.id;
    let timer = tokio::spawn(async move { v1.destroy_if_expired(id).await });
    let proximity = tokio::spawn(async move { v2.destroy(id, DestroyReason::ProximityBroken).await });
    let sweep = tokio::spawn(async move { v3.sweep_expired().await.map(|swept| !swept.is_empty()) });

    let results = [
        timer.await.unwrap().unwrap(),
        proximity.await.unwrap().unwrap(),
        sweep.await.unwrap().unwrap(),
    ];
    assert_eq!(results.iter().filter(|won| **won).count(), 1, "results: {:?}", results);
    assert_eq!(destroyed_reasons(&drain(&mut pair_rx)).len(), 1);
}

#[tokio::test]
async fn test_concurrent_cleanup_runs() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    h.user_with("carol", Gender::Female, LookingFor::Male, "555-0300", origin()).await;
    h.matched_pair("carol", "bob").await;
    h.core.vault.request_from_profiles("alice", "bob").await.unwrap();
    h.core.vault.request_from_profiles("carol", "bob").await.unwrap();
    h.clock.advance(Duration::seconds(1_000));

    let (first, second) = tokio::join!(run_cleanup(&h.core.vault), run_cleanup(&h.core.vault));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.deleted_exchanges + second.deleted_exchanges, 2);
    assert!(first.success && second.success);

    let again = run_cleanup(&h.core.vault).await.unwrap();
    assert_eq!(again.deleted_exchanges, 0);
}

#[tokio::test]
async fn test_timer_task_deletes_at_expiry() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();

    h.clock.advance(Duration::seconds(900));
    h.core.vault.spawn_timer(&exchange).await.unwrap();
    assert!(h.store.exchange_rows().await.is_empty());
}

#[tokio::test]
async fn test_proximity_loop_stops_after_breach() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();
    h.core.presence.heartbeat("alice", Some(flick::geo::offset(&origin(), 200.0, 270.0))).await.unwrap();

    h.core.vault.spawn_proximity_loop(exchange.id).await.unwrap();
    assert!(h.store.exchange_rows().await.is_empty());
}

#[tokio::test]
async fn test_destroy_retries_transient_failures() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();

    h.store.fail_next(2);
    assert!(h.core.vault.destroy(exchange.id, DestroyReason::Closed).await.unwrap());

    let second = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.store.fail_next(10);
    assert!(matches!(
        h.core.vault.destroy(second.id, DestroyReason::Closed).await,
        Err(CoreError::Transient(_))
    ));
}

#[tokio::test]
async fn test_request_and_accept_ride_out_transient_failures() {
    let h = harness(settings());
    matched_with_phones(&h).await;

    h.store.fail_next(2);
    let outcome = h.core.vault.request("alice", "bob", "555-0100", "555-0200").await.unwrap();
    assert!(matches!(outcome, RequestOutcome::Created(_)));

    h.store.fail_next(1);
    assert!(matches!(
        h.core.vault.accept(outcome.exchange().id, "bob").await.unwrap(),
        AcceptOutcome::Accepted(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_proximity_check_gives_up_on_hung_store() {
    let h = harness(settings());
    matched_with_phones(&h).await;
    let exchange = h.core.vault.request_from_profiles("alice", "bob").await.unwrap().exchange().clone();
    h.core.vault.accept(exchange.id, "bob").await.unwrap();

    h.store.stall_after(0);
    assert!(matches!(
        h.core.vault.check_proximity(exchange.id).await,
        Err(CoreError::Transient(_))
    ));
}
