//! Round lifecycle scenarios driven tick by tick with a manual clock.

use std::collections::HashMap;
use std::time::Duration;

use flash_oracle::engine::rounds::TickOutcome;
use flash_oracle::executor::Transition;
use flash_oracle::storage::{load_snapshot, JsonFilePublisher, StatePublisher};
use flash_oracle::types::{Outcome, RoundStatus, HISTORY_LIMIT};

use crate::fakes::{scenario_settings, Harness};

#[tokio::test]
async fn resolves_yes_when_price_rises() {
    let mut h = Harness::new(1000, 50_000.0);

    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Created(1000));
    let round = h.machine.current().unwrap().clone();
    assert_eq!((round.start_ts, round.close_ts, round.end_ts), (1000, 1027, 1030));
    assert_eq!(round.start_price, 50_000.0);
    assert_eq!(round.status, RoundStatus::Open);

    h.clock.set(1027);
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Closed(1000));
    assert_eq!(h.machine.current().unwrap().status, RoundStatus::Closed);

    h.clock.set(1030);
    h.feed.push_price(51_000.0);
    assert_eq!(
        h.machine.tick().await.unwrap(),
        TickOutcome::Resolved(1000, Outcome::Yes)
    );

    assert!(h.machine.current().is_none());
    let finished = &h.machine.history()[0];
    assert_eq!(finished.id, 1000);
    assert_eq!(finished.status, RoundStatus::Resolved);
    assert_eq!(finished.end_price, Some(51_000.0));
    assert_eq!(finished.outcome, Some(Outcome::Yes));

    // The published snapshot still shows the finished round as current;
    // the slot is freed after the inter-round pause.
    let published = h.publisher.last().unwrap();
    assert_eq!(published.current_round.as_ref().unwrap().status, RoundStatus::Resolved);
    assert_eq!(published.history[0].id, 1000);

    assert_eq!(
        h.executor.accepted(),
        vec![
            Transition::CreateRound {
                id: 1000,
                start_ts: 1000,
                end_ts: 1030,
                close_ts: 1027,
                start_price_fixed: 5_000_000_000_000,
            },
            Transition::CloseRound { id: 1000 },
            Transition::ResolveRound {
                id: 1000,
                end_price_fixed: 5_100_000_000_000,
            },
        ]
    );
}

#[tokio::test]
async fn equal_price_resolves_no() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1030);

    assert_eq!(
        h.machine.tick().await.unwrap(),
        TickOutcome::Resolved(1000, Outcome::No)
    );
    assert_eq!(h.machine.history()[0].outcome, Some(Outcome::No));
}

#[tokio::test]
async fn voids_when_feed_exhausted_at_resolution() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1027);
    h.machine.tick().await.unwrap();

    h.clock.set(1030);
    h.feed.push_failures(3);
    let calls_before = h.feed.calls();
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Voided(1000));
    assert_eq!(h.feed.calls() - calls_before, 3);

    assert!(h.machine.current().is_none());
    let voided = &h.machine.history()[0];
    assert_eq!(voided.status, RoundStatus::Void);
    assert!(voided.end_price.is_none());
    assert!(voided.outcome.is_none());
    assert_eq!(h.executor.accepted_names().last(), Some(&"void_round"));

    // The next tick starts a fresh round.
    h.clock.set(1031);
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Created(1031));
}

#[tokio::test]
async fn unsubmittable_end_price_voids_round() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1027);
    h.machine.tick().await.unwrap();

    h.clock.set(1030);
    h.feed.set_fallback(Some(-1.0));
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Voided(1000));
    assert_eq!(h.machine.history()[0].status, RoundStatus::Void);
    assert_eq!(h.executor.accepted_names().last(), Some(&"void_round"));
}

#[tokio::test]
async fn unsubmittable_start_price_skips_creation() {
    let mut h = Harness::new(1000, 5e11);

    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::CreateSkipped);
    assert!(h.executor.accepted().is_empty());

    h.feed.set_fallback(Some(50_000.0));
    h.clock.advance(1);
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Created(1001));
}

#[tokio::test]
async fn feed_recovering_within_retry_budget_resolves() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1030);
    h.feed.push_failures(2);
    h.feed.push_price(49_000.0);

    assert_eq!(
        h.machine.tick().await.unwrap(),
        TickOutcome::Resolved(1000, Outcome::No)
    );
}

#[tokio::test]
async fn start_feed_outage_creates_nothing_until_recovery() {
    let mut h = Harness::new(1000, 50_000.0);
    h.feed.set_fallback(None);

    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::CreateSkipped);
    assert_eq!(h.feed.calls(), 3);
    assert_eq!(h.publisher.count(), 0);
    assert!(h.executor.accepted().is_empty());

    h.feed.set_fallback(Some(50_500.0));
    h.clock.advance(1);
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Created(1001));
}

#[tokio::test]
async fn finished_round_leaves_current_slot_during_start_outage() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1030);
    h.machine.tick().await.unwrap();
    assert_eq!(
        h.publisher.last().unwrap().current_round.unwrap().status,
        RoundStatus::Resolved
    );

    h.feed.set_fallback(None);
    h.clock.set(1031);
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::CreateSkipped);
    let published = h.publisher.last().unwrap();
    assert!(published.current_round.is_none());
    assert_eq!(published.history[0].id, 1000);
}

#[tokio::test]
async fn resolve_submission_failure_keeps_round_closed() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1027);
    h.machine.tick().await.unwrap();

    h.clock.set(1030);
    h.executor.fail_next("resolve_round", 1);
    let published = h.publisher.count();
    assert!(h.machine.tick().await.unwrap_err().is_recoverable());
    assert_eq!(h.machine.current().unwrap().status, RoundStatus::Closed);
    assert!(h.machine.history().is_empty());
    assert_eq!(h.publisher.count(), published);

    h.clock.set(1031);
    h.feed.push_price(52_000.0);
    assert_eq!(
        h.machine.tick().await.unwrap(),
        TickOutcome::Resolved(1000, Outcome::Yes)
    );
}

#[tokio::test]
async fn persists_exactly_once_per_mutating_tick() {
    let mut h = Harness::new(1000, 50_000.0);

    h.machine.tick().await.unwrap();
    assert_eq!(h.publisher.count(), 1);

    h.clock.set(1010);
    h.machine.tick().await.unwrap();
    assert_eq!(h.publisher.count(), 1, "idle tick must not publish");

    h.clock.set(1027);
    h.machine.tick().await.unwrap();
    assert_eq!(h.publisher.count(), 2);

    h.clock.set(1030);
    h.machine.tick().await.unwrap();
    assert_eq!(h.publisher.count(), 3);

    let last = h.publisher.last().unwrap();
    assert_eq!(last.history.len(), 1);
    assert_eq!(last.last_updated, 1_030_000);
}

#[tokio::test]
async fn history_is_bounded_and_newest_first() {
    let mut h = Harness::new(10_000, 50_000.0);

    for i in 0..(HISTORY_LIMIT as u64 + 5) {
        let start = 10_000 + i * 31;
        h.clock.set(start);
        assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Created(start));
        h.clock.set(start + 30);
        h.machine.tick().await.unwrap();
    }

    let history = h.machine.history();
    assert_eq!(history.len(), HISTORY_LIMIT);
    assert!(history.iter().zip(history.iter().skip(1)).all(|(a, b)| a.id > b.id));
    assert_eq!(history[0].id, 10_000 + (HISTORY_LIMIT as u64 + 4) * 31);

    let published = h.publisher.last().unwrap();
    assert_eq!(published.history.len(), HISTORY_LIMIT);
}

#[tokio::test]
async fn statuses_only_move_forward() {
    let mut h = Harness::new(1000, 50_000.0);

    // Mix of resolved and voided rounds, with executor hiccups in between.
    for i in 0..6u64 {
        let start = 1000 + i * 40;
        h.clock.set(start);
        h.machine.tick().await.unwrap();
        if i % 2 == 0 {
            h.executor.fail_next("close_round", 1);
        }
        h.clock.set(start + 27);
        let _ = h.machine.tick().await;
        if i % 3 == 0 {
            h.feed.push_failures(3);
        }
        h.clock.set(start + 30);
        h.machine.tick().await.unwrap();
    }

    let rank = |s: RoundStatus| match s {
        RoundStatus::Open => 0,
        RoundStatus::Closed => 1,
        RoundStatus::Resolved | RoundStatus::Void => 2,
    };

    let mut seen: HashMap<u64, RoundStatus> = HashMap::new();
    for snapshot in h.publisher.all() {
        if let Some(round) = snapshot.current_round {
            if let Some(prev) = seen.insert(round.id, round.status) {
                assert!(
                    rank(prev) <= rank(round.status),
                    "round {} went {prev} -> {}",
                    round.id,
                    round.status
                );
            }
        }
    }
    assert_eq!(seen.len(), 6);
    assert_eq!(h.machine.history().len(), 6);
}

#[tokio::test]
async fn void_submission_failure_is_retried_then_budgeted() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1027);
    h.machine.tick().await.unwrap();

    h.clock.set(1030);
    h.feed.set_fallback(None);
    h.executor.fail_next("void_round", 3);

    assert!(h.machine.tick().await.unwrap_err().is_recoverable());
    assert!(h.machine.is_void_pending());
    let fetches = h.feed.calls();

    assert!(h.machine.tick().await.unwrap_err().is_recoverable());
    assert_eq!(h.feed.calls(), fetches, "pending void must not refetch");

    let fatal = h.machine.tick().await.unwrap_err();
    assert!(!fatal.is_recoverable());
    assert_eq!(h.machine.current().unwrap().status, RoundStatus::Closed);
}

#[tokio::test]
async fn void_retry_succeeds_within_budget() {
    let mut h = Harness::new(1000, 50_000.0);
    h.machine.tick().await.unwrap();
    h.clock.set(1030);
    h.feed.set_fallback(None);
    h.executor.fail_next("void_round", 1);

    assert!(h.machine.tick().await.is_err());
    assert_eq!(h.machine.tick().await.unwrap(), TickOutcome::Voided(1000));
    assert_eq!(h.machine.history()[0].status, RoundStatus::Void);
    assert!(!h.machine.is_void_pending());
}

#[tokio::test(start_paused = true)]
async fn slot_clears_only_after_next_round_delay() {
    let settings = flash_oracle::engine::rounds::RoundSettings {
        next_round_delay: Duration::from_secs(5),
        ..scenario_settings()
    };
    let mut h = Harness::with_settings(1000, 50_000.0, settings);
    h.machine.tick().await.unwrap();
    h.clock.set(1030);

    let started = tokio::time::Instant::now();
    h.machine.tick().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert!(h.machine.current().is_none());
}

#[tokio::test]
async fn resumes_open_round_from_state_file() {
    let path = std::env::temp_dir()
        .join(format!("flash_oracle_it_{}", uuid::Uuid::new_v4()))
        .join("state.json");

    let mut first = Harness::new(1000, 50_000.0);
    first.machine.tick().await.unwrap();
    JsonFilePublisher::new(&path)
        .persist(&first.machine.snapshot())
        .unwrap();

    let mut second = Harness::new(1027, 50_000.0);
    second.machine.restore(load_snapshot(&path).unwrap().unwrap());
    assert_eq!(second.machine.current().unwrap().id, 1000);

    assert_eq!(second.machine.tick().await.unwrap(), TickOutcome::Closed(1000));
    assert_eq!(second.executor.accepted_names(), vec!["close_round"]);

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}
