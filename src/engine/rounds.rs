//! Round state machine.
//!
//! Owns the current round and the bounded history, and decides once per
//! tick which transition is due:
//!
//! 1. no current round → fetch a start price and `create_round`
//! 2. `OPEN` past `close_ts` → `close_round`
//! 3. `OPEN`/`CLOSED` past `end_ts` → fetch an end price and `resolve_round`,
//!    or `void_round` when the feed is exhausted
//!
//! A transition is submitted first; local state only changes once the
//! executor has accepted it, and every committed change is published.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::executor::TransitionExecutor;
use crate::feed::{fetch_price_with_retry, PriceFeed, RetryPolicy};
use crate::storage::StatePublisher;
use crate::types::{OracleError, Outcome, PendingVoid, Round, StateSnapshot, HISTORY_LIMIT};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Timing and retry knobs of the round lifecycle.
#[derive(Debug, Clone)]
pub struct RoundSettings {
    pub round_length_sec: u64,
    pub close_buffer_sec: u64,
    pub retry: RetryPolicy,
    /// Pause after a round is finished, before the slot is cleared.
    pub next_round_delay: Duration,
    /// Failed `void_round` submissions tolerated for one round.
    pub max_void_attempts: u32,
    /// Label written to the snapshot's `source` field.
    pub source: String,
}

impl RoundSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            round_length_sec: cfg.round_length_sec,
            close_buffer_sec: cfg.close_buffer_sec,
            retry: cfg.retry_policy(),
            next_round_delay: cfg.next_round_delay(),
            max_void_attempts: cfg.max_void_attempts,
            source: cfg.source.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tick outcome
// ---------------------------------------------------------------------------

/// What a single tick did. When a round is closed and settled in the same
/// tick, the settlement is reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Nothing was due.
    Idle,
    /// No round and the feed gave no start price.
    CreateSkipped,
    /// No round, but the clock has not moved past the last round id yet.
    Deferred,
    Created(u64),
    Closed(u64),
    Resolved(u64, Outcome),
    Voided(u64),
    /// A recoverable error ended the tick early (set by the scheduler).
    Aborted,
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct RoundMachine {
    settings: RoundSettings,
    feed: Arc<dyn PriceFeed>,
    executor: Arc<dyn TransitionExecutor>,
    publisher: Arc<dyn StatePublisher>,
    clock: Arc<dyn Clock>,
    current: Option<Round>,
    /// Newest first, at most `HISTORY_LIMIT` entries.
    history: VecDeque<Round>,
    pending_void: Option<PendingVoid>,
    /// The last publish still shows a finished round as current.
    cleared_slot_unpublished: bool,
}

impl RoundMachine {
    pub fn new(
        settings: RoundSettings,
        feed: Arc<dyn PriceFeed>,
        executor: Arc<dyn TransitionExecutor>,
        publisher: Arc<dyn StatePublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            feed,
            executor,
            publisher,
            clock,
            current: None,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            pending_void: None,
            cleared_slot_unpublished: false,
        }
    }

    pub fn current(&self) -> Option<&Round> {
        self.current.as_ref()
    }

    pub fn history(&self) -> &VecDeque<Round> {
        &self.history
    }

    pub fn is_void_pending(&self) -> bool {
        self.pending_void.is_some()
    }

    /// Adopt the rounds of a previously published snapshot.
    ///
    /// A finished round left in `currentRound` (published during the
    /// post-round pause) is already in history and is not resumed. A
    /// void-pending marker is kept only if it names the resumed round, so a
    /// round that already failed to settle is voided rather than resolved
    /// at a late price.
    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.cleared_slot_unpublished = snapshot
            .current_round
            .as_ref()
            .is_some_and(|r| r.status.is_terminal());
        self.current = snapshot.current_round.filter(|r| !r.status.is_terminal());
        self.history = snapshot.history.into_iter().take(HISTORY_LIMIT).collect();
        self.pending_void = snapshot
            .pending_void
            .filter(|p| self.current.as_ref().is_some_and(|r| r.id == p.round_id));

        info!(
            current_round = ?self.current.as_ref().map(|r| r.id),
            status = ?self.current.as_ref().map(|r| r.status),
            history = self.history.len(),
            void_pending = self.pending_void.is_some(),
            "Resumed round state"
        );
    }

    /// Snapshot of the observable state.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            source: self.settings.source.clone(),
            last_updated: self.clock.now_millis(),
            current_round: self.current.clone(),
            history: self.history.iter().take(HISTORY_LIMIT).cloned().collect(),
            pending_void: self.pending_void,
        }
    }

    pub fn publish(&mut self) -> Result<(), OracleError> {
        self.publisher.persist(&self.snapshot())?;
        self.cleared_slot_unpublished = self
            .current
            .as_ref()
            .is_some_and(|r| r.status.is_terminal());
        Ok(())
    }

    /// Evaluate the lifecycle rules once against the current time.
    pub async fn tick(&mut self) -> Result<TickOutcome, OracleError> {
        let now = self.clock.now_secs();

        let Some(round) = self.current.clone() else {
            return self.create(now).await;
        };

        let mut outcome = TickOutcome::Idle;

        if round.should_close(now) {
            self.close(&round).await?;
            outcome = TickOutcome::Closed(round.id);
        }

        if let Some(round) = self.current.clone().filter(|r| r.should_settle(now)) {
            outcome = self.settle(round).await?;
        }

        Ok(outcome)
    }

    // -- Rules -----------------------------------------------------------

    async fn create(&mut self, now: u64) -> Result<TickOutcome, OracleError> {
        if !self.is_fresh_id(now) {
            debug!(now, "Clock has not passed the last round id, deferring creation");
            return self.skip_creation(TickOutcome::Deferred);
        }

        let start_price = match fetch_price_with_retry(&*self.feed, &self.settings.retry).await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "No start price, round creation skipped this tick");
                return self.skip_creation(TickOutcome::CreateSkipped);
            }
        };

        // Retries may have taken a while; the round starts now.
        let now = self.clock.now_secs();
        if !self.is_fresh_id(now) {
            return self.skip_creation(TickOutcome::Deferred);
        }

        let round = Round::open(
            now,
            start_price,
            self.settings.round_length_sec,
            self.settings.close_buffer_sec,
        );
        self.executor.create_round(&round).await?;

        info!(
            round_id = round.id,
            start_price = round.start_price,
            close_ts = round.close_ts,
            end_ts = round.end_ts,
            "Round opened"
        );
        let id = round.id;
        self.current = Some(round);
        self.publish()?;
        Ok(TickOutcome::Created(id))
    }

    async fn close(&mut self, round: &Round) -> Result<(), OracleError> {
        self.executor.close_round(round.id).await?;

        info!(round_id = round.id, "Round closed");
        self.advance(round.closed());
        self.publish()
    }

    async fn settle(&mut self, round: Round) -> Result<TickOutcome, OracleError> {
        let void_pending = matches!(self.pending_void, Some(p) if p.round_id == round.id);
        if !void_pending {
            match fetch_price_with_retry(&*self.feed, &self.settings.retry).await {
                Ok(end_price) => return self.resolve(round, end_price).await,
                Err(e) => {
                    warn!(round_id = round.id, error = %e, "No end price, voiding round");
                    self.pending_void = Some(PendingVoid {
                        round_id: round.id,
                        failures: 0,
                    });
                }
            }
        }
        self.void(round).await
    }

    async fn resolve(&mut self, round: Round, end_price: f64) -> Result<TickOutcome, OracleError> {
        let resolved = round.resolved(end_price);
        self.executor.resolve_round(round.id, end_price).await?;

        let outcome = resolved.outcome.unwrap_or(Outcome::No);
        info!(
            round_id = round.id,
            start_price = round.start_price,
            end_price,
            outcome = %outcome,
            "Round resolved"
        );
        self.finish(resolved).await?;
        Ok(TickOutcome::Resolved(round.id, outcome))
    }

    async fn void(&mut self, round: Round) -> Result<TickOutcome, OracleError> {
        match self.executor.void_round(round.id).await {
            Ok(()) => {
                self.pending_void = None;
                info!(round_id = round.id, "Round voided");
                self.finish(round.voided()).await?;
                Ok(TickOutcome::Voided(round.id))
            }
            Err(e) if e.is_recoverable() => {
                let pending = self.pending_void.get_or_insert(PendingVoid {
                    round_id: round.id,
                    failures: 0,
                });
                pending.failures += 1;
                let failures = pending.failures;
                self.publish()?;

                if failures >= self.settings.max_void_attempts {
                    return Err(OracleError::VoidBudgetExhausted {
                        round_id: round.id,
                        attempts: failures,
                    });
                }
                warn!(
                    round_id = round.id,
                    failures,
                    budget = self.settings.max_void_attempts,
                    "void_round rejected, will retry next tick"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // -- Helpers ---------------------------------------------------------

    /// No round was created this tick. If the file still shows the previous
    /// round as current, publish the empty slot once.
    fn skip_creation(&mut self, outcome: TickOutcome) -> Result<TickOutcome, OracleError> {
        if self.cleared_slot_unpublished {
            self.publish()?;
        }
        Ok(outcome)
    }

    /// Commit a terminal round: record it, publish, pause, free the slot.
    async fn finish(&mut self, finished: Round) -> Result<(), OracleError> {
        self.advance(finished.clone());
        self.history.push_front(finished);
        self.history.truncate(HISTORY_LIMIT);
        self.publish()?;

        tokio::time::sleep(self.settings.next_round_delay).await;
        self.current = None;
        Ok(())
    }

    fn advance(&mut self, next: Round) {
        if let Some(prev) = &self.current {
            debug_assert!(
                prev.status.can_transition_to(next.status),
                "illegal round transition {} -> {}",
                prev.status,
                next.status
            );
        }
        self.current = Some(next);
    }

    /// Round ids are creation timestamps and must keep increasing.
    fn is_fresh_id(&self, now: u64) -> bool {
        self.history.front().map_or(true, |last| now > last.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
