//! Shared types for the flash oracle.
//!
//! These types form the data model used across all modules. The serde
//! layout of [`Round`] and [`StateSnapshot`] is the wire format of the
//! published state file, so field names and casing are load-bearing.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale applied to USD prices at the transition boundary (1e8).
pub const PRICE_SCALE: u64 = 100_000_000;

/// Number of finished rounds retained in history.
pub const HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Round status / outcome
// ---------------------------------------------------------------------------

/// Lifecycle status of a round. Only moves forward:
/// `Open → Closed → {Resolved, Void}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoundStatus {
    Open,
    Closed,
    Resolved,
    Void,
}

impl RoundStatus {
    /// Resolved and void rounds are finished and belong in history.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundStatus::Resolved | RoundStatus::Void)
    }

    /// Whether `next` is a legal forward step from `self`.
    pub fn can_transition_to(self, next: RoundStatus) -> bool {
        matches!(
            (self, next),
            (RoundStatus::Open, RoundStatus::Closed)
                | (RoundStatus::Open, RoundStatus::Resolved)
                | (RoundStatus::Open, RoundStatus::Void)
                | (RoundStatus::Closed, RoundStatus::Resolved)
                | (RoundStatus::Closed, RoundStatus::Void)
        )
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Open => write!(f, "OPEN"),
            RoundStatus::Closed => write!(f, "CLOSED"),
            RoundStatus::Resolved => write!(f, "RESOLVED"),
            RoundStatus::Void => write!(f, "VOID"),
        }
    }
}

/// Resolution outcome of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// YES only on a strict increase; an unchanged price resolves NO.
    pub fn from_prices(start_price: f64, end_price: f64) -> Self {
        if end_price > start_price {
            Outcome::Yes
        } else {
            Outcome::No
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// One timed betting cycle.
///
/// Timestamps are integer epoch seconds. Prices are USD floats; they are
/// only converted to fixed point when a transition is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: u64,
    pub start_ts: u64,
    pub close_ts: u64,
    pub end_ts: u64,
    pub start_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_price: Option<f64>,
    /// Pool aggregates are maintained on-chain; the oracle only carries them.
    #[serde(default)]
    pub yes_total: f64,
    #[serde(default)]
    pub no_total: f64,
    #[serde(default)]
    pub sentiment_bps: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub status: RoundStatus,
}

impl Round {
    /// Build a fresh `OPEN` round starting at `now`.
    ///
    /// The id is the creation timestamp, so ids increase as long as no two
    /// rounds are created within the same second.
    pub fn open(now: u64, start_price: f64, round_length_sec: u64, close_buffer_sec: u64) -> Self {
        Self {
            id: now,
            start_ts: now,
            close_ts: now.saturating_add(round_length_sec.saturating_sub(close_buffer_sec)),
            end_ts: now.saturating_add(round_length_sec),
            start_price,
            end_price: None,
            yes_total: 0.0,
            no_total: 0.0,
            sentiment_bps: 0,
            outcome: None,
            status: RoundStatus::Open,
        }
    }

    /// Betting window is over but the round has not been closed yet.
    pub fn should_close(&self, now: u64) -> bool {
        self.status == RoundStatus::Open && now >= self.close_ts
    }

    /// Round has reached its end and still needs a resolution.
    pub fn should_settle(&self, now: u64) -> bool {
        matches!(self.status, RoundStatus::Open | RoundStatus::Closed) && now >= self.end_ts
    }

    /// Copy of this round in the `CLOSED` state.
    pub fn closed(&self) -> Self {
        Self {
            status: RoundStatus::Closed,
            ..self.clone()
        }
    }

    /// Copy of this round resolved at `end_price`.
    pub fn resolved(&self, end_price: f64) -> Self {
        Self {
            status: RoundStatus::Resolved,
            end_price: Some(end_price),
            outcome: Some(Outcome::from_prices(self.start_price, end_price)),
            ..self.clone()
        }
    }

    /// Copy of this round voided. Void rounds carry no end price or outcome.
    pub fn voided(&self) -> Self {
        Self {
            status: RoundStatus::Void,
            end_price: None,
            outcome: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round #{} [{}] start=${:.2} close@{} end@{}",
            self.id, self.status, self.start_price, self.close_ts, self.end_ts,
        )?;
        if let (Some(p), Some(o)) = (self.end_price, self.outcome) {
            write!(f, " final=${p:.2} -> {o}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Published state
// ---------------------------------------------------------------------------

/// The document published to the state file after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default = "unknown_source")]
    pub source: String,
    /// Epoch milliseconds.
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub current_round: Option<Round>,
    /// Newest first.
    #[serde(default)]
    pub history: Vec<Round>,
    /// Set while the current round is waiting on a `void_round` that has
    /// not been accepted yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_void: Option<PendingVoid>,
}

/// A round whose end price could not be fetched and whose `void_round`
/// has not gone through yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVoid {
    pub round_id: u64,
    /// Rejected `void_round` submissions so far.
    pub failures: u32,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

// ---------------------------------------------------------------------------
// Fixed-point conversion
// ---------------------------------------------------------------------------

/// Encode a USD price as an integer scaled by 1e8, rounding half away from zero.
pub fn to_fixed_point(price: f64) -> Result<u64, OracleError> {
    let invalid = || OracleError::Feed(format!("price {price} cannot be encoded as u64 fixed point"));

    let value = Decimal::from_f64(price).ok_or_else(invalid)?;
    value
        .checked_mul(Decimal::from(PRICE_SCALE))
        .ok_or_else(invalid)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or_else(invalid)
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the oracle loop.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Price source unreachable or payload malformed.
    #[error("Feed error: {0}")]
    Feed(String),

    /// External transition submission failed or the tool is missing.
    #[error("Execution error ({transition}): {message}")]
    Execution { transition: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("void_round for round {round_id} failed {attempts} times, giving up")]
    VoidBudgetExhausted { round_id: u64, attempts: u32 },
}

impl OracleError {
    /// Feed and execution failures are retried on the next tick; everything
    /// else stops the loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OracleError::Feed(_) | OracleError::Execution { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
