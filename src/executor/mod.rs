//! Transition submission.
//!
//! Every on-chain state change of a round goes through a
//! [`TransitionExecutor`]. Submission is awaited to completion: the round
//! machine never advances past a transition until it has succeeded or failed.

pub mod leo_cli;

use async_trait::async_trait;
use std::fmt;

use crate::config::{AppConfig, ExecutionMode};
use crate::types::{to_fixed_point, OracleError, Round};

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A named, typed state change of the on-chain round program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    CreateRound {
        id: u64,
        start_ts: u64,
        end_ts: u64,
        close_ts: u64,
        start_price_fixed: u64,
    },
    CloseRound {
        id: u64,
    },
    ResolveRound {
        id: u64,
        end_price_fixed: u64,
    },
    VoidRound {
        id: u64,
    },
}

impl Transition {
    /// `create_round` for a freshly opened round.
    pub fn create(round: &Round) -> Result<Self, OracleError> {
        Ok(Transition::CreateRound {
            id: round.id,
            start_ts: round.start_ts,
            end_ts: round.end_ts,
            close_ts: round.close_ts,
            start_price_fixed: to_fixed_point(round.start_price)?,
        })
    }

    /// `resolve_round` with the end price encoded at the 1e8 scale.
    pub fn resolve(id: u64, end_price: f64) -> Result<Self, OracleError> {
        Ok(Transition::ResolveRound {
            id,
            end_price_fixed: to_fixed_point(end_price)?,
        })
    }

    /// Program function name.
    pub fn name(&self) -> &'static str {
        match self {
            Transition::CreateRound { .. } => "create_round",
            Transition::CloseRound { .. } => "close_round",
            Transition::ResolveRound { .. } => "resolve_round",
            Transition::VoidRound { .. } => "void_round",
        }
    }

    pub fn round_id(&self) -> u64 {
        match self {
            Transition::CreateRound { id, .. }
            | Transition::CloseRound { id }
            | Transition::ResolveRound { id, .. }
            | Transition::VoidRound { id } => *id,
        }
    }

    /// Ordered arguments as `u64` literals.
    pub fn inputs(&self) -> Vec<String> {
        let values: Vec<u64> = match *self {
            Transition::CreateRound {
                id,
                start_ts,
                end_ts,
                close_ts,
                start_price_fixed,
            } => vec![id, start_ts, end_ts, close_ts, start_price_fixed],
            Transition::CloseRound { id } | Transition::VoidRound { id } => vec![id],
            Transition::ResolveRound {
                id,
                end_price_fixed,
            } => vec![id, end_price_fixed],
        };
        values.into_iter().map(|v| format!("{v}u64")).collect()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.inputs().join(", "))
    }
}

// ---------------------------------------------------------------------------
// Executor trait
// ---------------------------------------------------------------------------

/// Capability to commit round transitions externally.
///
/// Implementors only need [`submit`](TransitionExecutor::submit); the
/// per-transition helpers build the argument lists.
#[async_trait]
pub trait TransitionExecutor: Send + Sync {
    /// Submit one transition and wait for it to be accepted.
    async fn submit(&self, transition: &Transition) -> Result<(), OracleError>;

    async fn create_round(&self, round: &Round) -> Result<(), OracleError> {
        self.submit(&Transition::create(round)?).await
    }

    async fn close_round(&self, id: u64) -> Result<(), OracleError> {
        self.submit(&Transition::CloseRound { id }).await
    }

    async fn resolve_round(&self, id: u64, end_price: f64) -> Result<(), OracleError> {
        self.submit(&Transition::resolve(id, end_price)?).await
    }

    async fn void_round(&self, id: u64) -> Result<(), OracleError> {
        self.submit(&Transition::VoidRound { id }).await
    }
}

/// Build the executor selected by `cfg.mode`.
pub fn from_config(cfg: &AppConfig) -> Box<dyn TransitionExecutor> {
    match cfg.mode {
        ExecutionMode::LeoCli => Box::new(leo_cli::LeoCliExecutor::from_config(cfg)),
    }
}
