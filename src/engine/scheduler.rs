//! Scheduler loop.
//!
//! Publishes the bootstrap state, then runs one round-machine tick at a
//! time with a fixed pause after each, until a fatal error or shutdown.
//! Ticks never overlap and are never cancelled midway: shutdown is only
//! observed during the pause between ticks.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info};

use super::rounds::{RoundMachine, TickOutcome};
use crate::types::{OracleError, StateSnapshot};

pub struct Scheduler {
    machine: RoundMachine,
    tick_interval: Duration,
    ticks: u64,
}

impl Scheduler {
    pub fn new(machine: RoundMachine, tick_interval: Duration) -> Self {
        Self {
            machine,
            tick_interval,
            ticks: 0,
        }
    }

    pub fn machine(&self) -> &RoundMachine {
        &self.machine
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Adopt a previous snapshot (if any) and publish the initial state.
    pub fn bootstrap(&mut self, previous: Option<StateSnapshot>) -> Result<(), OracleError> {
        if let Some(snapshot) = previous {
            self.machine.restore(snapshot);
        }
        self.machine.publish()
    }

    /// Run one tick, absorbing recoverable errors.
    ///
    /// Feed and execution failures are logged and leave state untouched for
    /// the next tick. Anything else is returned.
    pub async fn step(&mut self) -> Result<TickOutcome, OracleError> {
        self.ticks += 1;
        match self.machine.tick().await {
            Ok(outcome) => {
                match outcome {
                    TickOutcome::Idle | TickOutcome::Deferred => {}
                    other => debug!(tick = self.ticks, outcome = ?other, "Tick complete"),
                }
                Ok(outcome)
            }
            Err(e) if e.is_recoverable() => {
                error!(tick = self.ticks, error = %e, "Tick failed, retrying on next tick");
                Ok(TickOutcome::Aborted)
            }
            Err(e) => {
                error!(tick = self.ticks, error = %e, "Fatal error in oracle loop");
                Err(e)
            }
        }
    }

    /// Tick forever until `shutdown` resolves or a fatal error occurs.
    ///
    /// On a clean shutdown the latest state is published once more.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), OracleError>
    where
        F: Future,
    {
        tokio::pin!(shutdown);

        // Poll once up front so signal listeners are registered before the
        // first tick, which may run for a while.
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown signal received before the first tick.");
                return self.machine.publish();
            }
            _ = std::future::ready(()) => {}
        }

        info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            "Entering oracle loop. Press Ctrl+C to stop."
        );

        loop {
            self.step().await?;

            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = &mut shutdown => {
                    info!(ticks = self.ticks, "Shutdown signal received.");
                    break;
                }
            }
        }

        self.machine.publish()
    }
}
