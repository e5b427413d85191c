//! Flash oracle — round lifecycle scheduler.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the last published state (or starts fresh), and drives the
//! round machine on a fixed cadence until Ctrl+C or a fatal error.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use flash_oracle::clock::SystemClock;
use flash_oracle::config::AppConfig;
use flash_oracle::engine::rounds::{RoundMachine, RoundSettings};
use flash_oracle::engine::scheduler::Scheduler;
use flash_oracle::executor::{self, TransitionExecutor};
use flash_oracle::feed::coinbase::CoinbaseSpotFeed;
use flash_oracle::storage::{self, JsonFilePublisher};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let cfg = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Configuration rejected");
            return Err(e);
        }
    };

    info!(
        mode = ?cfg.mode,
        spot_url = %cfg.spot_url,
        program_id = %cfg.program_id,
        network = %cfg.network,
        endpoint = %cfg.endpoint,
        round_length_sec = cfg.round_length_sec,
        close_buffer_sec = cfg.close_buffer_sec,
        retry_count = cfg.retry_count,
        retry_delay_ms = cfg.retry_delay_ms,
        next_round_delay_sec = cfg.next_round_delay_sec,
        state_file = %cfg.state_file.display(),
        signing_key = cfg.has_private_key(),
        "Flash oracle starting up"
    );
    if !cfg.has_private_key() {
        warn!("PRIVATE_KEY is not set; the first transition will fail");
    }

    // -- Initialise components -------------------------------------------

    let feed = Arc::new(CoinbaseSpotFeed::new(
        cfg.spot_url.clone(),
        std::time::Duration::from_millis(cfg.feed_timeout_ms),
    )?);
    let executor: Arc<dyn TransitionExecutor> = Arc::from(executor::from_config(&cfg));
    let publisher = Arc::new(JsonFilePublisher::new(&cfg.state_file));

    let machine = RoundMachine::new(
        RoundSettings::from_config(&cfg),
        feed,
        executor,
        publisher,
        Arc::new(SystemClock),
    );
    let mut scheduler = Scheduler::new(machine, cfg.tick_interval());

    // -- Restore or start fresh ------------------------------------------

    let previous = if cfg.resume {
        storage::load_snapshot(&cfg.state_file).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable state file, starting fresh");
            None
        })
    } else {
        None
    };
    scheduler.bootstrap(previous)?;

    // -- Main loop -------------------------------------------------------

    if let Err(e) = scheduler.run_until(tokio::signal::ctrl_c()).await {
        error!(error = %e, ticks = scheduler.ticks(), "Oracle loop terminated");
        return Err(e.into());
    }

    info!(
        ticks = scheduler.ticks(),
        rounds_finished = scheduler.machine().history().len(),
        "Flash oracle shut down cleanly."
    );
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flash_oracle=info"));

    let json_logging = std::env::var("ORACLE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
