//! `leo` CLI executor.
//!
//! Runs `leo execute <program>/<transition> <inputs..> --broadcast --yes
//! --private-key <key> --network <net> --endpoint <url> --no-local` and
//! treats a zero exit status as acceptance. Child output is inherited so the
//! CLI's own progress lands in the oracle's logs.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret, SecretString};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use super::{Transition, TransitionExecutor};
use crate::config::AppConfig;
use crate::types::OracleError;

pub struct LeoCliExecutor {
    leo_bin: PathBuf,
    program_id: String,
    network: String,
    endpoint: String,
    private_key: SecretString,
    timeout: Option<Duration>,
}

impl LeoCliExecutor {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            leo_bin: cfg.leo_bin.clone(),
            program_id: cfg.program_id.clone(),
            network: cfg.network.clone(),
            endpoint: cfg.endpoint.clone(),
            private_key: Secret::new(cfg.private_key.expose_secret().clone()),
            timeout: cfg.exec_timeout(),
        }
    }

    /// Full argument vector, private key included.
    fn command_args(&self, transition: &Transition) -> Vec<String> {
        let mut args = vec![
            "execute".to_string(),
            format!("{}/{}", self.program_id, transition.name()),
        ];
        args.extend(transition.inputs());
        args.extend([
            "--broadcast".to_string(),
            "--yes".to_string(),
            "--private-key".to_string(),
            self.private_key.expose_secret().clone(),
            "--network".to_string(),
            self.network.clone(),
            "--endpoint".to_string(),
            self.endpoint.clone(),
            "--no-local".to_string(),
        ]);
        args
    }

    fn failure(transition: &Transition, message: String) -> OracleError {
        OracleError::Execution {
            transition: transition.name().to_string(),
            message,
        }
    }
}

#[async_trait]
impl TransitionExecutor for LeoCliExecutor {
    async fn submit(&self, transition: &Transition) -> Result<(), OracleError> {
        if self.private_key.expose_secret().is_empty() {
            return Err(OracleError::Config("Missing PRIVATE_KEY for leo-cli mode".into()));
        }

        info!(
            transition = transition.name(),
            round_id = transition.round_id(),
            inputs = ?transition.inputs(),
            "[leo-cli] Submitting transition"
        );

        let mut child = Command::new(&self.leo_bin)
            .args(self.command_args(transition))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let message = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("leo binary not found at {}", self.leo_bin.display())
                } else {
                    format!("failed to spawn {}: {e}", self.leo_bin.display())
                };
                Self::failure(transition, message)
            })?;

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!(
                        transition = transition.name(),
                        timeout_secs = limit.as_secs(),
                        "[leo-cli] Timed out, killing child"
                    );
                    let _ = child.kill().await;
                    return Err(Self::failure(
                        transition,
                        format!("leo execute timed out after {}s", limit.as_secs()),
                    ));
                }
            },
            None => child.wait().await,
        };

        let status = waited
            .map_err(|e| Self::failure(transition, format!("failed to wait for leo: {e}")))?;

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(Self::failure(transition, format!("leo execute failed: {code}")));
        }

        info!(
            transition = transition.name(),
            round_id = transition.round_id(),
            "[leo-cli] Transition accepted"
        );
        Ok(())
    }
}
