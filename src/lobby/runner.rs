//! Match-Runner Supervision
//!
//! Adapter around the external match-execution binary. The core knows
//! nothing about the match itself: it hands the runner a port and a player
//! count, captures its output, and gets back an eventual exit status. The
//! port travels with the process and is returned to the allocator exactly
//! once, whether the process exits or never starts.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

use super::ports::PortAllocator;

/// How to invoke the match-runner binary.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path to the match-runner executable.
    pub binary: PathBuf,
    /// Working directory for the spawned process, if any.
    pub working_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("match-runner"),
            working_dir: None,
        }
    }
}

impl RunnerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            binary: std::env::var("MATCH_RUNNER_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.binary),
            working_dir: std::env::var("MATCH_RUNNER_DIR").ok().map(PathBuf::from),
        }
    }
}

/// Supervision errors.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The spawn call itself failed (missing binary, OS error). The port
    /// has already been released when this is returned.
    #[error("failed to spawn match runner: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Spawns and supervises one match-runner process per session.
pub struct MatchSupervisor {
    config: RunnerConfig,
    ports: Arc<PortAllocator>,
}

impl MatchSupervisor {
    /// Supervisor returning ports to `ports` as processes finish.
    pub fn new(config: RunnerConfig, ports: Arc<PortAllocator>) -> Self {
        Self { config, ports }
    }

    /// Launch the match runner bound to `port` for `group_size` players.
    ///
    /// On success the process is awaited by a detached background task, so
    /// a long match never blocks matchmaking of unrelated groups; the task
    /// releases the port when the process exits, whatever its status. On
    /// spawn failure the port is released here before the error is
    /// returned.
    pub async fn spawn(&self, port: u16, group_size: usize) -> Result<(), SpawnError> {
        let mut command = Command::new(&self.config.binary);
        command
            .arg("--headless")
            .arg(format!("--port={port}"))
            .arg(format!("--players={group_size}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(port, error = %err, "failed to spawn match runner");
                self.ports.release(port).await;
                return Err(SpawnError::Spawn(err));
            }
        };

        info!(port, group_size, pid = child.id(), "match runner started");

        let ports = self.ports.clone();
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) => {
                    info!(port, status = %output.status, "match runner finished");
                    if !output.status.success() && !output.stderr.is_empty() {
                        warn!(
                            port,
                            stderr = %stderr_tail(&output.stderr),
                            "match runner reported errors"
                        );
                    }
                }
                Err(err) => {
                    error!(port, error = %err, "failed waiting for match runner");
                }
            }
            ports.release(port).await;
        });

        Ok(())
    }
}

/// Last few hundred bytes of captured stderr, lossily decoded.
fn stderr_tail(stderr: &[u8]) -> String {
    const TAIL: usize = 512;
    let start = stderr.len().saturating_sub(TAIL);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
