//! Worker Supervisor - keeps the configured number of worker processes alive

use crate::config::SyncConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Pause before respawning, so a worker that dies on startup can't spin
const RESPAWN_DELAY: Duration = Duration::from_millis(250);

/// Spawns worker processes of this binary and respawns them on exit
pub struct WorkerSupervisor {
    program: PathBuf,
    coordinator_addr: SocketAddr,
    config: SyncConfig,
}

impl WorkerSupervisor {
    pub fn new(coordinator_addr: SocketAddr, config: SyncConfig) -> anyhow::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            coordinator_addr,
            config,
        })
    }

    /// Start one supervision task per worker slot
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|slot| {
                let command = self.worker_command();
                let respawn = self.config.respawn;
                tokio::spawn(supervise_slot(slot, command, respawn))
            })
            .collect()
    }

    fn worker_command(&self) -> WorkerCommand {
        WorkerCommand {
            program: self.program.clone(),
            args: vec![
                "--mode".to_string(),
                "worker".to_string(),
                "--addr".to_string(),
                self.coordinator_addr.to_string(),
                "--hold-ms".to_string(),
                self.config.hold_ms.to_string(),
                "--log-level".to_string(),
                self.config.log_level.clone(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

async fn supervise_slot(slot: usize, command: WorkerCommand, respawn: bool) {
    loop {
        let child = Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .spawn();

        match child {
            Ok(mut child) => {
                let pid = child.id().unwrap_or_default();
                tracing::info!("Worker {} started in slot {}", pid, slot);

                match child.wait().await {
                    Ok(status) => tracing::warn!("Worker {} died ({})", pid, status),
                    Err(e) => tracing::error!("Failed to wait on worker {}: {}", pid, e),
                }
            }
            Err(e) => {
                tracing::error!("Failed to spawn worker for slot {}: {}", slot, e);
            }
        }

        if !respawn {
            break;
        }
        tracing::info!("Respawning worker in slot {}", slot);
        tokio::time::sleep(RESPAWN_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_command_args() {
        let config = SyncConfig {
            workers: 2,
            hold_ms: 10,
            log_level: "debug".to_string(),
            ..Default::default()
        };
        let addr: SocketAddr = "127.0.0.1:9400".parse().unwrap();
        let supervisor = WorkerSupervisor::new(addr, config).unwrap();

        let command = supervisor.worker_command();
        assert_eq!(
            command.args,
            vec![
                "--mode", "worker", "--addr", "127.0.0.1:9400", "--hold-ms", "10", "--log-level",
                "debug"
            ]
        );
    }
}
