//! Coordinator Configuration

use serde::{Deserialize, Serialize};

/// Coordinator and worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Address the coordinator listens on and workers connect to
    pub coordinator_addr: String,
    /// Number of worker processes to keep alive
    pub workers: usize,
    /// Respawn a worker when it exits
    pub respawn: bool,
    /// Upper bound for how long a demo worker holds its state, in milliseconds
    pub hold_ms: u64,
    /// Log level passed down to workers
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: "127.0.0.1:9400".to_string(),
            workers: default_worker_count(),
            respawn: true,
            hold_ms: 50_000,
            log_level: "info".to_string(),
        }
    }
}

/// One worker per available CPU
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
