//! Thread planning for the frame server
//!
//! Encodes always run one at a time; the only knob is how many threads the
//! frame-server script asks for (`Prefetch`, `EdiThreads`).

use crate::config::Config;

/// Threads derived from configuration and system resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Threads handed to the frame-server script
    pub frame_server_threads: u32,
}

impl ConcurrencyPlan {
    /// Derive a plan from configuration
    ///
    /// Uses `cpu.logical_cores` when set, otherwise detects cores via
    /// num_cpus. The frame server gets every core, since only one encode
    /// ever runs.
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .cpu
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32)
            .max(1);

        Self {
            total_cores,
            frame_server_threads: total_cores,
        }
    }
}
