//! Process-wide mutable state, bundled into a single coordinator-owned
//! context handed to every thread by `Arc`: `stopping`, the current RPS
//! target, the auto-RPS sticky flag, the shared RPS histogram, and the
//! think-time collaborators all live here instead of as free-floating
//! globals.

use std::sync::atomic::{AtomicBool, AtomicI64};

use crate::config::Config;
use crate::stats::Stats;
use crate::think::PerCpuLocks;

pub struct GlobalState {
    pub config: Config,
    /// Write-once, monotone false→true. Set under a full fence; read
    /// with ordinary loads everywhere else.
    pub stopping: AtomicBool,
    /// Current per-messenger request rate; mutated in place by the
    /// auto-RPS controller.
    pub requests_per_sec: AtomicI64,
    pub auto_rps_target_hit: AtomicBool,
    pub rps_stats: Stats,
    pub per_cpu_locks: PerCpuLocks,
}

impl GlobalState {
    pub fn new(config: Config, num_cpus: usize) -> Self {
        let requests_per_sec = config.requests_per_sec;
        GlobalState {
            config,
            stopping: AtomicBool::new(false),
            requests_per_sec: AtomicI64::new(requests_per_sec),
            auto_rps_target_hit: AtomicBool::new(false),
            rps_stats: Stats::new(),
            per_cpu_locks: PerCpuLocks::new(num_cpus),
        }
    }
}
