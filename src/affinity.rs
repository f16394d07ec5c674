//! CPU affinity for the calling thread, ported from `pin_worker_cpus` /
//! `pin_message_cpu` in `utils.c`. Workers are pinned to the whole
//! configured set (free to migrate within it); messengers are pinned to
//! one specific CPU, chosen by index within the set, so that distinct
//! messenger threads spread across distinct CPUs.

use nix::sched::CpuSet;
use nix::unistd::Pid;

use crate::error::{BenchError, Result};

fn set_affinity(cpus: &[usize]) -> Result<()> {
    let mut set = CpuSet::new();
    for &cpu in cpus {
        set.set(cpu)
            .map_err(|e| BenchError::Affinity(std::io::Error::from_raw_os_error(e as i32)))?;
    }
    nix::sched::sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| BenchError::Affinity(std::io::Error::from_raw_os_error(e as i32)))
}

/// Pin the calling thread to every CPU in `cpus` (a mask, not a single
/// pin), as `pin_worker_cpus` does for worker threads.
pub fn pin_to_cpuset(cpus: &[usize]) -> Result<()> {
    if cpus.is_empty() {
        return Ok(());
    }
    set_affinity(cpus)
}

/// Pin the calling thread to exactly one CPU, as `pin_message_cpu` does
/// for messenger threads.
pub fn pin_to_cpu(cpu: usize) -> Result<()> {
    set_affinity(&[cpu])
}
