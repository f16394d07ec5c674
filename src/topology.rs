//! CPU topology discovery, for CCX-aware pinning.
//!
//! On modern multi-die/multi-chiplet processors, wakeup locality depends a
//! lot on whether the waker and wakee share a die. `--pin ccx` assigns each
//! messenger (and its workers) to one die round-robin, discovered here from
//! sysfs, ported from the original's `topology.c`.

use std::collections::BTreeMap;
use std::fs;

use crate::error::{BenchError, Result};

#[derive(Debug, Clone, Default)]
pub struct DieInfo {
    pub die_id: usize,
    pub cpus: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CpuTopology {
    pub dies: Vec<DieInfo>,
    pub all_cpus: Vec<usize>,
}

fn read_int(path: &std::path::Path) -> Option<i64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Discover dies/packages from `/sys/devices/system/cpu`. Falls back from
/// `die_id` to `physical_package_id` when the kernel doesn't expose dies.
pub fn detect_topology() -> Result<CpuTopology> {
    let root = std::path::Path::new("/sys/devices/system/cpu");
    let entries = fs::read_dir(root).map_err(|source| BenchError::Open {
        path: root.to_path_buf(),
        source,
    })?;

    let mut all_cpus = Vec::new();
    let mut die_of_cpu = BTreeMap::new();

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let cpu_id = match name.strip_prefix("cpu").and_then(|n| n.parse::<usize>().ok()) {
            Some(id) => id,
            None => continue,
        };

        let cpu_dir = root.join(format!("cpu{cpu_id}"));
        let online = read_int(&cpu_dir.join("online"));
        let online = match online {
            Some(v) => v == 1,
            // cpu0 has no "online" file and is always online.
            None => cpu_id == 0,
        };
        if !online {
            continue;
        }

        all_cpus.push(cpu_id);

        let topo_dir = cpu_dir.join("topology");
        let die_id = read_int(&topo_dir.join("die_id"))
            .or_else(|| read_int(&topo_dir.join("physical_package_id")));
        if let Some(die_id) = die_id {
            die_of_cpu.insert(cpu_id, die_id as usize);
        }
    }

    if die_of_cpu.is_empty() {
        return Err(BenchError::TopologyDetect);
    }

    let num_dies = die_of_cpu.values().max().copied().unwrap_or(0) + 1;
    let mut dies: Vec<DieInfo> = (0..num_dies)
        .map(|id| DieInfo {
            die_id: id,
            cpus: Vec::new(),
        })
        .collect();
    for (cpu, die) in die_of_cpu {
        dies[die].cpus.push(cpu);
    }

    all_cpus.sort_unstable();
    Ok(CpuTopology { dies, all_cpus })
}

impl CpuTopology {
    pub fn log_summary(&self) {
        log::info!("CPU topology: {} dies detected", self.dies.len());
        for die in &self.dies {
            log::info!("  die {}: cpus {} ({} cpus)", die.die_id, ranges(&die.cpus), die.cpus.len());
        }
    }
}

/// Render a sorted list of CPU ids as compact ranges, e.g. `0-3,7,9-11`.
pub fn ranges(cpus: &[usize]) -> String {
    if cpus.is_empty() {
        return String::new();
    }
    let mut sorted = cpus.to_vec();
    sorted.sort_unstable();

    let mut out = Vec::new();
    let mut start = sorted[0];
    let mut last = sorted[0];
    for &c in &sorted[1..] {
        if c == last + 1 {
            last = c;
            continue;
        }
        out.push(fmt_range(start, last));
        start = c;
        last = c;
    }
    out.push(fmt_range(start, last));
    out.join(",")
}

fn fmt_range(start: usize, last: usize) -> String {
    if start == last {
        start.to_string()
    } else {
        format!("{start}-{last}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_compacts_contiguous_runs() {
        assert_eq!(ranges(&[0, 1, 2, 3, 7, 9, 10, 11]), "0-3,7,9-11");
        assert_eq!(ranges(&[5]), "5");
        assert_eq!(ranges(&[]), "");
    }
}
