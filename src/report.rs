//! Stats rollup and the two render paths: human text to the log stream,
//! and a machine-readable JSON report, mirroring `show_latencies` /
//! `write_json_header`/`write_json_stats`/`write_json_footer` from the
//! original's `stats.c`/`utils.c`, but built with `serde_json` rather than
//! hand-rolled `fprintf`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{BenchError, Result};
use crate::procfs;
use crate::stats::{Percentile, Stats, PLIST_FOR_LAT, PLIST_FOR_RPS};
use crate::worker::WorkerSlot;

/// Aggregated view over every worker's stats, computed at report time.
pub struct RollupStats {
    pub wakeup: Stats,
    pub request: Stats,
    pub total_loop_count: u64,
    pub total_runtime_us: u64,
    pub sched_delay_ns: Vec<(usize, u64)>,
}

pub fn rollup(workers: &[Arc<WorkerSlot>]) -> RollupStats {
    let wakeup = Stats::new();
    let request = Stats::new();
    let mut total_loop_count = 0u64;
    let mut total_runtime_us = 0u64;
    let mut sched_delay_ns = Vec::with_capacity(workers.len());

    for w in workers {
        wakeup.combine(&w.wakeup_stats);
        request.combine(&w.request_stats);
        total_loop_count += w.loop_count.load(Ordering::Relaxed);
        total_runtime_us += w.runtime_us.load(Ordering::Relaxed);
        let tid = w.tid.load(Ordering::Relaxed);
        sched_delay_ns.push((w.index, procfs::read_sched_delay_ns(tid)));
    }

    RollupStats {
        wakeup,
        request,
        total_loop_count,
        total_runtime_us,
        sched_delay_ns,
    }
}

/// Byte-size pretty-printer, ported from `pretty_size`: divide by 1024
/// until under a unit's threshold, return the scaled number and its unit.
pub fn pretty_size(mut number: f64) -> (f64, &'static str) {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    let mut idx = 0;
    while number >= 1024.0 && idx + 1 < UNITS.len() {
        idx += 1;
        number /= 1024.0;
    }
    (number, UNITS[idx])
}

fn show_latencies(label: &str, units: &str, runtime_s: u64, s: &Stats, targets: &[f64]) {
    let pcts = s.percentiles(targets);
    log::info!(
        "{label} percentiles ({units}) runtime {runtime_s} (s) ({} total samples)",
        s.nr_samples()
    );
    for p in &pcts {
        log::info!("  {:>5.1}th: {:<10} ({} samples)", p.target, p.value, p.count);
    }
    log::info!("  min={}, max={}", s.min(), s.max());
}

/// Human-readable final report to the log stream, mirroring the
/// original's end-of-run `show_latencies` calls in `schbench.c`.
pub fn print_human(
    rollup: &RollupStats,
    rps_stats: &Stats,
    runtime_s: u64,
    pipe_test: u64,
    auto_rps: bool,
    requests_per_sec_goal: i64,
) {
    if pipe_test > 0 {
        show_latencies("Wakeup Latencies", "usec", runtime_s, &rollup.wakeup, PLIST_FOR_LAT);
        let mb_per_sec = if rollup.total_runtime_us > 0 {
            rollup.total_loop_count as f64 * pipe_test as f64 * 1_000_000.0
                / rollup.total_runtime_us as f64
        } else {
            0.0
        };
        let (scaled, unit) = pretty_size(mb_per_sec);
        log::info!("avg worker transfer: {scaled:.2}{unit}/s");
    } else {
        show_latencies("Wakeup Latencies", "usec", runtime_s, &rollup.wakeup, PLIST_FOR_LAT);
        show_latencies("Request Latencies", "usec", runtime_s, &rollup.request, PLIST_FOR_LAT);
        show_latencies("RPS", "requests", runtime_s, rps_stats, PLIST_FOR_RPS);

        if !auto_rps {
            let avg = rollup.total_loop_count as f64 / runtime_s.max(1) as f64;
            log::info!("average rps: {avg:.2}");
        } else {
            log::info!("final rps goal was {requests_per_sec_goal}");
        }
    }

    if let Some((_, delay)) = rollup.sched_delay_ns.first() {
        let avg_ns: u64 = if !rollup.sched_delay_ns.is_empty() {
            rollup.sched_delay_ns.iter().map(|(_, d)| d).sum::<u64>()
                / rollup.sched_delay_ns.len() as u64
        } else {
            *delay
        };
        log::info!("avg worker sched delay: {} (usec)", avg_ns / 1000);
    }
}

#[derive(Serialize)]
struct JsonPercentile {
    target: f64,
    value: u32,
    count: u64,
}

impl From<&Percentile> for JsonPercentile {
    fn from(p: &Percentile) -> Self {
        JsonPercentile {
            target: p.target,
            value: p.value,
            count: p.count,
        }
    }
}

#[derive(Serialize)]
struct JsonHistogram {
    nr_samples: u64,
    min: u32,
    max: u32,
    percentiles: Vec<JsonPercentile>,
}

fn json_histogram(s: &Stats, targets: &[f64]) -> JsonHistogram {
    JsonHistogram {
        nr_samples: s.nr_samples(),
        min: s.min(),
        max: s.max(),
        percentiles: s.percentiles(targets).iter().map(JsonPercentile::from).collect(),
    }
}

#[derive(Serialize)]
struct JsonSchedDelay {
    worker: usize,
    delay_ns: u64,
}

#[derive(Serialize)]
struct JsonReport {
    version: String,
    jobname: Option<String>,
    hostname: String,
    sched_ext: String,
    cmdline: String,
    time: u64,
    wakeup_latency: JsonHistogram,
    request_latency: Option<JsonHistogram>,
    rps: Option<JsonHistogram>,
    runtime: u64,
    worker_sched_delay_ns: Vec<JsonSchedDelay>,
}

/// Current kernel release, hostname, and detected `sched_ext` scheduler
/// name (or "disabled") -- mirroring `write_json_header`'s
/// `uname`/`getaddrinfo`/`print_sched_ext_info` calls.
pub fn host_info() -> (String, String, String) {
    let version = kernel_release().unwrap_or_else(|| "unknown".to_string());
    let hostname = local_hostname().unwrap_or_else(|| "unknown".to_string());
    let sched_ext = detect_sched_ext().unwrap_or_else(|| "disabled".to_string());
    (version, hostname, sched_ext)
}

fn kernel_release() -> Option<String> {
    let mut u: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut u) } != 0 {
        return None;
    }
    let release = unsafe { std::ffi::CStr::from_ptr(u.release.as_ptr()) };
    Some(release.to_string_lossy().into_owned())
}

fn local_hostname() -> Option<String> {
    let mut buf = vec![0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn detect_sched_ext() -> Option<String> {
    let state = std::fs::read_to_string("/sys/kernel/sched_ext/state").ok()?;
    if state.trim() == "disabled" {
        return None;
    }
    let ops = std::fs::read_to_string("/sys/kernel/sched_ext/root/ops").ok()?;
    let ops = ops.trim();
    if ops.is_empty() {
        return None;
    }
    Some(ops.to_string())
}

/// Write the JSON report to `path` (`-` means stdout), mirroring
/// `write_json_header`/`write_json_stats`/`write_json_footer`.
pub fn write_json(
    path: &str,
    jobname: Option<&str>,
    rollup: &RollupStats,
    rps_stats: &Stats,
    runtime_s: u64,
    pipe_test: u64,
) -> Result<()> {
    let (version, hostname, sched_ext) = host_info();
    let cmdline = std::env::args().collect::<Vec<_>>().join(" ");
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let (request_latency, rps) = if pipe_test > 0 {
        (None, None)
    } else {
        (
            Some(json_histogram(&rollup.request, PLIST_FOR_LAT)),
            Some(json_histogram(rps_stats, PLIST_FOR_RPS)),
        )
    };

    let report = JsonReport {
        version,
        jobname: jobname.map(str::to_string),
        hostname,
        sched_ext,
        cmdline,
        time,
        wakeup_latency: json_histogram(&rollup.wakeup, PLIST_FOR_LAT),
        request_latency,
        rps,
        runtime: runtime_s,
        worker_sched_delay_ns: rollup
            .sched_delay_ns
            .iter()
            .map(|(worker, delay_ns)| JsonSchedDelay {
                worker: *worker,
                delay_ns: *delay_ns,
            })
            .collect(),
    };

    let body = serde_json::to_string_pretty(&report).map_err(|e| BenchError::JsonWrite {
        path: path.into(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    })?;

    if path == "-" {
        println!("{body}");
    } else {
        std::fs::write(path, body).map_err(|source| BenchError::JsonWrite {
            path: path.into(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_size_scales_to_the_right_unit() {
        let (n, u) = pretty_size(500.0);
        assert_eq!(u, "B");
        assert_eq!(n, 500.0);

        let (n, u) = pretty_size(1536.0);
        assert_eq!(u, "KB");
        assert!((n - 1.5).abs() < 1e-9);

        let (n, u) = pretty_size(1024.0 * 1024.0 * 3.0);
        assert_eq!(u, "MB");
        assert!((n - 3.0).abs() < 1e-9);
    }

    #[test]
    fn rollup_sums_across_workers() {
        let a = Arc::new(WorkerSlot::new(0, 0));
        let b = Arc::new(WorkerSlot::new(1, 0));
        a.loop_count.store(10, Ordering::Relaxed);
        b.loop_count.store(5, Ordering::Relaxed);
        a.wakeup_stats.add_lat(42);
        b.wakeup_stats.add_lat(7);
        let r = rollup(&[a, b]);
        assert_eq!(r.total_loop_count, 15);
        assert_eq!(r.wakeup.nr_samples(), 2);
        assert_eq!(r.wakeup.min(), 7);
    }
}
