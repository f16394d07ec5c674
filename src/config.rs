//! The configuration record the core consumes. Parsing lives here, at the
//! boundary; `Config` itself is the narrow interface the rest of the crate
//! depends on.

use clap::{Parser, ValueEnum};

use crate::error::{BenchError, Result};
use crate::think::matrix_size_for_footprint;
use crate::topology::{detect_topology, CpuTopology};

/// `PIN_MODE_{NONE,MANUAL,AUTO,CCX}` from the original's `schbench.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PinMode {
    None,
    Manual,
    Auto,
    Ccx,
}

/// schedule wakeup-latency benchmark
#[derive(Parser, Debug, Clone)]
#[command(name = "wakebench", version, about)]
pub struct Cli {
    /// number of messenger threads
    #[arg(short = 'm', long = "message-threads", default_value_t = 1)]
    pub message_threads: usize,

    /// worker threads per messenger (0 = num_cpus / message_threads)
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    pub worker_threads: usize,

    /// pin message threads to these cpus ("a-m,n-z" or "auto")
    #[arg(short = 'M', long = "message-cpus")]
    pub message_cpus: Option<String>,

    /// pin worker threads to these cpus ("a-m,n-z" or "auto")
    #[arg(short = 'W', long = "worker-cpus")]
    pub worker_cpus: Option<String>,

    /// pin threads to dies/chiplets (CCX-aware pinning)
    #[arg(short = 'P', long = "pin")]
    pub pin: Option<String>,

    /// total benchmark duration in seconds
    #[arg(short = 'r', long = "runtime", default_value_t = 30)]
    pub runtime: u64,

    /// requests per second (0 = ping-pong mode)
    #[arg(short = 'R', long = "rps", default_value_t = 0)]
    pub requests_per_sec: i64,

    /// grow RPS until CPU utilisation hits this target percentage
    #[arg(short = 'A', long = "auto-rps", default_value_t = 0)]
    pub auto_rps: u32,

    /// warmup seconds before resetting stats (honoured only for runtime>=30, non-rate, non-pipe)
    #[arg(short = 'w', long = "warmuptime", default_value_t = 0)]
    pub warmuptime: u64,

    /// interval in seconds between latency reports
    #[arg(short = 'i', long = "intervaltime", default_value_t = 10)]
    pub intervaltime: u64,

    /// interval in seconds for zeroing stats (0 = never)
    #[arg(short = 'z', long = "zerotime", default_value_t = 0)]
    pub zerotime: u64,

    /// think-time operations to perform per request
    #[arg(short = 'n', long = "operations", default_value_t = 5)]
    pub operations: u64,

    /// think-time sleep in microseconds per request
    #[arg(short = 's', long = "sleep_usec", default_value_t = 100)]
    pub sleep_usec: u64,

    /// cache footprint in KB for the think-time matrices
    #[arg(short = 'F', long = "cache_footprint", default_value_t = 256)]
    pub cache_footprint_kb: u64,

    /// transfer this many bytes to simulate a pipe test on each wake (capped at 1MiB)
    #[arg(short = 'p', long = "pipe", default_value_t = 0)]
    pub pipe_test: u64,

    /// run the work loop and report timing outside the measured window
    #[arg(short = 'C', long = "calibrate", default_value_t = false)]
    pub calibrate_only: bool,

    /// don't take the per-CPU lock during think-time
    #[arg(short = 'L', long = "no-locking", default_value_t = false)]
    pub skip_locking: bool,

    /// write a machine-readable report to this file ("-" for stdout)
    #[arg(short = 'j', long = "json")]
    pub json_file: Option<String>,

    /// optional jobname recorded in the json report
    #[arg(short = 'J', long = "jobname")]
    pub jobname: Option<String>,
}

/// Byte size above which `--pipe` is clamped, matching `PIPE_TRANSFER_BUFFER`.
pub const PIPE_TRANSFER_BUFFER: u64 = 1024 * 1024;

/// Fully resolved configuration, after CLI parsing and the post-parse
/// invariants `parse_options()` applied in the original (pipe/rps zero
/// warmup, calibrate implies skip_locking, runtime<30 disables warmup,
/// CCX topology detection).
#[derive(Debug, Clone)]
pub struct Config {
    pub message_threads: usize,
    pub worker_threads: usize,
    pub runtime: u64,
    pub warmuptime: u64,
    pub intervaltime: u64,
    pub zerotime: u64,
    pub operations: u64,
    pub sleep_usec: u64,
    pub cache_footprint_kb: u64,
    pub matrix_size: usize,
    pub requests_per_sec: i64,
    pub auto_rps: u32,
    pub pipe_test: u64,
    pub calibrate_only: bool,
    pub skip_locking: bool,
    pub json_file: Option<String>,
    pub jobname: Option<String>,
    pub pin_mode: PinMode,
    pub message_cpus: Option<Vec<usize>>,
    pub worker_cpus: Option<Vec<usize>>,
    pub per_message_thread_cpus: Option<Vec<Vec<usize>>>,
    pub topology: Option<CpuTopology>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Config> {
        let mut pin_mode = PinMode::None;
        let mut auto_pin = false;
        let mut message_cpus = None;
        let mut worker_cpus = None;

        if let Some(spec) = &cli.message_cpus {
            if spec == "auto" {
                auto_pin = true;
                pin_mode = PinMode::Auto;
            } else {
                message_cpus = Some(parse_cpuset(spec)?);
                pin_mode = PinMode::Manual;
            }
        }
        if let Some(spec) = &cli.worker_cpus {
            if spec == "auto" {
                auto_pin = true;
                pin_mode = PinMode::Auto;
            } else {
                worker_cpus = Some(parse_cpuset(spec)?);
                pin_mode = PinMode::Manual;
            }
        }
        if let Some(p) = &cli.pin {
            if p == "ccx" {
                pin_mode = PinMode::Ccx;
            } else {
                return Err(BenchError::BadCpuset(p.clone()));
            }
        }

        let num_cpus = num_cpus::get();
        if auto_pin {
            let (m, w) = thread_auto_pin(cli.message_threads, num_cpus);
            message_cpus = Some(m);
            worker_cpus = Some(w);
        }

        let auto_rps = cli.auto_rps;
        let mut requests_per_sec = cli.requests_per_sec;
        if auto_rps > 0 && requests_per_sec == 0 {
            requests_per_sec = 10;
        }
        // matches `-A` setting warmuptime = 0 unconditionally in the original
        let mut warmuptime = cli.warmuptime;
        if cli.auto_rps > 0 {
            warmuptime = 0;
        }

        let mut pipe_test = cli.pipe_test;
        if pipe_test > PIPE_TRANSFER_BUFFER {
            log::warn!("pipe size too big, using {PIPE_TRANSFER_BUFFER}");
            pipe_test = PIPE_TRANSFER_BUFFER;
        }
        if cli.pipe_test > 0 {
            warmuptime = 0;
        }

        let mut skip_locking = cli.skip_locking;
        if cli.calibrate_only {
            skip_locking = true;
        }

        if cli.runtime < 30 {
            warmuptime = 0;
        }

        let worker_threads = if cli.worker_threads == 0 {
            (num_cpus + cli.message_threads - 1) / cli.message_threads
        } else {
            cli.worker_threads
        };

        let matrix_size = matrix_size_for_footprint(cli.cache_footprint_kb);

        let (topology, per_message_thread_cpus) = if pin_mode == PinMode::Ccx {
            let topo = detect_topology()?;
            topo.log_summary();
            let assignment: Vec<Vec<usize>> = (0..cli.message_threads)
                .map(|i| topo.dies[i % topo.dies.len()].cpus.clone())
                .collect();
            (Some(topo), Some(assignment))
        } else {
            (None, None)
        };

        // the global rps target is divided across messengers up front, as
        // in main()'s `requests_per_sec /= message_threads`.
        let per_messenger_rps = requests_per_sec / cli.message_threads as i64;

        Ok(Config {
            message_threads: cli.message_threads,
            worker_threads,
            runtime: cli.runtime,
            warmuptime,
            intervaltime: cli.intervaltime,
            zerotime: cli.zerotime,
            operations: cli.operations,
            sleep_usec: cli.sleep_usec,
            cache_footprint_kb: cli.cache_footprint_kb,
            matrix_size,
            requests_per_sec: per_messenger_rps,
            auto_rps,
            pipe_test,
            calibrate_only: cli.calibrate_only,
            skip_locking,
            json_file: cli.json_file,
            jobname: cli.jobname,
            pin_mode,
            message_cpus,
            worker_cpus,
            per_message_thread_cpus,
            topology,
        })
    }

    pub fn is_rate_mode(&self) -> bool {
        self.requests_per_sec > 0
    }

    pub fn is_pipe_mode(&self) -> bool {
        self.pipe_test > 0
    }
}

/// Parse `"a-m,n-z"` cpu range lists into a sorted, deduplicated CPU id list.
pub fn parse_cpuset(s: &str) -> Result<Vec<usize>> {
    if s.is_empty() {
        return Err(BenchError::BadCpuset(s.to_string()));
    }
    let mut cpus = std::collections::BTreeSet::new();
    for token in s.split(',') {
        if let Some((start, end)) = token.split_once('-') {
            let start: usize = start
                .parse()
                .map_err(|_| BenchError::BadCpuset(s.to_string()))?;
            let end: usize = end
                .parse()
                .map_err(|_| BenchError::BadCpuset(s.to_string()))?;
            if end < start {
                return Err(BenchError::BadCpuset(s.to_string()));
            }
            for c in start..=end {
                cpus.insert(c);
            }
        } else {
            let v: usize = token
                .parse()
                .map_err(|_| BenchError::BadCpuset(s.to_string()))?;
            cpus.insert(v);
        }
    }
    Ok(cpus.into_iter().collect())
}

/// `-M auto`/`-W auto`: give each message thread its own CPU, and give
/// worker threads everything else. Ported from `thread_auto_pin`.
fn thread_auto_pin(message_threads: usize, num_cpus: usize) -> (Vec<usize>, Vec<usize>) {
    let message_cpus: Vec<usize> = (0..message_threads.min(num_cpus)).collect();
    let worker_cpus: Vec<usize> = (message_threads.min(num_cpus)..num_cpus).collect();
    log::info!("auto pinning message and worker threads");
    (message_cpus, worker_cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpuset_ranges_and_singles() {
        assert_eq!(parse_cpuset("0-2,5").unwrap(), vec![0, 1, 2, 5]);
        assert_eq!(parse_cpuset("3").unwrap(), vec![3]);
        assert!(parse_cpuset("").is_err());
        assert!(parse_cpuset("5-2").is_err());
        assert!(parse_cpuset("x").is_err());
    }

    #[test]
    fn auto_pin_splits_cpus() {
        let (m, w) = thread_auto_pin(2, 8);
        assert_eq!(m, vec![0, 1]);
        assert_eq!(w, vec![2, 3, 4, 5, 6, 7]);
    }
}
