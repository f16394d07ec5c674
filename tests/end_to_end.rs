//! End-to-end runs through `wakebench::run`, covering ping-pong, rate,
//! pipe, and auto-rps modes with multiple messengers/workers. Runtimes
//! are kept short (1-3s) so the suite stays fast; a couple of longer
//! scenarios that need `runtime >= 30` to exercise warmup are `#[ignore]`d.

use wakebench::config::{Cli, Config};

fn base_cli() -> Cli {
    Cli {
        message_threads: 1,
        worker_threads: 1,
        message_cpus: None,
        worker_cpus: None,
        pin: None,
        runtime: 1,
        requests_per_sec: 0,
        auto_rps: 0,
        warmuptime: 0,
        intervaltime: 10,
        zerotime: 0,
        operations: 5,
        sleep_usec: 100,
        cache_footprint_kb: 16,
        pipe_test: 0,
        calibrate_only: false,
        skip_locking: false,
        json_file: None,
        jobname: None,
    }
}

#[test]
fn ping_pong_single_pair_completes_and_reports_samples() {
    let cli = base_cli();
    let config = Config::from_cli(cli).unwrap();
    let summary = wakebench::run(config).unwrap();
    assert!(summary.total_loop_count > 0);
    assert!(summary.wakeup_samples > 0);
    assert!(summary.request_samples > 0);
    assert!(summary.wakeup_min <= summary.wakeup_max);
}

#[test]
fn rate_mode_respects_requested_throughput_order_of_magnitude() {
    let mut cli = base_cli();
    cli.message_threads = 1;
    cli.worker_threads = 4;
    cli.runtime = 2;
    cli.requests_per_sec = 100;
    let config = Config::from_cli(cli).unwrap();
    assert!(config.is_rate_mode());
    let summary = wakebench::run(config).unwrap();
    // two one-second ticks at ~100 rps; generous bounds since scheduling
    // jitter and backpressure both push the real count around.
    assert!(summary.total_loop_count > 20);
    assert!(summary.total_loop_count < 1000);
}

#[test]
fn pipe_mode_runs_without_request_stats() {
    let mut cli = base_cli();
    cli.message_threads = 2;
    cli.worker_threads = 2;
    cli.runtime = 2;
    cli.pipe_test = 4096;
    let config = Config::from_cli(cli).unwrap();
    assert!(config.is_pipe_mode());
    let summary = wakebench::run(config).unwrap();
    assert!(summary.total_loop_count > 0);
    assert!(summary.wakeup_samples > 0);
}

#[test]
fn auto_rps_converges_within_a_short_run() {
    let mut cli = base_cli();
    cli.runtime = 3;
    cli.auto_rps = 80;
    let config = Config::from_cli(cli).unwrap();
    assert_eq!(config.warmuptime, 0);
    let summary = wakebench::run(config).unwrap();
    assert!(summary.total_loop_count > 0);
}

#[test]
fn multiple_messengers_shut_down_cleanly() {
    let mut cli = base_cli();
    cli.message_threads = 2;
    cli.worker_threads = 2;
    cli.requests_per_sec = 10;
    cli.runtime = 2;
    let config = Config::from_cli(cli).unwrap();
    let summary = wakebench::run(config).unwrap();
    assert!(summary.total_loop_count > 0);
}

#[test]
#[ignore = "needs runtime >= 30 to exercise the warmup window"]
fn warmup_window_zeroes_stats_before_the_measured_period() {
    let mut cli = base_cli();
    cli.runtime = 31;
    cli.warmuptime = 5;
    let config = Config::from_cli(cli).unwrap();
    assert_eq!(config.warmuptime, 5);
    let summary = wakebench::run(config).unwrap();
    assert!(summary.total_loop_count > 0);
}
