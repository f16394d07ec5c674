use wakebench::config::{Cli, Config, PinMode};

fn base_cli() -> Cli {
    Cli {
        message_threads: 1,
        worker_threads: 0,
        message_cpus: None,
        worker_cpus: None,
        pin: None,
        runtime: 30,
        requests_per_sec: 0,
        auto_rps: 0,
        warmuptime: 5,
        intervaltime: 10,
        zerotime: 0,
        operations: 5,
        sleep_usec: 100,
        cache_footprint_kb: 256,
        pipe_test: 0,
        calibrate_only: false,
        skip_locking: false,
        json_file: None,
        jobname: None,
    }
}

#[test]
fn short_runtime_disables_warmup() {
    let mut cli = base_cli();
    cli.runtime = 10;
    let config = Config::from_cli(cli).unwrap();
    assert_eq!(config.warmuptime, 0);
}

#[test]
fn pipe_test_disables_warmup_even_for_long_runs() {
    let mut cli = base_cli();
    cli.pipe_test = 4096;
    let config = Config::from_cli(cli).unwrap();
    assert_eq!(config.warmuptime, 0);
}

#[test]
fn calibrate_implies_skip_locking() {
    let mut cli = base_cli();
    cli.calibrate_only = true;
    let config = Config::from_cli(cli).unwrap();
    assert!(config.skip_locking);
}

#[test]
fn auto_rps_seeds_a_default_rps_and_clears_warmup() {
    let mut cli = base_cli();
    cli.auto_rps = 50;
    let config = Config::from_cli(cli).unwrap();
    assert_eq!(config.auto_rps, 50);
    assert_eq!(config.warmuptime, 0);
    assert!(config.requests_per_sec > 0);
}

#[test]
fn pipe_larger_than_transfer_buffer_is_clamped() {
    let mut cli = base_cli();
    cli.pipe_test = 8 * 1024 * 1024;
    let config = Config::from_cli(cli).unwrap();
    assert_eq!(config.pipe_test, wakebench::config::PIPE_TRANSFER_BUFFER);
}

#[test]
fn bad_pin_value_is_rejected() {
    let mut cli = base_cli();
    cli.pin = Some("bogus".to_string());
    assert!(Config::from_cli(cli).is_err());
}

#[test]
fn manual_cpu_pin_parses_both_sides() {
    let mut cli = base_cli();
    cli.message_cpus = Some("0-1".to_string());
    cli.worker_cpus = Some("2-7".to_string());
    let config = Config::from_cli(cli).unwrap();
    assert_eq!(config.pin_mode, PinMode::Manual);
    assert_eq!(config.message_cpus, Some(vec![0, 1]));
    assert_eq!(config.worker_cpus, Some(vec![2, 3, 4, 5, 6, 7]));
}

#[test]
fn zero_worker_threads_spreads_across_cpus_per_messenger() {
    let mut cli = base_cli();
    cli.message_threads = 2;
    cli.worker_threads = 0;
    let config = Config::from_cli(cli).unwrap();
    assert!(config.worker_threads >= 1);
}
