//! The coordinator: spawns the messenger/worker tree, ticks once a
//! second rolling up stats and adjusting the target rate, and drives
//! shutdown. Ported from `schbench.c`'s `main` loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::clock::now_us;
use crate::config::Config;
use crate::error::{BenchError, Result};
use crate::messenger::{self, MessengerSlot};
use crate::report::{self, RollupStats};
use crate::rps::AutoRps;
use crate::state::GlobalState;
use crate::worker::WorkerSlot;

/// Scalar summary of one run, independent of the `GlobalState` lifetime --
/// handed back to `main` (and to tests) after everything else is torn down.
pub struct RunSummary {
    pub total_loop_count: u64,
    pub wakeup_samples: u64,
    pub wakeup_min: u32,
    pub wakeup_max: u32,
    pub request_samples: u64,
}

impl From<&RollupStats> for RunSummary {
    fn from(r: &RollupStats) -> Self {
        RunSummary {
            total_loop_count: r.total_loop_count,
            wakeup_samples: r.wakeup.nr_samples(),
            wakeup_min: r.wakeup.min(),
            wakeup_max: r.wakeup.max(),
            request_samples: r.request.nr_samples(),
        }
    }
}

pub fn run(config: Config) -> Result<RunSummary> {
    let num_cpus = num_cpus::get();
    let message_threads = config.message_threads;
    let worker_threads = config.worker_threads;
    let pipe_size = config.pipe_test;
    let runtime_s = config.runtime;

    let state = Arc::new(GlobalState::new(config, num_cpus));

    let messengers: Vec<Arc<MessengerSlot>> =
        (0..message_threads).map(MessengerSlot::new).map(Arc::new).collect();

    let mut worker_groups: Vec<Vec<Arc<WorkerSlot>>> = Vec::with_capacity(message_threads);
    let mut all_workers: Vec<Arc<WorkerSlot>> = Vec::with_capacity(message_threads * worker_threads);
    let mut idx = 0;
    for _ in 0..message_threads {
        let mut group = Vec::with_capacity(worker_threads);
        for _ in 0..worker_threads {
            let w = Arc::new(WorkerSlot::new(idx, pipe_size));
            idx += 1;
            all_workers.push(w.clone());
            group.push(w);
        }
        worker_groups.push(group);
    }

    let mut handles = Vec::with_capacity(message_threads);
    for (m, messenger) in messengers.iter().enumerate() {
        let (message_cpu, worker_cpuset) = pin_sets_for(&state.config, m);
        let state = state.clone();
        let messenger = messenger.clone();
        let group = worker_groups[m].clone();
        let handle = std::thread::Builder::new()
            .name(format!("wakebench-messenger-{m}"))
            .spawn(move || messenger::run_messenger(state, messenger, group, message_cpu, worker_cpuset))
            .map_err(BenchError::ThreadSpawn)?;
        handles.push(handle);
    }

    run_ticks(&state, &all_workers)?;

    // Shutdown fence: a full barrier before the one-way `stopping` write,
    // so every messenger's next `splice` is guaranteed to observe any
    // push that began before it.
    std::sync::atomic::fence(Ordering::SeqCst);
    state.stopping.store(true, Ordering::SeqCst);
    for m in &messengers {
        m.wake.post();
    }

    for h in handles {
        match h.join() {
            Ok(result) => result?,
            Err(_) => log::error!("a messenger thread panicked"),
        }
    }

    let rollup = report::rollup(&all_workers);
    let summary = RunSummary::from(&rollup);

    report::print_human(
        &rollup,
        &state.rps_stats,
        runtime_s,
        state.config.pipe_test,
        state.config.auto_rps > 0,
        state.requests_per_sec.load(Ordering::Relaxed) * state.config.message_threads as i64,
    );

    if let Some(json_file) = &state.config.json_file {
        report::write_json(
            json_file,
            state.config.jobname.as_deref(),
            &rollup,
            &state.rps_stats,
            runtime_s,
            state.config.pipe_test,
        )?;
    }

    Ok(summary)
}

/// For a given messenger index, the CPU to pin that messenger thread to
/// and the CPU set its workers should be free to run anywhere within,
/// mirroring `pin_message_cpu`/`pin_worker_cpus`'s use of
/// `message_cpus`/`worker_cpus`/`per_message_thread_cpus`.
fn pin_sets_for(config: &Config, messenger_index: usize) -> (Option<usize>, Option<Vec<usize>>) {
    if let Some(per_die) = &config.per_message_thread_cpus {
        if per_die.is_empty() {
            return (None, None);
        }
        let die = &per_die[messenger_index % per_die.len()];
        let msg_cpu = die.first().copied();
        return (msg_cpu, Some(die.clone()));
    }

    let msg_cpu = config
        .message_cpus
        .as_ref()
        .filter(|set| !set.is_empty())
        .map(|set| set[messenger_index % set.len()]);
    (msg_cpu, config.worker_cpus.clone())
}

fn run_ticks(state: &Arc<GlobalState>, workers: &[Arc<WorkerSlot>]) -> Result<()> {
    let cfg = &state.config;
    let runtime_us = cfg.runtime * 1_000_000;
    let warmup_us = cfg.warmuptime * 1_000_000;
    let interval_us = cfg.intervaltime.max(1) * 1_000_000;
    let zero_us = cfg.zerotime * 1_000_000;
    let pipe_mode = cfg.is_pipe_mode();
    let rate_mode = cfg.is_rate_mode();

    let mut auto_rps = (cfg.auto_rps > 0).then(|| AutoRps::new(cfg.auto_rps));

    let start = now_us();
    let mut warmed_up = warmup_us == 0;
    let mut last_tick_us = start;
    let mut last_loop_count = sum_loop_count(workers);
    let mut next_interval = interval_us;
    let mut next_zero = zero_us;

    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
        let now = now_us();
        let elapsed = now.saturating_sub(start);
        let done = elapsed >= runtime_us;

        if !warmed_up && !rate_mode && !pipe_mode && elapsed >= warmup_us {
            warmed_up = true;
            clear_all(workers);
            log::info!("warmup complete, stats zeroed");
        }

        if !pipe_mode {
            let loop_count = sum_loop_count(workers);
            let delta_loops = loop_count.saturating_sub(last_loop_count);
            let delta_t = now.saturating_sub(last_tick_us).max(1);
            let rps = delta_loops as f64 * 1_000_000.0 / delta_t as f64;
            last_loop_count = loop_count;

            let record_rps = state.auto_rps_target_hit.load(Ordering::SeqCst) || cfg.auto_rps == 0;
            if record_rps && rps > 0.0 {
                state.rps_stats.add_lat(rps as u32);
            }

            if elapsed >= next_interval {
                next_interval += interval_us;
                let rollup = report::rollup(workers);
                report::print_human(
                    &rollup,
                    &state.rps_stats,
                    elapsed / 1_000_000,
                    cfg.pipe_test,
                    cfg.auto_rps > 0,
                    state.requests_per_sec.load(Ordering::Relaxed) * cfg.message_threads as i64,
                );
            }
        }

        if zero_us > 0 && elapsed >= next_zero {
            next_zero += zero_us;
            clear_all(workers);
            state.rps_stats.clear();
        }

        if let Some(ctl) = auto_rps.as_mut() {
            ctl.tick(state);
        }

        last_tick_us = now;

        if done {
            break;
        }
    }

    Ok(())
}

fn sum_loop_count(workers: &[Arc<WorkerSlot>]) -> u64 {
    workers.iter().map(|w| w.loop_count.load(Ordering::Relaxed)).sum()
}

fn clear_all(workers: &[Arc<WorkerSlot>]) {
    for w in workers {
        w.clear_stats();
    }
}
