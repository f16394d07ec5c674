//! Messenger thread: fans requests out to (or replies to readiness from)
//! a group of workers. Ping-pong mode drains the ready-stack and wakes
//! everyone on it each round; rate mode is a fixed-rate producer that
//! pushes requests directly onto workers' own stacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::now_us;
use crate::error::{BenchError, Result};
use crate::stack::IntrusiveStack;
use crate::state::GlobalState;
use crate::wake::WakeFlag;
use crate::worker::{Request, WorkerSlot, PENDING_BATCH};

pub struct MessengerSlot {
    pub index: usize,
    pub wake: WakeFlag,
    pub ready: IntrusiveStack<WorkerSlot>,
    cursor: AtomicUsize,
}

impl MessengerSlot {
    pub fn new(index: usize) -> Self {
        MessengerSlot {
            index,
            wake: WakeFlag::new(),
            ready: IntrusiveStack::new(),
            cursor: AtomicUsize::new(0),
        }
    }
}

/// Spawn this messenger's workers, run its loop (ping-pong or rate, per
/// `state.config`), then post and join the workers before returning.
pub fn run_messenger(
    state: Arc<GlobalState>,
    messenger: Arc<MessengerSlot>,
    workers: Vec<Arc<WorkerSlot>>,
    message_cpu: Option<usize>,
    worker_cpuset: Option<Vec<usize>>,
) -> Result<()> {
    if let Some(cpu) = message_cpu {
        if let Err(e) = crate::affinity::pin_to_cpu(cpu) {
            log::warn!("messenger {}: failed to set CPU affinity: {e}", messenger.index);
        }
    }

    let mut handles = Vec::with_capacity(workers.len());
    for w in &workers {
        let state = state.clone();
        let w = w.clone();
        let messenger = messenger.clone();
        let cpuset = worker_cpuset.clone();
        let handle = std::thread::Builder::new()
            .name(format!("wakebench-worker-{}", w.index))
            .spawn(move || crate::worker::worker_thread(state, w, messenger, cpuset))
            .map_err(BenchError::ThreadSpawn)?;
        handles.push(handle);
    }

    if state.config.is_rate_mode() {
        run_rate_loop(&state, &messenger, &workers);
    } else {
        run_ping_pong_loop(&state, &messenger);
        for w in &workers {
            w.wake.post();
        }
    }

    for h in handles {
        let _ = h.join();
    }
    Ok(())
}

fn run_ping_pong_loop(state: &GlobalState, messenger: &MessengerSlot) {
    let pipe_mode = state.config.is_pipe_mode();
    loop {
        messenger.wake.arm();

        wake_ready_batch(messenger, pipe_mode);

        if state.stopping.load(Ordering::SeqCst) {
            // Drain once more: anyone who pushed onto the ready-stack
            // after our splice above but before observing `stopping`
            // must still be woken.
            wake_ready_batch(messenger, pipe_mode);
            break;
        }

        messenger.wake.wait(None);
    }
}

/// Splice the ready-stack, stamp a shared `now` across the whole batch
/// (deliberate: it lets a slow waker show up as inflated latency for the
/// later workers in the batch), and post each one.
fn wake_ready_batch(messenger: &MessengerSlot, pipe_mode: bool) {
    let mut list = messenger.ready.splice();
    let now = now_us();
    while !list.is_null() {
        let w = unsafe { &*list };
        let next = w.ready_next();
        if pipe_mode {
            stamp_pipe_wake(w);
            w.wake_time_us.store(now_us(), Ordering::SeqCst);
        } else {
            w.wake_time_us.store(now, Ordering::SeqCst);
        }
        w.wake.post();
        list = next;
    }
}

fn stamp_pipe_wake(w: &WorkerSlot) {
    let mut page = w.pipe_page.lock().unwrap();
    for b in page.iter_mut() {
        *b = 0xAA;
    }
}

fn run_rate_loop(state: &GlobalState, messenger: &MessengerSlot, workers: &[Arc<WorkerSlot>]) {
    loop {
        if state.stopping.load(Ordering::SeqCst) {
            break;
        }

        let start = now_us();
        let target = state.requests_per_sec.load(Ordering::Relaxed).max(0) as u64;

        for _ in 0..target {
            if state.stopping.load(Ordering::SeqCst) {
                break;
            }

            let idx = messenger.cursor.fetch_add(1, Ordering::Relaxed) % workers.len();
            let w = &workers[idx];

            if w.pending.load(Ordering::SeqCst) > PENDING_BATCH {
                std::sync::atomic::fence(Ordering::SeqCst);
                if w.pending.load(Ordering::SeqCst) > PENDING_BATCH {
                    std::thread::sleep(Duration::from_micros(100));
                    continue;
                }
            }

            w.pending.fetch_add(1, Ordering::SeqCst);
            w.push_request(Box::new(Request::new()));
            w.wake_time_us.store(now_us(), Ordering::SeqCst);
            w.wake.post();
        }

        let elapsed = now_us().saturating_sub(start);
        if elapsed < 1_000_000 {
            let mut remaining = 1_000_000 - elapsed;
            while remaining > 0 && !state.stopping.load(Ordering::SeqCst) {
                let step = remaining.min(50_000);
                std::thread::sleep(Duration::from_micros(step));
                remaining = remaining.saturating_sub(step);
            }
        }

        if state.stopping.load(Ordering::SeqCst) {
            for w in workers {
                w.wake.post();
            }
            break;
        }
    }
}
