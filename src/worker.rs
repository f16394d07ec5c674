//! Worker thread: the unit of work. Each worker round-trips with its
//! messenger in ping-pong mode, or drains its own request-stack in rate
//! mode, performing one think-time computation per message.

use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::now_us;
use crate::messenger::MessengerSlot;
use crate::procfs;
use crate::stack::{IntrusiveStack, StackNode};
use crate::stats::Stats;
use crate::state::GlobalState;
use crate::think::{self, MatrixScratch};
use crate::wake::WakeFlag;

/// Batch threshold above which a rate-mode producer backs off instead of
/// enqueueing another request on a worker (`PENDING_BATCH` in the original).
pub const PENDING_BATCH: u32 = 128;

/// A single enqueued unit of work: a stamped creation time and an
/// intrusive link. Heap-allocated by the rate-mode producer at enqueue
/// time; ownership passes to whichever worker pops it, and it is dropped
/// once serviced.
pub struct Request {
    pub created_us: u64,
    next: AtomicPtr<Request>,
}

impl Request {
    pub fn new() -> Self {
        Request {
            created_us: now_us(),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl StackNode for Request {
    fn next_link(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

/// One worker's record: wake flag, request-stack, per-thread stats, and
/// scratch state the coordinator's flat slab owns for the lifetime of the
/// run (the original's `ThreadRec`).
pub struct WorkerSlot {
    pub index: usize,
    pub wake: WakeFlag,
    ready_next: AtomicPtr<WorkerSlot>,
    requests: IntrusiveStack<Request>,
    pub pending: AtomicU32,
    pub wake_time_us: AtomicU64,
    pub tid: AtomicI32,
    pub wakeup_stats: Stats,
    pub request_stats: Stats,
    pub loop_count: AtomicU64,
    pub runtime_us: AtomicU64,
    /// Written by the messenger on pipe-mode wakes, sized to `--pipe`.
    pub pipe_page: Mutex<Vec<u8>>,
}

impl StackNode for WorkerSlot {
    fn next_link(&self) -> &AtomicPtr<Self> {
        &self.ready_next
    }
}

impl WorkerSlot {
    pub fn new(index: usize, pipe_size: u64) -> Self {
        WorkerSlot {
            index,
            wake: WakeFlag::new(),
            ready_next: AtomicPtr::new(std::ptr::null_mut()),
            requests: IntrusiveStack::new(),
            pending: AtomicU32::new(0),
            wake_time_us: AtomicU64::new(0),
            tid: AtomicI32::new(0),
            wakeup_stats: Stats::new(),
            request_stats: Stats::new(),
            loop_count: AtomicU64::new(0),
            runtime_us: AtomicU64::new(0),
            pipe_page: Mutex::new(vec![0u8; pipe_size as usize]),
        }
    }

    /// Push a request onto this worker's stack; the worker takes ownership.
    pub fn push_request(&self, req: Box<Request>) {
        let raw = Box::into_raw(req);
        unsafe { self.requests.push(raw) };
    }

    fn splice_requests(&self) -> *mut Request {
        unsafe { self.requests.splice_reversed() }
    }

    /// Load this worker's ready-stack link, for a messenger walking a
    /// spliced batch.
    pub(crate) fn ready_next(&self) -> *mut WorkerSlot {
        self.ready_next.load(Ordering::Relaxed)
    }

    pub fn clear_stats(&self) {
        self.wakeup_stats.clear();
        self.request_stats.clear();
    }
}

/// What `msg_and_wait` handed back this round.
enum WorkBatch {
    /// Ping-pong mode: exactly one round-trip happened; there is no
    /// discrete `Request` object to iterate.
    PingPong,
    /// Rate mode: zero or more enqueued requests, oldest first.
    Requests(*mut Request),
}

fn msg_and_wait(
    state: &GlobalState,
    worker: &WorkerSlot,
    messenger: &MessengerSlot,
    rate_mode: bool,
    pipe_mode: bool,
) -> WorkBatch {
    if pipe_mode {
        let mut page = worker.pipe_page.lock().unwrap();
        for b in page.iter_mut() {
            *b = 2;
        }
    }

    worker.wake.arm();
    let wake_time = now_us();
    worker.wake_time_us.store(wake_time, Ordering::SeqCst);

    if rate_mode {
        worker.pending.store(0, Ordering::SeqCst);
        let list = worker.splice_requests();
        if !list.is_null() {
            worker.wake.post();
            return WorkBatch::Requests(list);
        }
    } else {
        unsafe { messenger.ready.push(worker as *const WorkerSlot as *mut WorkerSlot) };
        messenger.wake.post();
    }

    if !state.stopping.load(Ordering::SeqCst) {
        worker.wake.wait(None);
    }

    let delta = now_us().saturating_sub(worker.wake_time_us.load(Ordering::SeqCst));
    if delta > 0 {
        worker.wakeup_stats.add_lat(delta as u32);
    }

    if rate_mode {
        WorkBatch::Requests(worker.splice_requests())
    } else {
        WorkBatch::PingPong
    }
}

/// Main loop run on the worker's own OS thread.
pub fn worker_thread(
    state: Arc<GlobalState>,
    worker: Arc<WorkerSlot>,
    messenger: Arc<MessengerSlot>,
    cpuset: Option<Vec<usize>>,
) {
    worker.tid.store(procfs::current_tid(), Ordering::Relaxed);

    if let Some(cpus) = &cpuset {
        if let Err(e) = crate::affinity::pin_to_cpuset(cpus) {
            log::warn!("worker {}: failed to set CPU affinity: {e}", worker.index);
        }
    }

    let rate_mode = state.config.is_rate_mode();
    let pipe_mode = state.config.is_pipe_mode();
    let mut scratch = MatrixScratch::new(state.config.matrix_size);
    let thread_start = now_us();

    loop {
        if state.stopping.load(Ordering::SeqCst) {
            break;
        }

        match msg_and_wait(&state, &worker, &messenger, rate_mode, pipe_mode) {
            WorkBatch::PingPong => {
                service_one(&state, &worker, &mut scratch, thread_start, pipe_mode);
            }
            WorkBatch::Requests(list) => {
                if list.is_null() {
                    // Spurious wake during shutdown with nothing queued.
                    continue;
                }
                let mut cur = list;
                while !cur.is_null() {
                    let req = unsafe { Box::from_raw(cur) };
                    cur = req.next_link().load(Ordering::Relaxed);
                    drop(req);
                    service_one(&state, &worker, &mut scratch, thread_start, pipe_mode);
                }
            }
        }
    }
}

fn service_one(
    state: &GlobalState,
    worker: &WorkerSlot,
    scratch: &mut MatrixScratch,
    thread_start: u64,
    pipe_mode: bool,
) {
    let work_start = if pipe_mode {
        // The byte-copy simulation already ran inline on the wake path
        // (see messenger::stamp_pipe_wake); nothing left to do here.
        now_us()
    } else if state.config.calibrate_only {
        std::thread::sleep(Duration::from_micros(state.config.sleep_usec));
        let start = now_us();
        think::do_work(&state.config, &state.per_cpu_locks, scratch);
        start
    } else {
        let start = now_us();
        std::thread::sleep(Duration::from_micros(state.config.sleep_usec));
        think::do_work(&state.config, &state.per_cpu_locks, scratch);
        start
    };

    worker.loop_count.fetch_add(1, Ordering::Relaxed);
    let now = now_us();
    worker
        .runtime_us
        .store(now.saturating_sub(thread_start), Ordering::Relaxed);

    let delta = now.saturating_sub(work_start);
    if delta > 0 {
        worker.request_stats.add_lat(delta as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_a_worker_stack() {
        let worker = WorkerSlot::new(0, 0);
        worker.push_request(Box::new(Request::new()));
        worker.push_request(Box::new(Request::new()));
        let list = worker.splice_requests();
        assert!(!list.is_null());
        let mut count = 0;
        let mut cur = list;
        while !cur.is_null() {
            let req = unsafe { Box::from_raw(cur) };
            cur = req.next_link().load(Ordering::Relaxed);
            count += 1;
        }
        assert_eq!(count, 2);
        assert!(worker.splice_requests().is_null());
    }
}
