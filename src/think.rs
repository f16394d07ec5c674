//! Think-time: simulated CPU-bound work standing in for whatever a real
//! request handler would do. Default is a naive matrix multiply sized to
//! a configurable cache footprint, optionally serialised behind a per-CPU
//! lock so that concurrent work on the same core contends the way real
//! request handling might.

use std::sync::Mutex;

use crate::config::Config;

/// Scratch matrices for one worker's think-time computation: three
/// `matrix_size` x `matrix_size` matrices (two inputs, one output) laid
/// out contiguously, as the original's `thread_data->data` buffer was.
pub struct MatrixScratch {
    data: Vec<u64>,
    n: usize,
}

impl MatrixScratch {
    pub fn new(matrix_size: usize) -> Self {
        MatrixScratch {
            data: vec![1u64; 3 * matrix_size * matrix_size],
            n: matrix_size,
        }
    }

    fn multiply_once(&mut self) {
        let n = self.n;
        if n == 0 {
            return;
        }
        let (m1m2, m3) = self.data.split_at_mut(2 * n * n);
        let (m1, m2) = m1m2.split_at(n * n);
        for i in 0..n {
            for j in 0..n {
                let mut acc: u64 = 0;
                for k in 0..n {
                    acc = acc.wrapping_add(m1[i * n + k].wrapping_mul(m2[k * n + j]));
                }
                m3[i * n + j] = acc;
            }
        }
    }
}

/// Matrix size computed from a target cache footprint: three matrices of
/// `size*size` `u64`s should together occupy roughly `cache_footprint_kb`.
pub fn matrix_size_for_footprint(cache_footprint_kb: u64) -> usize {
    let bytes = cache_footprint_kb as f64 * 1024.0;
    let n = (bytes / 3.0 / std::mem::size_of::<u64>() as f64).sqrt();
    n as usize
}

/// One mutex per online CPU, used to serialise think-time work running on
/// that core -- a cheap way to emulate lock contention that's a function
/// of topology rather than of thread count.
pub struct PerCpuLocks {
    locks: Vec<Mutex<()>>,
}

impl PerCpuLocks {
    pub fn new(num_cpus: usize) -> Self {
        PerCpuLocks {
            locks: (0..num_cpus).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Acquire the lock for whichever CPU we're currently running on,
    /// retrying if we migrate between `sched_getcpu` and taking the lock.
    /// Returns the locked CPU index together with the guard so the caller
    /// can release by dropping it.
    fn lock_current_cpu(&self) -> (usize, std::sync::MutexGuard<'_, ()>) {
        loop {
            let cpu = current_cpu();
            let guard = match self.locks[cpu].try_lock() {
                Ok(g) => g,
                Err(_) => {
                    std::hint::spin_loop();
                    continue;
                }
            };
            if current_cpu() == cpu {
                return (cpu, guard);
            }
            // We migrated between sched_getcpu() and taking the lock; drop
            // and retry on whatever core we're on now.
            drop(guard);
        }
    }
}

fn current_cpu() -> usize {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        0
    } else {
        cpu as usize
    }
}

/// Run `operations` rounds of matrix multiply, optionally serialised by a
/// per-CPU lock (skipped when `config.skip_locking` is set, i.e. under
/// `--calibrate` or `--no-locking`).
pub fn do_work(config: &Config, locks: &PerCpuLocks, scratch: &mut MatrixScratch) {
    if config.skip_locking {
        for _ in 0..config.operations {
            scratch.multiply_once();
        }
        return;
    }
    let (_cpu, _guard) = locks.lock_current_cpu();
    for _ in 0..config.operations {
        scratch.multiply_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_translates_to_a_sane_matrix_size() {
        let n = matrix_size_for_footprint(256);
        assert!(n > 0 && n < 256);
    }

    #[test]
    fn multiply_runs_without_panicking() {
        let mut scratch = MatrixScratch::new(matrix_size_for_footprint(64));
        for _ in 0..3 {
            scratch.multiply_once();
        }
    }

    #[test]
    fn zero_size_matrix_is_a_no_op() {
        let mut scratch = MatrixScratch::new(0);
        scratch.multiply_once();
    }
}
