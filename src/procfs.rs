//! Out-of-band host measurements: the aggregate CPU-busy line the
//! auto-RPS controller reads from `/proc/stat`, and per-thread scheduling
//! delay from `/proc/<tid>/schedstat`.

use std::fs;

/// Aggregate CPU time snapshot from `/proc/stat`'s `cpu` line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Parse the first ten integers of the `cpu` aggregate line; the 4th is
/// idle time, the sum of all ten is total time.
pub fn read_cpu_times() -> Option<CpuTimes> {
    let content = fs::read_to_string("/proc/stat").ok()?;
    let line = content.lines().next()?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .take(10)
        .collect();
    if fields.len() < 4 {
        return None;
    }
    Some(CpuTimes {
        idle: fields[3],
        total: fields.iter().sum(),
    })
}

/// Per-thread scheduling delay in nanoseconds, averaged over the thread's
/// lifetime (`runqueue_ns / pcount`). A missing file -- the thread may
/// already have exited by final-report time, or the kernel may not expose
/// schedstat at all -- reports 0 rather than failing.
pub fn read_sched_delay_ns(tid: i32) -> u64 {
    let path = format!("/proc/{tid}/schedstat");
    let Ok(content) = fs::read_to_string(&path) else {
        return 0;
    };
    let mut fields = content.split_whitespace();
    let parse_next = |fields: &mut std::str::SplitWhitespace| -> Option<u64> {
        fields.next()?.parse().ok()
    };
    let Some(_running_ns) = parse_next(&mut fields) else {
        return 0;
    };
    let Some(runqueue_ns) = parse_next(&mut fields) else {
        return 0;
    };
    let Some(pcount) = parse_next(&mut fields) else {
        return 0;
    };
    if pcount == 0 {
        return 0;
    }
    runqueue_ns / pcount
}

/// The kernel thread id of the calling thread (distinct from the
/// pthread/`std::thread` handle), needed to address `/proc/<tid>/schedstat`.
pub fn current_tid() -> i32 {
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schedstat_reports_zero() {
        assert_eq!(read_sched_delay_ns(i32::MAX), 0);
    }

    #[test]
    fn current_tid_is_positive() {
        assert!(current_tid() > 0);
    }
}
