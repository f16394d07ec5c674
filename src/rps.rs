//! Closed-loop auto-RPS controller. A proportional controller with
//! deadband and damping that nudges `requests_per_sec` toward a target
//! CPU-busy percentage, ported from the original's `auto_scale_rps` in
//! `message.c`.

use std::sync::atomic::Ordering;

use crate::procfs::{self, CpuTimes};
use crate::state::GlobalState;

/// Ceiling the original never lets the integer rate cross; beyond this,
/// the multiplicative increase reverts to the prior value instead of
/// overflowing. Whether this is intentional saturation or a latent bug is
/// unclear from the original -- preserved here, not "fixed".
const MAX_RPS: i64 = (1i64 << 31) - 1;

pub struct AutoRps {
    target_pct: f64,
    prev: Option<CpuTimes>,
}

impl AutoRps {
    pub fn new(target_pct: u32) -> Self {
        AutoRps {
            target_pct: target_pct as f64,
            prev: None,
        }
    }

    /// Called once per coordinator tick. The first call only seeds the
    /// previous `/proc/stat` snapshot and does not adjust the rate.
    pub fn tick(&mut self, state: &GlobalState) {
        let Some(cur) = procfs::read_cpu_times() else {
            return;
        };
        let prev = match self.prev.replace(cur) {
            Some(p) => p,
            None => return,
        };

        let dtotal = cur.total.saturating_sub(prev.total);
        let didle = cur.idle.saturating_sub(prev.idle);
        if dtotal == 0 {
            return;
        }
        let busy = 100.0 * (1.0 - didle as f64 / dtotal as f64);

        let current = state.requests_per_sec.load(Ordering::Relaxed);
        let next = self.adjust(current, busy);
        state.requests_per_sec.store(next, Ordering::Relaxed);

        let ratio = if current != 0 {
            next as f64 / current as f64
        } else {
            1.0
        };
        if (0.95..=1.05).contains(&ratio) {
            let was_hit = state.auto_rps_target_hit.swap(true, Ordering::SeqCst);
            if !was_hit {
                state.rps_stats.clear();
            }
        }
    }

    fn adjust(&self, current: i64, busy: f64) -> i64 {
        if busy < self.target_pct {
            let mut ratio = (self.target_pct / busy.max(0.01)).min(3.0);
            if ratio > 1.0 && ratio < 1.2 {
                ratio = 1.0 + (ratio - 1.0) / 8.0;
            } else if (1.2..1.5).contains(&ratio) {
                ratio = 1.0 + (ratio - 1.0) / 4.0;
            }
            let scaled = (current as f64 * ratio).ceil();
            if scaled > MAX_RPS as f64 {
                current
            } else {
                scaled as i64
            }
        } else if busy > self.target_pct {
            let mut ratio = (self.target_pct / busy).max(0.3);
            if ratio > 0.8 && ratio < 0.9 {
                ratio = 1.0 - (1.0 - ratio) / 8.0;
            } else if (0.9..1.0).contains(&ratio) {
                ratio = 1.0 - (1.0 - ratio) / 4.0;
            }
            let scaled = (current as f64 * ratio).floor();
            if scaled <= 0.0 {
                0
            } else {
                scaled as i64
            }
        } else {
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_target_increases_rate() {
        let ctl = AutoRps::new(80);
        let next = ctl.adjust(100, 40.0);
        assert!(next > 100);
        assert!(next as f64 <= 300.0);
    }

    #[test]
    fn over_target_decreases_rate() {
        let ctl = AutoRps::new(80);
        let next = ctl.adjust(100, 95.0);
        assert!(next < 100);
    }

    #[test]
    fn at_target_holds_steady() {
        let ctl = AutoRps::new(80);
        assert_eq!(ctl.adjust(100, 80.0), 100);
    }

    #[test]
    fn near_overflow_reverts_to_prior_value() {
        let ctl = AutoRps::new(80);
        let next = ctl.adjust(MAX_RPS, 1.0);
        assert_eq!(next, MAX_RPS);
    }
}
