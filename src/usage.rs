//! Per-evaluation instrumentation context.
//!
//! A [`UsageCollector`] is created for every benchmark run and owned by it, so
//! concurrent evaluations never share counters.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemUsage {
    /// Wall time spent inside the harness, in seconds
    pub harness_time: f64,
    /// CPU time of the measuring thread, in seconds
    pub user_time: f64,
    pub system_time: f64,
    pub executor_calls: u64,
    pub warmup_calls: u64,
    pub cache_drops: u64,
}

pub struct UsageCollector {
    started: Instant,
    start_cpu: (Duration, Duration),
    executor_calls: u64,
    warmup_calls: u64,
    cache_drops: u64,
}

impl UsageCollector {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            start_cpu: thread_cpu_times(),
            executor_calls: 0,
            warmup_calls: 0,
            cache_drops: 0,
        }
    }

    pub fn record_call(&mut self, warmup: bool) {
        self.executor_calls += 1;
        if warmup {
            self.warmup_calls += 1;
        }
    }

    pub fn record_cache_drop(&mut self) {
        self.cache_drops += 1;
    }

    pub fn finish(&self) -> SystemUsage {
        let (user, system) = thread_cpu_times();
        SystemUsage {
            harness_time: self.started.elapsed().as_secs_f64(),
            user_time: user.saturating_sub(self.start_cpu.0).as_secs_f64(),
            system_time: system.saturating_sub(self.start_cpu.1).as_secs_f64(),
            executor_calls: self.executor_calls,
            warmup_calls: self.warmup_calls,
            cache_drops: self.cache_drops,
        }
    }
}

#[cfg(target_os = "linux")]
const RUSAGE_WHO: libc::c_int = libc::RUSAGE_THREAD;
#[cfg(not(target_os = "linux"))]
const RUSAGE_WHO: libc::c_int = libc::RUSAGE_SELF;

/// (user, system) CPU time; zero if `getrusage` fails
fn thread_cpu_times() -> (Duration, Duration) {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(RUSAGE_WHO, &mut usage) };
    if ret != 0 {
        return (Duration::ZERO, Duration::ZERO);
    }
    (timeval(usage.ru_utime), timeval(usage.ru_stime))
}

fn timeval(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hint::black_box;

    #[test]
    fn test_counts_calls() {
        let mut usage = UsageCollector::start();
        usage.record_call(true);
        usage.record_call(false);
        usage.record_call(false);
        usage.record_cache_drop();
        let stat = usage.finish();
        assert_eq!(stat.executor_calls, 3);
        assert_eq!(stat.warmup_calls, 1);
        assert_eq!(stat.cache_drops, 1);
    }

    #[test]
    fn test_times_are_non_negative() {
        let usage = UsageCollector::start();
        let mut sum = 0u64;
        for i in 0..100_000u64 {
            sum = sum.wrapping_add(black_box(i));
        }
        black_box(sum);
        let stat = usage.finish();
        assert!(stat.harness_time > 0.0);
        assert!(stat.user_time >= 0.0);
        assert!(stat.system_time >= 0.0);
    }
}
