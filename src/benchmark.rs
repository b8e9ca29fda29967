//! Benchmark harness
//!
//! Runs a program repeatedly through an [`Executor`] under controlled
//! conditions (warm-up, cache dropping, core pinning) and aggregates wall
//! time, gas and throughput. Program faults, divergent runs and timeouts are
//! reported as an [`Outcome`], not as errors.

use std::time::Instant;

use metrics::{histogram, increment_counter};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::CacheDropper;
use crate::error::{GasForgeError, Result};
use crate::executor::{ExceptionKind, ExecutionEnv, ExecutionStats, Executor};
use crate::program::Program;
use crate::stats::{BenchmarkResults, ResultsReport};
use crate::usage::{SystemUsage, UsageCollector};

/// Where the per-call elapsed time comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimingSource {
    /// Wall time reported by the executor
    #[default]
    Executor,
    /// Elapsed time measured around each call
    Harness,
}

/// Statistic of the throughput samples used as fitness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetMetric {
    #[default]
    Mean,
    Median,
}

/// Configuration for one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BenchmarkConfig {
    /// Timed executions per program
    pub exec_count: u64,
    pub warmup: bool,
    /// Untimed executions before timing starts
    pub warmup_count: u64,
    /// Drop OS caches once before the first timed call
    pub drop_cache: bool,
    /// Drop OS caches before every timed call
    pub always_drop_cache: bool,
    /// Keep raw samples and log every call
    pub debug: bool,
    pub granularity: u64,
    /// Require identical gas and output across repeated calls
    pub check_determinism: bool,
    pub timing: TimingSource,
    pub pin_to_core: Option<usize>,
    /// Per-call executor timeout in milliseconds
    pub exec_timeout_ms: Option<u64>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            exec_count: 10,
            warmup: true,
            warmup_count: 1,
            drop_cache: false,
            always_drop_cache: false,
            debug: false,
            granularity: 1,
            check_determinism: true,
            timing: TimingSource::Executor,
            pin_to_core: None,
            exec_timeout_ms: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.exec_count == 0 {
            return Err(GasForgeError::ConfigError(
                "execCount must be at least 1".to_string(),
            ));
        }
        if self.granularity == 0 {
            return Err(GasForgeError::ConfigError(
                "granularity must be at least 1".to_string(),
            ));
        }
        // a trailing partial batch would never be committed
        if self.exec_count % self.granularity != 0 {
            return Err(GasForgeError::ConfigError(format!(
                "execCount {} is not a multiple of granularity {}",
                self.exec_count, self.granularity
            )));
        }
        if self.exec_timeout_ms == Some(0) {
            return Err(GasForgeError::ConfigError(
                "execTimeoutMs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wants_cache_drop(&self) -> bool {
        self.drop_cache || self.always_drop_cache
    }
}

/// How a benchmark run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    Completed,
    /// The program reverted, ran out of gas or hit an invalid opcode
    Faulted { kind: ExceptionKind },
    /// Repeated runs disagreed; measurements were discarded
    Nondeterministic { detail: String },
    TimedOut,
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// Result of benchmarking one program
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    /// Wall time per call, seconds
    pub time: BenchmarkResults,
    pub gas: BenchmarkResults,
    /// Gas per second per call
    pub throughput: BenchmarkResults,
    pub outcome: Outcome,
    pub usage: SystemUsage,
    pub gas_used: Option<u64>,
    pub output: Vec<u8>,
    pub block_number: Option<u64>,
}

/// One report line: time statistics at the top level, gas and throughput
/// statistics alongside
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRecord {
    #[serde(flatten)]
    pub time: ResultsReport,
    pub gas: ResultsReport,
    pub throughput: ResultsReport,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    pub usage: SystemUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl BenchmarkReport {
    fn new(config: &BenchmarkConfig, usage: SystemUsage) -> Self {
        let granularity = config.granularity;
        let keep = config.debug;
        let series = |keep: bool| {
            if keep {
                BenchmarkResults::with_samples(granularity)
            } else {
                BenchmarkResults::new(granularity)
            }
        };
        Self {
            time: series(keep),
            gas: series(keep),
            // median fitness needs the series
            throughput: series(true),
            outcome: Outcome::Completed,
            usage,
            gas_used: None,
            output: Vec::new(),
            block_number: None,
        }
    }

    /// Fitness under `metric`; `None` unless the run completed and
    /// consumed gas
    pub fn fitness(&self, metric: TargetMetric) -> Option<f64> {
        if !self.outcome.is_completed() || self.throughput.count() == 0 {
            return None;
        }
        if self.gas.mean() <= 0.0 {
            return None;
        }
        match metric {
            TargetMetric::Mean => Some(self.throughput.mean()),
            TargetMetric::Median => self.throughput.median().or(Some(self.throughput.mean())),
        }
    }

    /// Serializable form; `full` includes raw sample series
    pub fn record(&self, full: bool, program: Option<&Program>) -> BenchmarkRecord {
        BenchmarkRecord {
            time: self.time.report(full),
            gas: self.gas.report(full),
            throughput: self.throughput.report(full),
            outcome: self.outcome.clone(),
            gas_used: self.gas_used,
            usage: self.usage,
            block_number: self.block_number,
            code: program.map(Program::to_hex),
        }
    }

    fn discard_measurements(&mut self, config: &BenchmarkConfig) {
        let fresh = BenchmarkReport::new(config, self.usage);
        self.time = fresh.time;
        self.gas = fresh.gas;
        self.throughput = fresh.throughput;
    }
}

/// Repeats executions of a program and aggregates the measurements
pub struct BenchmarkHarness {
    config: BenchmarkConfig,
    cache: Option<CacheDropper>,
}

impl BenchmarkHarness {
    /// Validates the configuration and checks cache-drop privileges up front
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        config.validate()?;
        let cache = if config.wants_cache_drop() {
            Some(CacheDropper::new()?)
        } else {
            None
        };
        Ok(Self { config, cache })
    }

    /// Harness with an explicit cache dropper
    pub fn with_cache_dropper(config: BenchmarkConfig, dropper: CacheDropper) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: Some(dropper),
        })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Pin the calling thread to the configured core plus `offset` (one
    /// core per worker). Failure is logged and measurement continues unpinned.
    pub fn pin_thread(&self, offset: usize) {
        if let Some(base) = self.config.pin_to_core {
            let core_id = base + offset;
            if let Err(e) = pin_thread_to_core(core_id) {
                warn!(core_id, error = %e, "could not pin measuring thread");
            }
        }
    }

    fn drop_caches(&self, usage: &mut UsageCollector) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.drop_caches()?;
            usage.record_cache_drop();
        }
        Ok(())
    }

    /// Warm up, then time `execCount` calls of `program`
    pub fn benchmark_program(
        &self,
        executor: &mut dyn Executor,
        env: &ExecutionEnv,
        program: &Program,
    ) -> Result<BenchmarkReport> {
        let config = &self.config;
        let code = program.code();
        let mut usage = UsageCollector::start();
        let mut report = BenchmarkReport::new(config, usage.finish());
        increment_counter!("gasforge_evaluations_total");

        if config.warmup {
            for _ in 0..config.warmup_count {
                usage.record_call(true);
                match call(executor, code, env)? {
                    Call::Done(stats) if stats.exception.is_fault() => {
                        report.outcome = Outcome::Faulted {
                            kind: stats.exception,
                        };
                        return Ok(self.finish(report, &usage, program));
                    }
                    Call::Done(_) => {}
                    Call::TimedOut => {
                        report.outcome = Outcome::TimedOut;
                        return Ok(self.finish(report, &usage, program));
                    }
                }
            }
        }

        if config.drop_cache && !config.always_drop_cache {
            self.drop_caches(&mut usage)?;
        }

        let mut reference: Option<(u64, Vec<u8>)> = None;
        for i in 0..config.exec_count {
            if config.always_drop_cache {
                self.drop_caches(&mut usage)?;
            }

            let started = Instant::now();
            let result = call(executor, code, env)?;
            let elapsed = started.elapsed().as_secs_f64();
            usage.record_call(false);

            let stats = match result {
                Call::Done(stats) => stats,
                Call::TimedOut => {
                    report.outcome = Outcome::TimedOut;
                    break;
                }
            };
            if stats.exception.is_fault() {
                report.outcome = Outcome::Faulted {
                    kind: stats.exception,
                };
                break;
            }

            match &reference {
                None => reference = Some((stats.gas_used, stats.output.clone())),
                Some((gas, output)) if config.check_determinism => {
                    if let Some(detail) = divergence(*gas, output, &stats) {
                        report.outcome = Outcome::Nondeterministic { detail };
                        report.discard_measurements(config);
                        break;
                    }
                }
                Some(_) => {}
            }

            let time = match config.timing {
                TimingSource::Executor => stats.wall_time,
                TimingSource::Harness => elapsed,
            };
            if config.debug {
                debug!(
                    call = i,
                    gas = stats.gas_used,
                    time,
                    size = program.size(),
                    "timed execution"
                );
            }
            report.time.add_measurement(time);
            report.gas.add_measurement(stats.gas_used as f64);
            if time > 0.0 {
                report.throughput.add_measurement(stats.gas_used as f64 / time);
            } else {
                debug!(call = i, "zero elapsed time, throughput sample skipped");
            }
        }

        if let Some((gas, output)) = reference {
            report.gas_used = Some(gas);
            report.output = output;
        }
        Ok(self.finish(report, &usage, program))
    }

    fn finish(
        &self,
        mut report: BenchmarkReport,
        usage: &UsageCollector,
        program: &Program,
    ) -> BenchmarkReport {
        report.usage = usage.finish();
        histogram!("gasforge_evaluation_seconds", report.usage.harness_time);
        match &report.outcome {
            Outcome::Completed => {}
            Outcome::Faulted { kind } => {
                increment_counter!("gasforge_execution_faults_total", "kind" => kind.as_str());
                debug!(kind = %kind, size = program.size(), "program faulted");
            }
            Outcome::Nondeterministic { detail } => {
                increment_counter!("gasforge_nondeterminism_total");
                warn!(
                    code = %program.to_hex(),
                    detail = %detail,
                    "repeated executions diverged, measurements discarded"
                );
            }
            Outcome::TimedOut => {
                increment_counter!("gasforge_timeouts_total");
                warn!(size = program.size(), "executor call timed out");
            }
        }
        report
    }

    /// Benchmark every program with the same protocol, tagging each report
    /// with `block_number`
    pub fn benchmark_batch(
        &self,
        executor: &mut dyn Executor,
        env: &ExecutionEnv,
        programs: &[Program],
        block_number: Option<u64>,
    ) -> Result<Vec<BenchmarkReport>> {
        programs
            .iter()
            .map(|program| {
                let mut report = self.benchmark_program(executor, env, program)?;
                report.block_number = block_number;
                Ok(report)
            })
            .collect()
    }
}

/// Counts diverging reports over a batch run. Re-scoring known programs
/// should be deterministic, so any divergence fails the run.
#[derive(Debug, Default)]
pub struct DivergenceTally {
    programs: usize,
    diverged: usize,
    first: Option<String>,
}

impl DivergenceTally {
    pub fn observe(&mut self, report: &BenchmarkReport) {
        self.programs += 1;
        if let Outcome::Nondeterministic { detail } = &report.outcome {
            self.diverged += 1;
            if self.first.is_none() {
                self.first = Some(detail.clone());
            }
        }
    }

    pub fn diverged(&self) -> usize {
        self.diverged
    }

    /// Programs seen, or `NondeterminismError` if any diverged
    pub fn finish(self) -> Result<usize> {
        match self.first {
            None => Ok(self.programs),
            Some(first) => Err(GasForgeError::NondeterminismError(format!(
                "{} of {} programs diverged, first: {}",
                self.diverged, self.programs, first
            ))),
        }
    }
}

enum Call {
    Done(ExecutionStats),
    TimedOut,
}

fn call(executor: &mut dyn Executor, code: &[u8], env: &ExecutionEnv) -> Result<Call> {
    match executor.execute(code, env) {
        Ok(stats) => Ok(Call::Done(stats)),
        Err(GasForgeError::Timeout(_)) => Ok(Call::TimedOut),
        Err(e) => Err(e),
    }
}

fn divergence(gas: u64, output: &[u8], stats: &ExecutionStats) -> Option<String> {
    if stats.gas_used != gas {
        return Some(format!(
            "obtained different gas used: {} != {}",
            gas, stats.gas_used
        ));
    }
    if stats.output != output {
        return Some(format!(
            "obtained different output: 0x{} != 0x{}",
            hex::encode(output),
            hex::encode(&stats.output)
        ));
    }
    None
}

/// Pin the current thread to a specific CPU core
#[cfg(target_os = "linux")]
pub fn pin_thread_to_core(core_id: usize) -> Result<()> {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id, &mut cpuset);

        let pid = 0; // 0 means current thread
        let ret = libc::sched_setaffinity(pid, std::mem::size_of::<libc::cpu_set_t>(), &cpuset);

        if ret != 0 {
            return Err(GasForgeError::ConfigError(format!(
                "Failed to pin thread to core {}: {}",
                core_id,
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_thread_to_core(core_id: usize) -> Result<()> {
    Err(GasForgeError::ConfigError(format!(
        "pinning to core {} is only supported on Linux",
        core_id
    )))
}
