//! Instruction-level profiler.
//!
//! [`InstructionStats`] is an [`ExecutionTracer`]: attached to one traced
//! execution it counts instructions (precompile calls separately), storage
//! reads and writes, contract creations and self-destructs.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use serde::Serialize;

use crate::error::Result;
use crate::executor::{ExceptionKind, ExecutionEnv, ExecutionStats, ExecutionTracer, Executor};
use crate::instruction::{ExtendedInstruction, Instruction};
use crate::program::Program;
use crate::stats::{BenchmarkResultsMap, ResultsMapReport};

#[derive(Debug, Clone, Default)]
struct StoreKeyStats {
    /// Latched on the first write
    initial_value: Option<U256>,
    new_value: U256,
    changes_count: u64,
    writes_count: u64,
    reads_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct InstructionStats {
    changes: BTreeMap<U256, StoreKeyStats>,
    create_calls: Vec<U256>,
    suicide_calls_count: u64,
    instruction_counts: BTreeMap<ExtendedInstruction, u64>,
    timings: Option<BenchmarkResultsMap<ExtendedInstruction>>,
}

/// Flat counters plus the per-instruction call histogram
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileReport {
    /// Writes that changed the slot's current value
    #[serde(rename = "storage.changesCount")]
    pub changes_count: u64,
    /// Slots whose final value differs from the latched original
    #[serde(rename = "storage.changedCells")]
    pub changed_cells: u64,
    #[serde(rename = "storage.writesCount")]
    pub writes_count: u64,
    #[serde(rename = "storage.readsCount")]
    pub reads_count: u64,
    /// Net slots that went zero to non-zero minus those that went back
    #[serde(rename = "storage.allocated")]
    pub allocated: i64,
    #[serde(rename = "contracts.creationCount")]
    pub creation_count: u64,
    #[serde(rename = "contracts.creationSize")]
    pub creation_size: u64,
    #[serde(rename = "suicideCount")]
    pub suicide_count: u64,
    pub calls: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<ResultsMapReport>,
}

impl InstructionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also aggregate per-instruction step durations when the executor
    /// reports them
    pub fn with_timings(granularity: u64) -> Self {
        Self {
            timings: Some(BenchmarkResultsMap::new(granularity)),
            ..Self::default()
        }
    }

    pub fn record_write(&mut self, key: U256, original: U256, current: U256, new: U256) {
        let stats = self.changes.entry(key).or_default();
        if stats.initial_value.is_none() {
            stats.initial_value = Some(original);
        }
        stats.new_value = new;
        stats.writes_count += 1;
        if current != new {
            stats.changes_count += 1;
        }
    }

    pub fn record_read(&mut self, key: U256) {
        self.changes.entry(key).or_default().reads_count += 1;
    }

    pub fn record_create(&mut self, size: U256) {
        self.create_calls.push(size);
    }

    pub fn record_suicide(&mut self) {
        self.suicide_calls_count += 1;
    }

    pub fn record_instruction(&mut self, instruction: ExtendedInstruction) {
        *self.instruction_counts.entry(instruction).or_insert(0) += 1;
    }

    pub fn calls(&self, instruction: ExtendedInstruction) -> u64 {
        self.instruction_counts
            .get(&instruction)
            .copied()
            .unwrap_or(0)
    }

    pub fn report(&self) -> ProfileReport {
        let mut report = ProfileReport {
            changes_count: 0,
            changed_cells: 0,
            writes_count: 0,
            reads_count: 0,
            allocated: 0,
            creation_count: self.create_calls.len() as u64,
            creation_size: self
                .create_calls
                .iter()
                .map(|size| u64::try_from(*size).unwrap_or(u64::MAX))
                .fold(0u64, u64::saturating_add),
            suicide_count: self.suicide_calls_count,
            calls: self
                .instruction_counts
                .iter()
                .map(|(instruction, count)| (instruction.name().to_string(), *count))
                .collect(),
            timings: self.timings.as_ref().map(|timings| timings.report(false)),
        };

        for stats in self.changes.values() {
            report.changes_count += stats.changes_count;
            report.writes_count += stats.writes_count;
            report.reads_count += stats.reads_count;
            // read-only slots never latch a value
            let Some(initial) = stats.initial_value else {
                continue;
            };
            if initial != stats.new_value {
                report.changed_cells += 1;
            }
            if initial.is_zero() && !stats.new_value.is_zero() {
                report.allocated += 1;
            } else if !initial.is_zero() && stats.new_value.is_zero() {
                report.allocated -= 1;
            }
        }
        report
    }
}

impl ExecutionTracer for InstructionStats {
    fn on_step(&mut self, instruction: Instruction, stack: &[U256], elapsed_ns: Option<u64>) {
        let extended = ExtendedInstruction::classify(instruction, stack);
        self.record_instruction(extended);
        if let (Some(timings), Some(ns)) = (self.timings.as_mut(), elapsed_ns) {
            timings.add_measurement(&extended, ns as f64);
        }
    }

    fn on_storage_read(&mut self, key: U256) {
        self.record_read(key);
    }

    fn on_storage_write(&mut self, key: U256, original: U256, current: U256, new: U256) {
        self.record_write(key, original, current, new);
    }

    fn on_create(&mut self, size: U256) {
        self.record_create(size);
    }

    fn on_selfdestruct(&mut self) {
        self.record_suicide();
    }
}

/// One traced execution and what it did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub code: String,
    pub gas_used: u64,
    pub wall_time_seconds: f64,
    pub exception: ExceptionKind,
    pub output: String,
    pub profile: ProfileReport,
}

/// Run `program` once under the profiler
pub fn profile_program(
    executor: &mut dyn Executor,
    env: &ExecutionEnv,
    program: &Program,
) -> Result<Profile> {
    let mut stats = InstructionStats::with_timings(1);
    let ExecutionStats {
        gas_used,
        wall_time,
        output,
        exception,
    } = executor.execute_traced(program.code(), env, &mut stats)?;
    Ok(Profile {
        code: program.to_hex(),
        gas_used,
        wall_time_seconds: wall_time,
        exception,
        output: hex::encode(output),
        profile: stats.report(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(value: u64) -> U256 {
        U256::from(value)
    }

    fn op(name: &str) -> Instruction {
        Instruction::from_name(name).unwrap()
    }

    #[test]
    fn test_record_instruction() {
        let mut stats = InstructionStats::new();
        stats.record_instruction(op("ADD").into());
        stats.record_instruction(op("ADD").into());
        stats.record_instruction(op("SUB").into());
        let report = stats.report();
        assert_eq!(report.calls.len(), 2);
        assert_eq!(report.calls["ADD"], 2);
        assert_eq!(report.calls["SUB"], 1);
    }

    #[test]
    fn test_record_read() {
        let mut stats = InstructionStats::new();
        stats.record_read(w(1));
        stats.record_read(w(2));
        stats.record_read(w(1));
        let report = stats.report();
        assert_eq!(report.reads_count, 3);
        assert_eq!(report.writes_count, 0);
        assert_eq!(report.allocated, 0);
    }

    #[test]
    fn test_record_write() {
        let mut stats = InstructionStats::new();
        stats.record_write(w(1), w(2), w(2), w(4));
        stats.record_write(w(1), w(2), w(4), w(4));
        stats.record_write(w(1), w(2), w(4), w(8));
        stats.record_write(w(2), w(0), w(0), w(4));
        let report = stats.report();
        assert_eq!(report.writes_count, 4);
        assert_eq!(report.changes_count, 3);
        assert_eq!(report.allocated, 1);
    }

    #[test]
    fn test_three_write_accounting() {
        let mut stats = InstructionStats::new();
        stats.record_write(w(1), w(2), w(2), w(4));
        stats.record_write(w(1), w(2), w(4), w(8));
        stats.record_write(w(2), w(0), w(0), w(4));
        stats.record_read(w(1));
        let report = stats.report();
        assert_eq!(report.writes_count, 3);
        assert_eq!(report.reads_count, 1);
        assert_eq!(report.changed_cells, 2);
        assert_eq!(report.changes_count, 3);
        assert_eq!(report.allocated, 1);
    }

    #[test]
    fn test_allocated_goes_negative() {
        let mut stats = InstructionStats::new();
        stats.record_write(w(1), w(5), w(5), w(0));
        stats.record_write(w(2), w(7), w(7), w(0));
        // back to the original value: no net change
        stats.record_write(w(3), w(0), w(0), w(1));
        stats.record_write(w(3), w(0), w(1), w(0));
        let report = stats.report();
        assert_eq!(report.allocated, -2);
        assert_eq!(report.changed_cells, 2);
    }

    #[test]
    fn test_create_and_suicide() {
        let mut stats = InstructionStats::new();
        stats.record_create(w(100));
        stats.record_create(w(24));
        stats.record_suicide();
        let report = stats.report();
        assert_eq!(report.creation_count, 2);
        assert_eq!(report.creation_size, 124);
        assert_eq!(report.suicide_count, 1);
    }

    #[test]
    fn test_tracer_classifies_precompile_calls() {
        let mut stats = InstructionStats::with_timings(1);
        let call = Instruction::CALL;
        // bottom .. top: the address sits second from the top
        stats.on_step(call, &[w(0), w(2), w(5000)], Some(40));
        stats.on_step(call, &[w(3), w(5000)], Some(60));
        stats.on_step(call, &[w(7), w(5000)], None);
        stats.on_step(call, &[w(1)], None);
        assert_eq!(stats.calls(ExtendedInstruction::PrecompiledSha256), 1);
        assert_eq!(stats.calls(ExtendedInstruction::PrecompiledRipemd160), 1);
        assert_eq!(stats.calls(ExtendedInstruction::Base(call)), 2);

        let report = stats.report();
        assert_eq!(report.calls["PRECOMPILED_SHA256"], 1);
        let timings = report.timings.unwrap();
        assert_eq!(timings.total_count, 2);
        assert_eq!(timings.stats["PRECOMPILED_RIPEMD160"].mean, 60.0);
    }

    #[test]
    fn test_reports_with_timings_compare_equal() {
        let run = || {
            let mut stats = InstructionStats::with_timings(1);
            stats.on_step(op("ADD"), &[], Some(12));
            stats.on_step(op("ADD"), &[], Some(18));
            stats.report()
        };
        assert_eq!(run(), run());
        let mut other = InstructionStats::with_timings(1);
        other.on_step(op("ADD"), &[], Some(99));
        assert_ne!(run(), other.report());
    }

    #[test]
    fn test_report_keys() {
        let value = serde_json::to_value(InstructionStats::new().report()).unwrap();
        assert!(value.get("storage.changesCount").is_some());
        assert!(value.get("storage.allocated").is_some());
        assert!(value.get("contracts.creationSize").is_some());
        assert!(value.get("timings").is_none());
    }

    struct TracingExecutor;

    impl Executor for TracingExecutor {
        fn execute(&mut self, _code: &[u8], _env: &ExecutionEnv) -> Result<ExecutionStats> {
            Ok(ExecutionStats {
                gas_used: 21_006,
                wall_time: 0.001,
                output: vec![0xab],
                exception: ExceptionKind::None,
            })
        }

        fn execute_traced(
            &mut self,
            code: &[u8],
            env: &ExecutionEnv,
            tracer: &mut dyn ExecutionTracer,
        ) -> Result<ExecutionStats> {
            tracer.on_step(Instruction::PUSH1, &[], Some(10));
            tracer.on_step(Instruction::SLOAD, &[w(1)], Some(800));
            tracer.on_storage_read(w(1));
            self.execute(code, env)
        }
    }

    #[test]
    fn test_profile_program() {
        let program = Program::from_hex("600154").unwrap();
        let profile =
            profile_program(&mut TracingExecutor, &ExecutionEnv::default(), &program).unwrap();
        assert_eq!(profile.code, "600154");
        assert_eq!(profile.gas_used, 21_006);
        assert_eq!(profile.output, "ab");
        assert_eq!(profile.profile.calls["SLOAD"], 1);
        assert_eq!(profile.profile.reads_count, 1);
    }
}
