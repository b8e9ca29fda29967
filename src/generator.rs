//! Program generation and mutation operators.
//!
//! Instructions are sampled by weight from the metadata table while a
//! simulated operand-stack depth is tracked, so generated code does not
//! underflow on its first instructions. Sizes are counted in instructions,
//! argument PUSHes included.

use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::prelude::*;

use crate::error::{GasForgeError, Result};
use crate::instruction::Instruction;
use crate::metadata::{InstructionMeta, InstructionMetadata};
use crate::program::{Op, Program};

/// EVM operand stack limit
pub const STACK_LIMIT: usize = 1024;

/// Random draws before falling back to an exhaustive filtered draw
const MAX_ATTEMPTS: usize = 16;

/// Types of point edits applied by [`ProgramGenerator::mutate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MutationType {
    /// Replace one instruction with a freshly sampled one
    Replace,
    /// Insert a freshly sampled instruction
    Insert,
    /// Delete one instruction
    Delete,
}

impl MutationType {
    pub fn all() -> &'static [MutationType] {
        &[
            MutationType::Replace,
            MutationType::Insert,
            MutationType::Delete,
        ]
    }

    pub fn random<R: Rng>(rng: &mut R) -> MutationType {
        let all = Self::all();
        all[rng.gen_range(0..all.len())]
    }
}

/// Inclusive program size bounds, in instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    pub min: usize,
    pub max: usize,
}

impl SizeBounds {
    pub fn new(min: usize, max: usize) -> Result<Self> {
        if max == 0 || min > max {
            return Err(GasForgeError::ConfigError(format!(
                "invalid program size bounds [{}, {}]",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, size: usize) -> bool {
        (self.min..=self.max).contains(&size)
    }

    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min, self.max)
    }
}

/// Builds and mutates candidate programs. Owns its random state, so the
/// same seed, metadata and calls always produce the same programs.
pub struct ProgramGenerator {
    metadata: Arc<InstructionMetadata>,
    bounds: SizeBounds,
    /// Instructions with positive weight, in table order
    candidates: Vec<(Instruction, f64)>,
    index: WeightedIndex<f64>,
    rng: StdRng,
}

impl ProgramGenerator {
    pub fn new(metadata: Arc<InstructionMetadata>, bounds: SizeBounds, seed: u64) -> Result<Self> {
        let candidates: Vec<(Instruction, f64)> = metadata
            .entries()
            .iter()
            .filter(|(_, meta)| meta.weight > 0.0)
            .map(|(instruction, meta)| (*instruction, meta.weight))
            .collect();
        let index = WeightedIndex::new(candidates.iter().map(|(_, weight)| *weight))
            .map_err(|e| GasForgeError::ConfigError(format!("instruction weights: {}", e)))?;
        Ok(Self {
            metadata,
            bounds,
            candidates,
            index,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn bounds(&self) -> SizeBounds {
        self.bounds
    }

    /// A new program of `size` instructions (clamped into the bounds)
    pub fn generate_initial(&mut self, size: usize) -> Program {
        let size = self.bounds.clamp(size);
        let mut ops = Vec::with_capacity(size);
        let mut depth = 0usize;
        while ops.len() < size {
            let group = self.sample_group(depth);
            depth = apply_depth(depth, &group);
            ops.extend(group);
        }
        // a prefix of stack-valid code is still stack-valid
        ops.truncate(size);
        Program::from_ops(&ops)
    }

    /// A new program with `mutations_count` point edits applied to `program`.
    ///
    /// An edit is kept only if the code from the edit position to the end
    /// still never underflows or overflows the stack; after
    /// [`MAX_ATTEMPTS`] rejected draws the edit is skipped.
    pub fn mutate(&mut self, program: &Program, mutations_count: usize) -> Program {
        let mut ops = program.ops();
        for _ in 0..mutations_count {
            if let Some(edited) = self.point_edit(&ops) {
                ops = edited;
            }
        }
        self.clamp(&mut ops);
        Program::from_ops(&ops)
    }

    fn point_edit(&mut self, ops: &[Op]) -> Option<Vec<Op>> {
        for _ in 0..MAX_ATTEMPTS {
            let kind = if ops.is_empty() {
                MutationType::Insert
            } else {
                MutationType::random(&mut self.rng)
            };
            let mut edited = ops.to_vec();
            let pos = match kind {
                MutationType::Replace => {
                    let pos = self.rng.gen_range(0..ops.len());
                    let group = self.sample_group(depth_before(ops, pos));
                    edited.splice(pos..=pos, group);
                    pos
                }
                MutationType::Insert => {
                    let pos = self.rng.gen_range(0..=ops.len());
                    let group = self.sample_group(depth_before(ops, pos));
                    edited.splice(pos..pos, group);
                    pos
                }
                MutationType::Delete => {
                    let pos = self.rng.gen_range(0..ops.len());
                    edited.remove(pos);
                    pos
                }
            };
            if stack_valid_from(&edited, pos) {
                return Some(edited);
            }
        }
        None
    }

    /// Truncate or pad with STOP into the size bounds
    fn clamp(&self, ops: &mut Vec<Op>) {
        if ops.len() > self.bounds.max {
            ops.truncate(self.bounds.max);
        }
        while ops.len() < self.bounds.min {
            ops.push(Op::new(Instruction::STOP));
        }
    }

    /// One sampled instruction preceded by the PUSHes of its argument rules
    fn sample_group(&mut self, depth: usize) -> Vec<Op> {
        for _ in 0..MAX_ATTEMPTS {
            let (instruction, _) = self.candidates[self.index.sample(&mut self.rng)];
            if let Some(meta) = self.metadata.get(instruction) {
                if fits(instruction, meta, depth) {
                    return emit(instruction, meta, &mut self.rng);
                }
            }
        }

        let fitting: Vec<(Instruction, f64)> = self
            .candidates
            .iter()
            .filter(|(instruction, _)| {
                self.metadata
                    .get(*instruction)
                    .map(|meta| fits(*instruction, meta, depth))
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        let choice = WeightedIndex::new(fitting.iter().map(|(_, weight)| *weight))
            .ok()
            .map(|dist| fitting[dist.sample(&mut self.rng)].0);
        match choice.and_then(|instruction| self.metadata.get(instruction).map(|m| (instruction, m))) {
            Some((instruction, meta)) => emit(instruction, meta, &mut self.rng),
            None => vec![Op::new(Instruction::STOP)],
        }
    }
}

/// Whether `instruction` can run at `depth` once its argument PUSHes are emitted
fn fits(instruction: Instruction, meta: &InstructionMeta, depth: usize) -> bool {
    let info = instruction.info();
    let provided = meta.arguments.len();
    let available = depth + provided;
    if available < info.args || available > STACK_LIMIT {
        return false;
    }
    available - info.args + info.ret <= STACK_LIMIT
}

fn emit<R: Rng>(instruction: Instruction, meta: &InstructionMeta, rng: &mut R) -> Vec<Op> {
    let mut ops = Vec::with_capacity(meta.arguments.len() + 1);
    // rules are top-first, so the first rule is pushed last
    for rule in meta.arguments.iter().rev() {
        ops.push(Op::push_value(rule.sample(rng)));
    }
    let width = instruction.info().immediate;
    ops.push(Op {
        byte: instruction.byte(),
        immediate: meta.sample_immediate(width, rng),
    });
    ops
}

fn apply_depth(depth: usize, ops: &[Op]) -> usize {
    ops.iter().fold(depth, |depth, op| {
        let info = op.info();
        depth.saturating_sub(info.args) + info.ret
    })
}

/// Simulated stack depth just before `ops[pos]` runs
fn depth_before(ops: &[Op], pos: usize) -> usize {
    apply_depth(0, &ops[..pos])
}

/// Whether `ops[pos..]` runs within the stack bounds, starting from the
/// depth the prefix leaves behind
fn stack_valid_from(ops: &[Op], pos: usize) -> bool {
    let mut depth = depth_before(ops, pos);
    for op in &ops[pos..] {
        let info = op.info();
        if depth < info.args {
            return false;
        }
        depth = depth - info.args + info.ret;
        if depth > STACK_LIMIT {
            return false;
        }
    }
    true
}
