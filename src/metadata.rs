//! Instruction metadata table: generation weights and parameter rules.
//!
//! Loaded once at startup and read-only for the rest of the search.

use crate::error::{GasForgeError, Result};
use crate::instruction::Instruction;
use crate::stream::Source;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// How immediate bytes of a PUSH are produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImmediateRule {
    #[default]
    Random,
    Values(Vec<u64>),
}

/// Value pushed for one stack argument before the instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentRule {
    Values(Vec<u64>),
    /// Inclusive bounds
    Range(u64, u64),
}

impl ArgumentRule {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> u64 {
        match self {
            ArgumentRule::Values(values) => values[rng.gen_range(0..values.len())],
            ArgumentRule::Range(lo, hi) => rng.gen_range(*lo..=*hi),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        match self {
            ArgumentRule::Values(values) if values.is_empty() => Err(GasForgeError::IoError(
                format!("metadata for {}: empty argument value list", name),
            )),
            ArgumentRule::Range(lo, hi) if lo > hi => Err(GasForgeError::IoError(format!(
                "metadata for {}: argument range [{}, {}] is empty",
                name, lo, hi
            ))),
            _ => Ok(()),
        }
    }
}

/// Generation parameters of one instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionMeta {
    pub weight: f64,
    #[serde(default)]
    pub immediate: ImmediateRule,
    /// Stack arguments, top of stack first
    #[serde(default)]
    pub arguments: Vec<ArgumentRule>,
}

impl InstructionMeta {
    pub fn weighted(weight: f64) -> Self {
        Self {
            weight,
            immediate: ImmediateRule::Random,
            arguments: Vec::new(),
        }
    }

    /// Immediate bytes for an instruction with `width` immediate bytes
    pub fn sample_immediate<R: Rng>(&self, width: usize, rng: &mut R) -> Vec<u8> {
        match &self.immediate {
            ImmediateRule::Values(values) if !values.is_empty() => {
                let value = values[rng.gen_range(0..values.len())];
                let mut bytes = vec![0u8; width];
                let be = value.to_be_bytes();
                let n = width.min(be.len());
                bytes[width - n..].copy_from_slice(&be[be.len() - n..]);
                bytes
            }
            _ => (0..width).map(|_| rng.gen()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct MetadataFile {
    instructions: BTreeMap<String, InstructionMeta>,
}

/// Read-only mapping from instruction to its generation parameters,
/// ordered by opcode so sampling is reproducible.
#[derive(Debug, Clone)]
pub struct InstructionMetadata {
    entries: Vec<(Instruction, InstructionMeta)>,
}

impl InstructionMetadata {
    pub fn new(mut entries: Vec<(Instruction, InstructionMeta)>) -> Result<Self> {
        entries.sort_by_key(|(instruction, _)| *instruction);
        entries.dedup_by_key(|(instruction, _)| *instruction);
        let table = Self { entries };
        table.validate()?;
        Ok(table)
    }

    /// Built-in table: every instruction with weight 1, control flow and
    /// terminators disabled, CALL aimed at the precompiles.
    pub fn default_table() -> Self {
        let entries = Instruction::all()
            .map(|instruction| {
                let meta = match instruction {
                    Instruction::STOP
                    | Instruction::JUMP
                    | Instruction::JUMPI
                    | Instruction::RETURN
                    | Instruction::REVERT
                    | Instruction::INVALID
                    | Instruction::SELFDESTRUCT => InstructionMeta::weighted(0.0),
                    Instruction::CALL => InstructionMeta {
                        weight: 1.0,
                        immediate: ImmediateRule::Random,
                        arguments: vec![
                            ArgumentRule::Range(0, 100_000),
                            ArgumentRule::Values(vec![1, 2, 3, 4]),
                            ArgumentRule::Values(vec![0]),
                            ArgumentRule::Values(vec![0]),
                            ArgumentRule::Range(0, 4096),
                            ArgumentRule::Values(vec![0]),
                            ArgumentRule::Values(vec![32]),
                        ],
                    },
                    _ => InstructionMeta::weighted(1.0),
                };
                (instruction, meta)
            })
            .collect();
        Self { entries }
    }

    /// Parse the JSON table format `{"instructions": {"ADD": {"weight": 1.0}, ...}}`
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: MetadataFile = serde_json::from_str(text)?;
        let mut entries = Vec::with_capacity(file.instructions.len());
        for (name, meta) in file.instructions {
            let instruction = Instruction::from_name(&name).ok_or_else(|| {
                GasForgeError::IoError(format!("metadata names unknown instruction {}", name))
            })?;
            entries.push((instruction, meta));
        }
        Self::new(entries)
    }

    /// Load a table from a file (`.gz` is decompressed transparently)
    pub fn load(path: &Path) -> Result<Self> {
        let mut text = String::new();
        Source::open(path)?.read_to_string(&mut text)?;
        Self::from_json_str(&text)
    }

    pub fn entries(&self) -> &[(Instruction, InstructionMeta)] {
        &self.entries
    }

    pub fn get(&self, instruction: Instruction) -> Option<&InstructionMeta> {
        self.entries
            .binary_search_by_key(&instruction, |(i, _)| *i)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    pub fn to_json(&self) -> Result<String> {
        let file = MetadataFile {
            instructions: self
                .entries
                .iter()
                .map(|(instruction, meta)| (instruction.name().to_string(), meta.clone()))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    fn validate(&self) -> Result<()> {
        let mut total = 0.0;
        for (instruction, meta) in &self.entries {
            let name = instruction.name();
            if !meta.weight.is_finite() || meta.weight < 0.0 {
                return Err(GasForgeError::IoError(format!(
                    "metadata for {}: weight {} is not a non-negative number",
                    name, meta.weight
                )));
            }
            if meta.arguments.len() > instruction.info().args {
                return Err(GasForgeError::IoError(format!(
                    "metadata for {}: {} argument rules but the instruction takes {}",
                    name,
                    meta.arguments.len(),
                    instruction.info().args
                )));
            }
            if matches!(meta.immediate, ImmediateRule::Values(_)) && !instruction.is_push() {
                return Err(GasForgeError::IoError(format!(
                    "metadata for {}: immediate values given for an instruction without immediates",
                    name
                )));
            }
            for rule in &meta.arguments {
                rule.validate(name)?;
            }
            total += meta.weight;
        }
        if total <= 0.0 {
            return Err(GasForgeError::IoError(
                "metadata table has no instruction with positive weight".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InstructionMetadata {
    fn default() -> Self {
        Self::default_table()
    }
}
