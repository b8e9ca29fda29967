//! Candidate bytecode programs.
//!
//! A [`Program`] is immutable once built; editing goes through [`Op`] lists
//! and produces a new program.

use crate::error::Result;
use crate::instruction::{Instruction, InstructionInfo};
use std::fmt;

/// One decoded instruction with its immediate bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    /// Raw opcode byte; may be outside the instruction table for foreign code
    pub byte: u8,
    pub immediate: Vec<u8>,
}

impl Op {
    pub fn new(instruction: Instruction) -> Self {
        Self {
            byte: instruction.byte(),
            immediate: Vec::new(),
        }
    }

    /// PUSH with the narrowest width able to hold `value`
    pub fn push_value(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
        let immediate = bytes[skip..].to_vec();
        let width = immediate.len();
        Self {
            byte: Instruction::PUSH1.byte() + (width as u8 - 1),
            immediate,
        }
    }

    pub fn instruction(&self) -> Option<Instruction> {
        Instruction::from_byte(self.byte)
    }

    /// Static info; bytes outside the table behave as a no-op for stack tracking
    pub fn info(&self) -> InstructionInfo {
        match self.instruction() {
            Some(instruction) => instruction.info(),
            None => InstructionInfo {
                name: "UNKNOWN",
                args: 0,
                ret: 0,
                immediate: 0,
            },
        }
    }

    fn encoded_len(&self) -> usize {
        1 + self.immediate.len()
    }
}

/// An ordered, immutable sequence of instructions stored as raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Program {
    code: Vec<u8>,
    size: usize,
}

impl Program {
    /// Wrap raw bytecode
    pub fn new(code: Vec<u8>) -> Self {
        let size = decode(&code).len();
        Self { code, size }
    }

    /// Encode a list of ops
    pub fn from_ops(ops: &[Op]) -> Self {
        let mut code = Vec::with_capacity(ops.iter().map(Op::encoded_len).sum());
        for op in ops {
            code.push(op.byte);
            code.extend_from_slice(&op.immediate);
        }
        Self {
            code,
            size: ops.len(),
        }
    }

    /// Parse hex bytecode, with or without a `0x` prefix
    pub fn from_hex(text: &str) -> Result<Self> {
        let text = text.trim();
        let text = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        Ok(Self::new(hex::decode(text)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.code)
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Number of instructions
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn ops(&self) -> Vec<Op> {
        decode(&self.code)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .ops()
            .iter()
            .map(|op| match op.instruction() {
                Some(instruction) if op.immediate.is_empty() => instruction.name().to_string(),
                Some(instruction) => {
                    format!("{} 0x{}", instruction.name(), hex::encode(&op.immediate))
                }
                None => format!("0x{:02x}", op.byte),
            })
            .collect();
        write!(f, "{}", names.join(" "))
    }
}

/// Split bytecode into ops. A PUSH cut short by the end of the code gets its
/// missing immediate bytes as zeros, as the EVM reads past the end.
fn decode(code: &[u8]) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let byte = code[pc];
        let width = Instruction::from_byte(byte)
            .map(|instruction| instruction.info().immediate)
            .unwrap_or(0);
        let start = (pc + 1).min(code.len());
        let end = (pc + 1 + width).min(code.len());
        let mut immediate = code[start..end].to_vec();
        immediate.resize(width, 0);
        ops.push(Op { byte, immediate });
        pc += 1 + width;
    }
    ops
}
