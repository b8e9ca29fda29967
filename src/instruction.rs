//! EVM instruction table and runtime-refined instructions.
//!
//! [`Instruction`] is an opcode byte that is known to the table; its static
//! metadata (stack inputs/outputs, immediate width) comes from [`InstructionInfo`].
//! [`ExtendedInstruction`] refines a CALL by its target address so calls into
//! precompiles are counted separately from ordinary calls.

use alloy_primitives::U256;
use std::fmt;

/// Static metadata of one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionInfo {
    pub name: &'static str,
    /// Stack items consumed
    pub args: usize,
    /// Stack items produced
    pub ret: usize,
    /// Immediate bytes following the opcode (PUSH1..PUSH32)
    pub immediate: usize,
}

impl InstructionInfo {
    const fn new(name: &'static str, args: usize, ret: usize) -> Self {
        Self {
            name,
            args,
            ret,
            immediate: 0,
        }
    }
}

const PUSH_NAMES: [&str; 32] = [
    "PUSH1", "PUSH2", "PUSH3", "PUSH4", "PUSH5", "PUSH6", "PUSH7", "PUSH8", "PUSH9", "PUSH10",
    "PUSH11", "PUSH12", "PUSH13", "PUSH14", "PUSH15", "PUSH16", "PUSH17", "PUSH18", "PUSH19",
    "PUSH20", "PUSH21", "PUSH22", "PUSH23", "PUSH24", "PUSH25", "PUSH26", "PUSH27", "PUSH28",
    "PUSH29", "PUSH30", "PUSH31", "PUSH32",
];

const DUP_NAMES: [&str; 16] = [
    "DUP1", "DUP2", "DUP3", "DUP4", "DUP5", "DUP6", "DUP7", "DUP8", "DUP9", "DUP10", "DUP11",
    "DUP12", "DUP13", "DUP14", "DUP15", "DUP16",
];

const SWAP_NAMES: [&str; 16] = [
    "SWAP1", "SWAP2", "SWAP3", "SWAP4", "SWAP5", "SWAP6", "SWAP7", "SWAP8", "SWAP9", "SWAP10",
    "SWAP11", "SWAP12", "SWAP13", "SWAP14", "SWAP15", "SWAP16",
];

const LOG_NAMES: [&str; 5] = ["LOG0", "LOG1", "LOG2", "LOG3", "LOG4"];

fn lookup(op: u8) -> Option<InstructionInfo> {
    let info = match op {
        0x00 => InstructionInfo::new("STOP", 0, 0),
        0x01 => InstructionInfo::new("ADD", 2, 1),
        0x02 => InstructionInfo::new("MUL", 2, 1),
        0x03 => InstructionInfo::new("SUB", 2, 1),
        0x04 => InstructionInfo::new("DIV", 2, 1),
        0x05 => InstructionInfo::new("SDIV", 2, 1),
        0x06 => InstructionInfo::new("MOD", 2, 1),
        0x07 => InstructionInfo::new("SMOD", 2, 1),
        0x08 => InstructionInfo::new("ADDMOD", 3, 1),
        0x09 => InstructionInfo::new("MULMOD", 3, 1),
        0x0a => InstructionInfo::new("EXP", 2, 1),
        0x0b => InstructionInfo::new("SIGNEXTEND", 2, 1),

        0x10 => InstructionInfo::new("LT", 2, 1),
        0x11 => InstructionInfo::new("GT", 2, 1),
        0x12 => InstructionInfo::new("SLT", 2, 1),
        0x13 => InstructionInfo::new("SGT", 2, 1),
        0x14 => InstructionInfo::new("EQ", 2, 1),
        0x15 => InstructionInfo::new("ISZERO", 1, 1),
        0x16 => InstructionInfo::new("AND", 2, 1),
        0x17 => InstructionInfo::new("OR", 2, 1),
        0x18 => InstructionInfo::new("XOR", 2, 1),
        0x19 => InstructionInfo::new("NOT", 1, 1),
        0x1a => InstructionInfo::new("BYTE", 2, 1),
        0x1b => InstructionInfo::new("SHL", 2, 1),
        0x1c => InstructionInfo::new("SHR", 2, 1),
        0x1d => InstructionInfo::new("SAR", 2, 1),

        0x20 => InstructionInfo::new("SHA3", 2, 1),

        0x30 => InstructionInfo::new("ADDRESS", 0, 1),
        0x31 => InstructionInfo::new("BALANCE", 1, 1),
        0x32 => InstructionInfo::new("ORIGIN", 0, 1),
        0x33 => InstructionInfo::new("CALLER", 0, 1),
        0x34 => InstructionInfo::new("CALLVALUE", 0, 1),
        0x35 => InstructionInfo::new("CALLDATALOAD", 1, 1),
        0x36 => InstructionInfo::new("CALLDATASIZE", 0, 1),
        0x37 => InstructionInfo::new("CALLDATACOPY", 3, 0),
        0x38 => InstructionInfo::new("CODESIZE", 0, 1),
        0x39 => InstructionInfo::new("CODECOPY", 3, 0),
        0x3a => InstructionInfo::new("GASPRICE", 0, 1),
        0x3b => InstructionInfo::new("EXTCODESIZE", 1, 1),
        0x3c => InstructionInfo::new("EXTCODECOPY", 4, 0),
        0x3d => InstructionInfo::new("RETURNDATASIZE", 0, 1),
        0x3e => InstructionInfo::new("RETURNDATACOPY", 3, 0),
        0x3f => InstructionInfo::new("EXTCODEHASH", 1, 1),

        0x40 => InstructionInfo::new("BLOCKHASH", 1, 1),
        0x41 => InstructionInfo::new("COINBASE", 0, 1),
        0x42 => InstructionInfo::new("TIMESTAMP", 0, 1),
        0x43 => InstructionInfo::new("NUMBER", 0, 1),
        0x44 => InstructionInfo::new("DIFFICULTY", 0, 1),
        0x45 => InstructionInfo::new("GASLIMIT", 0, 1),

        0x50 => InstructionInfo::new("POP", 1, 0),
        0x51 => InstructionInfo::new("MLOAD", 1, 1),
        0x52 => InstructionInfo::new("MSTORE", 2, 0),
        0x53 => InstructionInfo::new("MSTORE8", 2, 0),
        0x54 => InstructionInfo::new("SLOAD", 1, 1),
        0x55 => InstructionInfo::new("SSTORE", 2, 0),
        0x56 => InstructionInfo::new("JUMP", 1, 0),
        0x57 => InstructionInfo::new("JUMPI", 2, 0),
        0x58 => InstructionInfo::new("PC", 0, 1),
        0x59 => InstructionInfo::new("MSIZE", 0, 1),
        0x5a => InstructionInfo::new("GAS", 0, 1),
        0x5b => InstructionInfo::new("JUMPDEST", 0, 0),

        0x60..=0x7f => {
            let width = (op - 0x60) as usize + 1;
            InstructionInfo {
                name: PUSH_NAMES[width - 1],
                args: 0,
                ret: 1,
                immediate: width,
            }
        }
        0x80..=0x8f => {
            let n = (op - 0x80) as usize + 1;
            InstructionInfo::new(DUP_NAMES[n - 1], n, n + 1)
        }
        0x90..=0x9f => {
            let n = (op - 0x90) as usize + 1;
            InstructionInfo::new(SWAP_NAMES[n - 1], n + 1, n + 1)
        }
        0xa0..=0xa4 => {
            let topics = (op - 0xa0) as usize;
            InstructionInfo::new(LOG_NAMES[topics], topics + 2, 0)
        }

        0xf0 => InstructionInfo::new("CREATE", 3, 1),
        0xf1 => InstructionInfo::new("CALL", 7, 1),
        0xf2 => InstructionInfo::new("CALLCODE", 7, 1),
        0xf3 => InstructionInfo::new("RETURN", 2, 0),
        0xf4 => InstructionInfo::new("DELEGATECALL", 6, 1),
        0xf5 => InstructionInfo::new("CREATE2", 4, 1),
        0xfa => InstructionInfo::new("STATICCALL", 6, 1),
        0xfd => InstructionInfo::new("REVERT", 2, 0),
        0xfe => InstructionInfo::new("INVALID", 0, 0),
        0xff => InstructionInfo::new("SELFDESTRUCT", 1, 0),
        _ => return None,
    };
    Some(info)
}

/// An opcode byte present in the instruction table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instruction(u8);

impl Instruction {
    pub const STOP: Instruction = Instruction(0x00);
    pub const SLOAD: Instruction = Instruction(0x54);
    pub const SSTORE: Instruction = Instruction(0x55);
    pub const JUMP: Instruction = Instruction(0x56);
    pub const JUMPI: Instruction = Instruction(0x57);
    pub const JUMPDEST: Instruction = Instruction(0x5b);
    pub const PUSH1: Instruction = Instruction(0x60);
    pub const PUSH32: Instruction = Instruction(0x7f);
    pub const CREATE: Instruction = Instruction(0xf0);
    pub const CALL: Instruction = Instruction(0xf1);
    pub const RETURN: Instruction = Instruction(0xf3);
    pub const CREATE2: Instruction = Instruction(0xf5);
    pub const REVERT: Instruction = Instruction(0xfd);
    pub const INVALID: Instruction = Instruction(0xfe);
    pub const SELFDESTRUCT: Instruction = Instruction(0xff);

    /// Look up an opcode byte; `None` if the byte is not a known instruction
    pub fn from_byte(byte: u8) -> Option<Self> {
        lookup(byte).map(|_| Instruction(byte))
    }

    /// Look up an instruction by its mnemonic (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().find(|instr| instr.name().eq_ignore_ascii_case(name))
    }

    /// All instructions of the table in opcode order
    pub fn all() -> impl Iterator<Item = Instruction> {
        (0u8..=255).filter_map(Instruction::from_byte)
    }

    /// PUSH instruction with `width` immediate bytes (1..=32)
    pub fn push(width: usize) -> Option<Self> {
        if (1..=32).contains(&width) {
            Some(Instruction(0x5f + width as u8))
        } else {
            None
        }
    }

    pub fn byte(self) -> u8 {
        self.0
    }

    pub fn info(self) -> InstructionInfo {
        // Construction always goes through the table.
        lookup(self.0).unwrap_or(InstructionInfo::new("INVALID", 0, 0))
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_push(self) -> bool {
        (0x60..=0x7f).contains(&self.0)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An instruction refined by its runtime context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtendedInstruction {
    Base(Instruction),
    PrecompiledEcrecover,
    PrecompiledSha256,
    PrecompiledRipemd160,
}

impl ExtendedInstruction {
    /// Classify an instruction given the operand stack at the time it runs.
    ///
    /// `stack` is ordered bottom to top. A CALL whose second-from-top operand
    /// (the target address) is 1, 2 or 3 becomes a precompile category.
    pub fn classify(instruction: Instruction, stack: &[U256]) -> Self {
        if instruction == Instruction::CALL && stack.len() >= 2 {
            let address = stack[stack.len() - 2];
            if address == U256::from(1u64) {
                return ExtendedInstruction::PrecompiledEcrecover;
            }
            if address == U256::from(2u64) {
                return ExtendedInstruction::PrecompiledSha256;
            }
            if address == U256::from(3u64) {
                return ExtendedInstruction::PrecompiledRipemd160;
            }
        }
        ExtendedInstruction::Base(instruction)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExtendedInstruction::Base(instruction) => instruction.name(),
            ExtendedInstruction::PrecompiledEcrecover => "PRECOMPILED_ECRECOVER",
            ExtendedInstruction::PrecompiledSha256 => "PRECOMPILED_SHA256",
            ExtendedInstruction::PrecompiledRipemd160 => "PRECOMPILED_RIPEMD160",
        }
    }
}

impl From<Instruction> for ExtendedInstruction {
    fn from(instruction: Instruction) -> Self {
        ExtendedInstruction::Base(instruction)
    }
}

impl fmt::Display for ExtendedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u64]) -> Vec<U256> {
        values.iter().map(|v| U256::from(*v)).collect()
    }

    #[test]
    fn test_table_shapes() {
        let add = Instruction::from_name("add").unwrap();
        assert_eq!(add.byte(), 0x01);
        assert_eq!((add.info().args, add.info().ret), (2, 1));

        let push32 = Instruction::from_byte(0x7f).unwrap();
        assert_eq!(push32.name(), "PUSH32");
        assert_eq!(push32.info().immediate, 32);

        let swap16 = Instruction::from_name("SWAP16").unwrap();
        assert_eq!((swap16.info().args, swap16.info().ret), (17, 17));

        assert!(Instruction::from_byte(0x0c).is_none());
        assert!(Instruction::from_byte(0xef).is_none());
    }

    #[test]
    fn test_push_width() {
        assert_eq!(Instruction::push(1), Some(Instruction::PUSH1));
        assert_eq!(Instruction::push(32), Some(Instruction::PUSH32));
        assert_eq!(Instruction::push(0), None);
        assert_eq!(Instruction::push(33), None);
    }

    #[test]
    fn test_call_to_precompiles() {
        // top of stack is the last element: gas, then address below it
        let cases = [
            (1, ExtendedInstruction::PrecompiledEcrecover),
            (2, ExtendedInstruction::PrecompiledSha256),
            (3, ExtendedInstruction::PrecompiledRipemd160),
        ];
        for (address, expected) in cases {
            let stack = words(&[0, 0, 0, 0, 0, address, 100_000]);
            assert_eq!(
                ExtendedInstruction::classify(Instruction::CALL, &stack),
                expected
            );
        }
    }

    #[test]
    fn test_plain_call() {
        let stack = words(&[4, 100_000]);
        assert_eq!(
            ExtendedInstruction::classify(Instruction::CALL, &stack),
            ExtendedInstruction::Base(Instruction::CALL)
        );
        let stack = words(&[0, 100_000]);
        assert_eq!(
            ExtendedInstruction::classify(Instruction::CALL, &stack),
            ExtendedInstruction::Base(Instruction::CALL)
        );
        // fewer than two operands present
        let stack = words(&[1]);
        assert_eq!(
            ExtendedInstruction::classify(Instruction::CALL, &stack),
            ExtendedInstruction::Base(Instruction::CALL)
        );
    }

    #[test]
    fn test_non_call_keeps_classification() {
        let stack = words(&[5, 1, 7]);
        let sload = Instruction::SLOAD;
        assert_eq!(
            ExtendedInstruction::classify(sload, &stack),
            ExtendedInstruction::Base(sload)
        );
        assert_eq!(ExtendedInstruction::PrecompiledSha256.name(), "PRECOMPILED_SHA256");
    }
}
