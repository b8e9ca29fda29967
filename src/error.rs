//! Error Types for gasforge
//!
//! One error type for the search, the harness and the stream plumbing.
//! Execution faults of candidate programs are normally carried as data
//! (see [`crate::benchmark::Outcome`]); the `ExecutionFault` variant is only
//! used where a single execution is the whole job (e.g. profiling).

use std::fmt;
use std::time::Duration;

use crate::executor::ExceptionKind;

/// Unified error type for gasforge operations
#[derive(Debug, Clone)]
pub enum GasForgeError {
    /// Invalid or missing required settings
    ConfigError(String),
    /// A privileged operation was requested without sufficient rights
    PrivilegeError(String),
    /// The program itself faulted (revert, out-of-gas, invalid opcode, ...)
    ExecutionFault(ExceptionKind),
    /// Identical repeated runs diverged in gas or output
    NondeterminismError(String),
    /// Corpus/metadata/report stream unreadable, unwritable or malformed
    IoError(String),
    /// Two aggregators with different granularity were combined
    MergeError { left: u64, right: u64 },
    /// The executor could not be reached or answered garbage
    ExecutorError(String),
    /// An executor call did not answer in time
    Timeout(Duration),
}

impl fmt::Display for GasForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GasForgeError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            GasForgeError::PrivilegeError(msg) => write!(f, "Privilege error: {}", msg),
            GasForgeError::ExecutionFault(kind) => write!(f, "Execution fault: {}", kind),
            GasForgeError::NondeterminismError(msg) => write!(f, "Nondeterminism: {}", msg),
            GasForgeError::IoError(msg) => write!(f, "I/O error: {}", msg),
            GasForgeError::MergeError { left, right } => write!(
                f,
                "Merge error: granularity {} does not match granularity {}",
                left, right
            ),
            GasForgeError::ExecutorError(msg) => write!(f, "Executor error: {}", msg),
            GasForgeError::Timeout(after) => {
                write!(f, "Executor call timed out after {:?}", after)
            }
        }
    }
}

impl std::error::Error for GasForgeError {}

impl GasForgeError {
    /// Process exit status for this error.
    ///
    /// Configuration problems (including privileges) are kept apart from
    /// failures that only show up while programs run.
    pub fn exit_code(&self) -> u8 {
        match self {
            GasForgeError::ConfigError(_) | GasForgeError::PrivilegeError(_) => 2,
            GasForgeError::IoError(_) => 3,
            GasForgeError::ExecutorError(_) | GasForgeError::Timeout(_) => 4,
            GasForgeError::ExecutionFault(_) => 5,
            GasForgeError::NondeterminismError(_) => 6,
            GasForgeError::MergeError { .. } => 7,
        }
    }

    /// Short machine readable tag, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            GasForgeError::ConfigError(_) => "config",
            GasForgeError::PrivilegeError(_) => "privilege",
            GasForgeError::ExecutionFault(_) => "execution_fault",
            GasForgeError::NondeterminismError(_) => "nondeterminism",
            GasForgeError::IoError(_) => "io",
            GasForgeError::MergeError { .. } => "merge",
            GasForgeError::ExecutorError(_) => "executor",
            GasForgeError::Timeout(_) => "timeout",
        }
    }
}

/// Result type alias for gasforge operations
pub type Result<T> = std::result::Result<T, GasForgeError>;

// Conversion from std::io::Error
impl From<std::io::Error> for GasForgeError {
    fn from(err: std::io::Error) -> Self {
        GasForgeError::IoError(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for GasForgeError {
    fn from(err: serde_json::Error) -> Self {
        GasForgeError::IoError(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for GasForgeError {
    fn from(err: hex::FromHexError) -> Self {
        GasForgeError::IoError(format!("hex error: {}", err))
    }
}
