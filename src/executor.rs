//! Executor contract and the subprocess-backed executor.
//!
//! The VM itself lives outside this crate. Anything that can run bytecode
//! against an [`ExecutionEnv`] and report gas, wall time, output and fault
//! kind implements [`Executor`].

use crate::error::{GasForgeError, Result};
use crate::instruction::Instruction;
use crate::protocol::{self, Response, TraceEvent};
use alloy_primitives::{Address, U256};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Block gas limit used when none is configured
pub const MAX_BLOCK_GAS_LIMIT: u64 = 0x7fff_ffff_ffff_ffff;

/// How a program execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExceptionKind {
    #[default]
    None,
    Revert,
    OutOfGas,
    InvalidInstruction,
    StackUnderflow,
    Other,
}

impl ExceptionKind {
    pub fn is_fault(self) -> bool {
        self != ExceptionKind::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionKind::None => "None",
            ExceptionKind::Revert => "Revert",
            ExceptionKind::OutOfGas => "OutOfGas",
            ExceptionKind::InvalidInstruction => "InvalidInstruction",
            ExceptionKind::StackUnderflow => "StackUnderflow",
            ExceptionKind::Other => "Other",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only context every execution starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionEnv {
    pub sender: Address,
    pub origin: Address,
    pub value: U256,
    /// Gas given to the transaction
    pub gas: u64,
    pub gas_price: U256,
    pub block_number: u64,
    pub block_gas_limit: u64,
    pub timestamp: u64,
    pub author: Address,
    pub difficulty: U256,
}

impl Default for ExecutionEnv {
    fn default() -> Self {
        Self {
            sender: Address::with_last_byte(69),
            origin: Address::with_last_byte(69),
            value: U256::ZERO,
            gas: MAX_BLOCK_GAS_LIMIT,
            gas_price: U256::ZERO,
            block_number: 0,
            block_gas_limit: MAX_BLOCK_GAS_LIMIT,
            timestamp: 0,
            author: Address::ZERO,
            difficulty: U256::ZERO,
        }
    }
}

impl ExecutionEnv {
    pub fn validate(&self) -> Result<()> {
        if self.gas == 0 {
            return Err(GasForgeError::ConfigError(
                "transaction gas must be positive".to_string(),
            ));
        }
        if self.gas > self.block_gas_limit {
            return Err(GasForgeError::ConfigError(format!(
                "transaction gas {} exceeds block gas limit {}",
                self.gas, self.block_gas_limit
            )));
        }
        Ok(())
    }
}

/// What one execution reported
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStats {
    pub gas_used: u64,
    /// Wall time in seconds as measured by the executor
    pub wall_time: f64,
    pub output: Vec<u8>,
    pub exception: ExceptionKind,
}

/// Hooks called while a traced execution runs
pub trait ExecutionTracer {
    /// Before each instruction; `stack` is ordered bottom to top
    fn on_step(&mut self, instruction: Instruction, stack: &[U256], elapsed_ns: Option<u64>);
    fn on_storage_read(&mut self, key: U256);
    fn on_storage_write(&mut self, key: U256, original: U256, current: U256, new: U256);
    fn on_create(&mut self, size: U256);
    fn on_selfdestruct(&mut self);
}

/// Runs bytecode. Every call must start from the same logical pre-state.
pub trait Executor: Send {
    fn execute(&mut self, code: &[u8], env: &ExecutionEnv) -> Result<ExecutionStats>;

    /// Execute while reporting each step to `tracer`. Executors that cannot
    /// trace run untraced.
    fn execute_traced(
        &mut self,
        code: &[u8],
        env: &ExecutionEnv,
        tracer: &mut dyn ExecutionTracer,
    ) -> Result<ExecutionStats> {
        let _ = tracer;
        self.execute(code, env)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&mut self, code: &[u8], env: &ExecutionEnv) -> Result<ExecutionStats> {
        (**self).execute(code, env)
    }

    fn execute_traced(
        &mut self,
        code: &[u8],
        env: &ExecutionEnv,
        tracer: &mut dyn ExecutionTracer,
    ) -> Result<ExecutionStats> {
        (**self).execute_traced(code, env, tracer)
    }
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<std::io::Result<String>>,
}

/// Executor backed by an external VM process speaking [`crate::protocol`].
///
/// The process is started on first use and kept for later calls. Each
/// instance owns its own process, so instances can run on separate threads
/// without sharing VM state.
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    session: Option<Session>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
            session: None,
        }
    }

    /// Split a command line on whitespace: program first, then arguments
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            GasForgeError::ConfigError("executor command is empty".to_string())
        })?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Per-call timeout; on expiry the process is killed and restarted on
    /// the next call
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn(&self) -> Result<Session> {
        debug!(program = %self.program, "starting executor process");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                GasForgeError::ExecutorError(format!("failed to start {}: {}", self.program, e))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GasForgeError::ExecutorError("executor stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GasForgeError::ExecutorError("executor stdout unavailable".into()))?;

        let (tx, rx) = channel::unbounded();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Session {
            child,
            stdin,
            lines: rx,
        })
    }

    fn kill(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.child.kill();
            let _ = session.child.wait();
        }
    }

    fn call(
        &mut self,
        code: &[u8],
        env: &ExecutionEnv,
        trace: bool,
    ) -> Result<(ExecutionStats, Vec<TraceEvent>)> {
        let request = protocol::encode_request(code, env, trace)?;
        if self.session.is_none() {
            self.session = Some(self.spawn()?);
        }
        let timeout = self.timeout;
        let received = match self.session.as_mut() {
            Some(session) => Self::exchange(session, &request, timeout),
            None => Err(GasForgeError::ExecutorError("no executor session".into())),
        };

        let line = match received {
            Ok(line) => line,
            Err(e) => {
                if let GasForgeError::Timeout(after) = &e {
                    warn!(program = %self.program, ?after, "executor call timed out, restarting process");
                }
                self.kill();
                return Err(e);
            }
        };

        match protocol::parse_response(&line) {
            Response::Executed { stats, trace } => Ok((stats, trace)),
            Response::Error(msg) => Err(GasForgeError::ExecutorError(msg)),
        }
    }

    fn exchange(session: &mut Session, request: &str, timeout: Option<Duration>) -> Result<String> {
        writeln!(session.stdin, "{}", request)
            .and_then(|_| session.stdin.flush())
            .map_err(|e| GasForgeError::ExecutorError(format!("write to executor: {}", e)))?;

        let received = match timeout {
            Some(after) => session.lines.recv_timeout(after).map_err(|e| match e {
                RecvTimeoutError::Timeout => GasForgeError::Timeout(after),
                RecvTimeoutError::Disconnected => {
                    GasForgeError::ExecutorError("executor process exited".to_string())
                }
            })?,
            None => session.lines.recv().map_err(|_| {
                GasForgeError::ExecutorError("executor process exited".to_string())
            })?,
        };
        received.map_err(|e| GasForgeError::ExecutorError(format!("read from executor: {}", e)))
    }
}

impl Executor for CommandExecutor {
    fn execute(&mut self, code: &[u8], env: &ExecutionEnv) -> Result<ExecutionStats> {
        self.call(code, env, false).map(|(stats, _)| stats)
    }

    fn execute_traced(
        &mut self,
        code: &[u8],
        env: &ExecutionEnv,
        tracer: &mut dyn ExecutionTracer,
    ) -> Result<ExecutionStats> {
        let (stats, trace) = self.call(code, env, true)?;
        protocol::replay(&trace, tracer);
        Ok(stats)
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str =
        r#"{"gasUsed":21003,"wallTimeSeconds":0.25,"output":"0x","exception":"None"}"#;

    fn echo_vm() -> CommandExecutor {
        let script = format!("while read line; do echo '{}'; done", ANSWER);
        CommandExecutor::new("sh", vec!["-c".to_string(), script])
    }

    #[test]
    fn test_env_defaults() {
        let env = ExecutionEnv::default();
        assert_eq!(env.sender, Address::with_last_byte(69));
        assert_eq!(env.gas, env.block_gas_limit);
        assert!(env.validate().is_ok());

        let broken = ExecutionEnv {
            gas: 0,
            ..ExecutionEnv::default()
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_env_partial_json() {
        let env: ExecutionEnv = serde_json::from_str(r#"{"gas": 1000, "blockNumber": 7}"#).unwrap();
        assert_eq!(env.gas, 1000);
        assert_eq!(env.block_number, 7);
        assert_eq!(env.sender, Address::with_last_byte(69));
    }

    #[test]
    fn test_command_line_split() {
        assert!(CommandExecutor::from_command_line("   ").is_err());
        let exec = CommandExecutor::from_command_line("evm-runner --fork byzantium").unwrap();
        assert_eq!(exec.program, "evm-runner");
        assert_eq!(exec.args, vec!["--fork", "byzantium"]);
    }

    #[test]
    fn test_command_executor_roundtrip() {
        let mut exec = echo_vm();
        let env = ExecutionEnv::default();
        for _ in 0..3 {
            let stats = exec.execute(&[0x60, 0x01, 0x00], &env).unwrap();
            assert_eq!(stats.gas_used, 21003);
            assert_eq!(stats.wall_time, 0.25);
            assert_eq!(stats.exception, ExceptionKind::None);
        }
    }

    #[test]
    fn test_command_executor_timeout() {
        let mut exec = CommandExecutor::new("sh", vec!["-c".to_string(), "sleep 5".to_string()])
            .with_timeout(Some(Duration::from_millis(100)));
        let err = exec.execute(&[0x00], &ExecutionEnv::default()).unwrap_err();
        assert!(matches!(err, GasForgeError::Timeout(_)));
        assert!(exec.session.is_none());
    }

    #[test]
    fn test_command_executor_missing_program() {
        let mut exec = CommandExecutor::new("/nonexistent/gasforge-vm", Vec::new());
        let err = exec.execute(&[0x00], &ExecutionEnv::default()).unwrap_err();
        assert!(matches!(err, GasForgeError::ExecutorError(_)));
    }
}
