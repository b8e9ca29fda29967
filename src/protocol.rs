//! Line protocol spoken with an external VM process.
//!
//! Each request is one JSON line `{"code": "<hex>", "env": {...}, "trace": bool}`.
//! Each answer is one JSON line, either
//! `{"gasUsed": n, "wallTimeSeconds": s, "output": "<hex>", "exception": "None", "trace": [...]}`
//! or `{"error": "<message>"}`.

use crate::error::Result;
use crate::executor::{ExceptionKind, ExecutionEnv, ExecutionStats, ExecutionTracer};
use crate::instruction::Instruction;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct Request<'a> {
    code: String,
    env: &'a ExecutionEnv,
    trace: bool,
}

/// One event of a traced execution, in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TraceEvent {
    Step {
        opcode: u8,
        /// Operand stack before the instruction, bottom to top
        #[serde(default)]
        stack: Vec<U256>,
        #[serde(default, rename = "elapsedNs", skip_serializing_if = "Option::is_none")]
        elapsed_ns: Option<u64>,
    },
    Sload {
        key: U256,
    },
    Sstore {
        key: U256,
        original: U256,
        current: U256,
        new: U256,
    },
    Create {
        size: U256,
    },
    Selfdestruct,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseLine {
    error: Option<String>,
    gas_used: Option<u64>,
    #[serde(default)]
    wall_time_seconds: f64,
    #[serde(default)]
    output: String,
    #[serde(default)]
    exception: ExceptionKind,
    #[serde(default)]
    trace: Vec<TraceEvent>,
}

#[derive(Debug, PartialEq)]
pub enum Response {
    Executed {
        stats: ExecutionStats,
        trace: Vec<TraceEvent>,
    },
    Error(String),
}

pub fn encode_request(code: &[u8], env: &ExecutionEnv, trace: bool) -> Result<String> {
    let request = Request {
        code: hex::encode(code),
        env,
        trace,
    };
    Ok(serde_json::to_string(&request)?)
}

pub fn parse_response(line: &str) -> Response {
    let line = line.trim();
    if line.is_empty() {
        return Response::Error("Empty response".to_string());
    }

    let parsed: ResponseLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => return Response::Error(format!("Invalid response: {}", e)),
    };

    if let Some(error) = parsed.error {
        return Response::Error(error);
    }
    let gas_used = match parsed.gas_used {
        Some(gas) => gas,
        None => return Response::Error("Missing gasUsed".to_string()),
    };
    let output_hex = parsed.output.trim_start_matches("0x");
    let output = match hex::decode(output_hex) {
        Ok(output) => output,
        Err(e) => return Response::Error(format!("Invalid output: {}", e)),
    };

    Response::Executed {
        stats: ExecutionStats {
            gas_used,
            wall_time: parsed.wall_time_seconds,
            output,
            exception: parsed.exception,
        },
        trace: parsed.trace,
    }
}

/// Feed recorded events to a tracer. Steps with opcodes outside the
/// instruction table are skipped.
pub fn replay(trace: &[TraceEvent], tracer: &mut dyn ExecutionTracer) {
    for event in trace {
        match event {
            TraceEvent::Step {
                opcode,
                stack,
                elapsed_ns,
            } => {
                if let Some(instruction) = Instruction::from_byte(*opcode) {
                    tracer.on_step(instruction, stack, *elapsed_ns);
                }
            }
            TraceEvent::Sload { key } => tracer.on_storage_read(*key),
            TraceEvent::Sstore {
                key,
                original,
                current,
                new,
            } => tracer.on_storage_write(*key, *original, *current, *new),
            TraceEvent::Create { size } => tracer.on_create(*size),
            TraceEvent::Selfdestruct => tracer.on_selfdestruct(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_executed() {
        let response = parse_response(
            r#"{"gasUsed": 21010, "wallTimeSeconds": 0.5, "output": "0x0102", "exception": "None"}"#,
        );
        match response {
            Response::Executed { stats, trace } => {
                assert_eq!(stats.gas_used, 21010);
                assert_eq!(stats.wall_time, 0.5);
                assert_eq!(stats.output, vec![1, 2]);
                assert_eq!(stats.exception, ExceptionKind::None);
                assert!(trace.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_fault_kind() {
        let response = parse_response(r#"{"gasUsed": 5, "exception": "OutOfGas"}"#);
        match response {
            Response::Executed { stats, .. } => assert_eq!(stats.exception, ExceptionKind::OutOfGas),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_response("   "),
            Response::Error("Empty response".to_string())
        );
        assert_eq!(
            parse_response(r#"{"error": "bad code"}"#),
            Response::Error("bad code".to_string())
        );
        assert!(matches!(parse_response("not json"), Response::Error(_)));
        assert!(matches!(
            parse_response(r#"{"wallTimeSeconds": 1.0}"#),
            Response::Error(_)
        ));
    }

    #[test]
    fn test_trace_events() {
        let response = parse_response(
            r#"{"gasUsed": 1, "trace": [
                {"event": "step", "opcode": 241, "stack": ["0x0", "0x2", "0x64"]},
                {"event": "sstore", "key": "0x1", "original": "0x0", "current": "0x0", "new": "0x4"},
                {"event": "selfdestruct"}
            ]}"#,
        );
        let Response::Executed { trace, .. } = response else {
            panic!("expected execution");
        };
        assert_eq!(trace.len(), 3);
        assert_eq!(
            trace[1],
            TraceEvent::Sstore {
                key: U256::from(1u64),
                original: U256::ZERO,
                current: U256::ZERO,
                new: U256::from(4u64),
            }
        );
    }

    #[test]
    fn test_request_line() {
        let env = ExecutionEnv::default();
        let line = encode_request(&[0x60, 0x01], &env, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["code"], "6001");
        assert_eq!(value["trace"], true);
        assert!(value["env"]["gas"].is_u64());
    }
}
