//! Settings file.
//!
//! One JSON document bundling every tunable; each section and field is
//! optional and falls back to its default:
//!
//! ```json
//! {
//!   "executor": "evm-runner --fork constantinople",
//!   "metadata": "instructions.json",
//!   "engine": {"populationSize": 100, "generationsCount": 50},
//!   "benchmark": {"execCount": 20, "warmupCount": 2},
//!   "env": {"gas": 8000000}
//! }
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::benchmark::BenchmarkConfig;
use crate::error::{GasForgeError, Result};
use crate::evolution::GeneticEngineConfig;
use crate::executor::ExecutionEnv;
use crate::stream::Source;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Command line of the external VM process
    pub executor: Option<String>,
    /// Instruction metadata table; the built-in table when absent
    pub metadata: Option<PathBuf>,
    pub engine: GeneticEngineConfig,
    pub benchmark: BenchmarkConfig,
    pub env: ExecutionEnv,
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| GasForgeError::ConfigError(format!("settings: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut text = String::new();
        Source::open(path)
            .and_then(|mut source| Ok(source.read_to_string(&mut text)?))
            .map_err(|e| GasForgeError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.benchmark.validate()?;
        self.env.validate()?;
        if let Some(command) = &self.executor {
            if command.trim().is_empty() {
                return Err(GasForgeError::ConfigError(
                    "executor command is empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
