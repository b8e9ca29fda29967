//! gasforge: genetic search for mispriced bytecode.
//!
//! Evolves EVM programs whose wall-clock cost is out of proportion to the
//! gas they are charged, measures them through an external executor, and
//! explains the winners with an instruction-level profile.

pub mod benchmark;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod evolution;
pub mod executor;
pub mod generator;
pub mod instruction;
pub mod metadata;
pub mod profiler;
pub mod program;
pub mod protocol;
pub mod report;
pub mod stats;
pub mod stream;
pub mod usage;

pub use error::{GasForgeError, Result};
