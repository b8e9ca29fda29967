//! Reader for program corpora used by batch re-benchmarking.
//!
//! One JSON object per line:
//! `{"programs": [{"program": {"code": "<hex>"}}, ...], "blockNumber": 7}`.

use std::io::BufRead;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GasForgeError, Result};
use crate::program::Program;
use crate::stream::Source;

#[derive(Debug, Deserialize)]
struct CodeEntry {
    code: String,
}

#[derive(Debug, Deserialize)]
struct ProgramEntry {
    program: CodeEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorpusLine {
    programs: Vec<ProgramEntry>,
    #[serde(default)]
    block_number: Option<u64>,
}

/// Programs from one corpus line
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    /// 1-based line number in the source
    pub line: usize,
    pub block_number: Option<u64>,
    pub programs: Vec<Program>,
}

/// Parse one corpus line; `Ok(None)` for blank lines
pub fn parse_line(text: &str, line: usize) -> Result<Option<CorpusEntry>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let parsed: CorpusLine = serde_json::from_str(text)
        .map_err(|e| GasForgeError::IoError(format!("corpus line {}: {}", line, e)))?;
    let programs = parsed
        .programs
        .iter()
        .map(|entry| {
            Program::from_hex(&entry.program.code)
                .map_err(|e| GasForgeError::IoError(format!("corpus line {}: {}", line, e)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(CorpusEntry {
        line,
        block_number: parsed.block_number,
        programs,
    }))
}

/// Iterator over the entries of a corpus stream
pub struct CorpusReader<R: BufRead> {
    lines: std::io::Lines<R>,
    line: usize,
}

impl<R: BufRead> CorpusReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl CorpusReader<Source> {
    /// Open a corpus file; `-` reads stdin and `.gz` is decompressed
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Source::open(path)?))
    }
}

impl<R: BufRead> Iterator for CorpusReader<R> {
    type Item = Result<CorpusEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => {
                    return Some(Err(GasForgeError::IoError(format!(
                        "corpus line {}: {}",
                        self.line + 1,
                        e
                    ))))
                }
            };
            self.line += 1;
            match parse_line(&text, self.line) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
