//! Thread-safe report writer.
//!
//! Wraps a [`Sink`] in a mutex so evaluation workers can share one output
//! stream. Every record is written as a single JSON line and flushed while
//! the lock is held, so lines from different writers never interleave.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{GasForgeError, Result};
use crate::stream::Sink;

struct Inner {
    path: PathBuf,
    /// Opened on first write
    sink: Option<Sink>,
    records: u64,
}

/// Clonable handle to a shared line-oriented JSON sink
#[derive(Clone)]
pub struct ReportWriter {
    inner: Arc<Mutex<Inner>>,
}

impl ReportWriter {
    /// Nothing is opened until the first record arrives
    pub fn new(path: &Path) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                path: path.to_path_buf(),
                sink: None,
                records: 0,
            })),
        }
    }

    /// Serialize `record` and append it as one line
    pub fn write_record<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| GasForgeError::IoError(format!("Lock poisoned: {}", e)))?;
        if guard.sink.is_none() {
            let sink = Sink::open(&guard.path)?;
            guard.sink = Some(sink);
        }
        if let Some(sink) = guard.sink.as_mut() {
            sink.write_all(line.as_bytes())?;
            sink.write_all(b"\n")?;
            sink.flush()?;
        }
        guard.records += 1;
        Ok(())
    }

    /// Records written so far through any clone of this handle
    pub fn records(&self) -> u64 {
        self.inner.lock().map(|guard| guard.records).unwrap_or(0)
    }

    pub fn path(&self) -> PathBuf {
        self.inner
            .lock()
            .map(|guard| guard.path.clone())
            .unwrap_or_default()
    }

    /// Close the sink. Later writes reopen it in append mode.
    pub fn finish(&self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| GasForgeError::IoError(format!("Lock poisoned: {}", e)))?;
        match guard.sink.take() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }
}
