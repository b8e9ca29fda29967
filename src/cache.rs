//! Dropping the OS page cache between measurements.
//!
//! Needs root (or a writable `/proc/sys/vm/drop_caches`). The check is done
//! once, when the harness is built, so a search never starts without it.

use crate::error::{GasForgeError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DROP_CACHES_PATH: &str = "/proc/sys/vm/drop_caches";

#[derive(Debug, Clone)]
pub struct CacheDropper {
    control: PathBuf,
}

impl CacheDropper {
    /// Verify the privilege up front
    pub fn new() -> Result<Self> {
        Self::with_control_file(Path::new(DROP_CACHES_PATH))
    }

    pub fn with_control_file(control: &Path) -> Result<Self> {
        let is_root = unsafe { libc::geteuid() } == 0;
        if !is_root && !writable(control) {
            return Err(GasForgeError::PrivilegeError(format!(
                "dropping caches needs root or write access to {}",
                control.display()
            )));
        }
        Ok(Self {
            control: control.to_path_buf(),
        })
    }

    /// Flush dirty pages, then drop page cache, dentries and inodes
    pub fn drop_caches(&self) -> Result<()> {
        unsafe { libc::sync() };
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.control)
            .map_err(|e| privilege_or_io(&self.control, e))?;
        file.write_all(b"3\n")
            .map_err(|e| privilege_or_io(&self.control, e))?;
        Ok(())
    }
}

fn writable(path: &Path) -> bool {
    OpenOptions::new().write(true).open(path).is_ok()
}

fn privilege_or_io(path: &Path, err: std::io::Error) -> GasForgeError {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        GasForgeError::PrivilegeError(format!("{}: {}", path.display(), err))
    } else {
        GasForgeError::IoError(format!("{}: {}", path.display(), err))
    }
}
