use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// Plain-text log of recoverable problems, one message per line, for a human
/// to review after a run. Truncated when created.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    file: File,
    entries: usize,
}

impl ErrorLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries: 0,
        })
    }

    pub fn record(&mut self, message: &str) -> Result<()> {
        warn!("{message}");
        writeln!(self.file, "{message}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}
