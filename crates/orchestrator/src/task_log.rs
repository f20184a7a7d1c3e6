//! Per-file audit log.
//!
//! Each task owns exactly one `TaskLog`; `close` consumes it, so a log can be
//! neither shared between tasks nor closed twice.

use chrono::Local;
use log::Level;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct TaskLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TaskLog {
    /// Open (appending) the log at `path`
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line. Write failures are reported to the process log only.
    pub fn record(&mut self, level: Level, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Err(e) = writeln!(self.writer, "{} [{}] {}", stamp, level, message) {
            log::warn!("Failed to write to {}: {}", self.path.display(), e);
        }
    }

    pub fn info(&mut self, message: &str) {
        self.record(Level::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.record(Level::Warn, message);
    }

    pub fn error(&mut self, message: &str) {
        self.record(Level::Error, message);
    }

    /// Flush and close the log
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
