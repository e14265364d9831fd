use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{error, info};

use super::EventLog;
use crate::error::{MeterError, Result};

/// Line format of the durable pulse log (microsecond precision, local time).
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Accepts any number of fractional digits, including none.
const PARSE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(LOG_TIMESTAMP_FORMAT).to_string()
}

/// Parses one log line. `line` is the 1-based line number used in errors.
pub fn parse_timestamp(text: &str, line: usize) -> Result<NaiveDateTime> {
    let trimmed = text.trim_end_matches(['\r', '\n']).trim();
    NaiveDateTime::parse_from_str(trimmed, PARSE_TIMESTAMP_FORMAT).map_err(|source| {
        MeterError::MalformedTimestamp {
            line,
            text: trimmed.to_string(),
            source,
        }
    })
}

/// Append-only pulse log, opened once and flushed when dropped.
///
/// # Arguments
///
/// * `path` - Log file; missing parent directories are created.
pub struct PulseLogFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    pending: usize,
}

impl PulseLogFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Appending pulses to {}", path.display());

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            pending: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written since the last flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Flushes and releases the file handle. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
            self.pending = 0;
            info!("Closed pulse log {}", self.path.display());
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| {
            MeterError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pulse log already closed",
            ))
        })
    }
}

impl EventLog for PulseLogFile {
    fn append(&mut self, timestamp: NaiveDateTime) -> Result<()> {
        let line = format_timestamp(timestamp);
        writeln!(self.writer()?, "{}", line)?;
        self.pending += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for PulseLogFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to flush pulse log {}: {}", self.path.display(), e);
        }
    }
}
