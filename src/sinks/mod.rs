pub mod log_file;
pub mod publisher;

use chrono::NaiveDateTime;

use crate::error::Result;

// EVENT SINK CONTRACTS --------------------------------------------------------
//
// The pulse pipeline treats both sinks as best-effort: errors are reported by
// the caller and never stop the sampling loop.

/// Durable, append-only record of confirmed pulses.
pub trait EventLog: Send {
    fn append(&mut self, timestamp: NaiveDateTime) -> Result<()>;

    /// Forces buffered entries down to durable storage.
    fn flush(&mut self) -> Result<()>;
}

/// Publishes a scalar metric to a named channel.
pub trait MetricPublisher: Send {
    fn publish(&mut self, topic: &str, value: i64) -> Result<()>;

    /// Releases the channel. Further publishes may fail.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory log, useful for dry runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    pub entries: Vec<NaiveDateTime>,
    pub flushes: usize,
}

impl EventLog for MemoryLog {
    fn append(&mut self, timestamp: NaiveDateTime) -> Result<()> {
        self.entries.push(timestamp);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Discards every reading.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl MetricPublisher for NullPublisher {
    fn publish(&mut self, _topic: &str, _value: i64) -> Result<()> {
        Ok(())
    }
}
