use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveDateTime;
use log::{info, warn};

use super::window::{query, WindowStats};
use crate::error::{MeterError, Result};
use crate::processing::rate::power_from_interval;
use crate::sinks::log_file::parse_timestamp;

/// Append-only pulse history with index-aligned derived arrays.
///
/// `power[i]` is the average power between pulse `i - 1` and pulse `i`
/// (`power[0] == 0`), and `energy[i] == i * turn_increment_kwh`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalSeries {
    turn_increment_kwh: f64,
    timestamps: Vec<NaiveDateTime>,
    power: Vec<f64>,
    energy: Vec<f64>,
}

impl HistoricalSeries {
    pub fn new(turn_increment_kwh: f64) -> Self {
        Self {
            turn_increment_kwh,
            timestamps: Vec::new(),
            power: Vec::new(),
            energy: Vec::new(),
        }
    }

    /// Builds a series from sorted timestamps. Fails on the first timestamp
    /// earlier than its predecessor.
    pub fn from_timestamps<I>(timestamps: I, turn_increment_kwh: f64) -> Result<Self>
    where
        I: IntoIterator<Item = NaiveDateTime>,
    {
        let mut series = Self::new(turn_increment_kwh);
        for timestamp in timestamps {
            if let Some(&last) = series.timestamps.last() {
                if timestamp < last {
                    return Err(MeterError::InvalidInterval {
                        prior: last,
                        current: timestamp,
                    });
                }
            }
            series.push_sorted(timestamp);
        }
        Ok(series)
    }

    /// Reads the durable log format, one timestamp per line.
    ///
    /// Malformed and out-of-order lines are skipped and returned alongside the
    /// series. Fails with [`MeterError::EmptySeries`] only when no valid line remains.
    pub fn parse_lines<R: BufRead>(
        reader: R,
        turn_increment_kwh: f64,
    ) -> Result<(Self, Vec<MeterError>)> {
        let mut series = Self::new(turn_increment_kwh);
        let mut skipped = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let timestamp = match parse_timestamp(&line, index + 1) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping log line: {}", e);
                    skipped.push(e);
                    continue;
                }
            };

            if let Some(&last) = series.timestamps.last() {
                if timestamp < last {
                    let e = MeterError::InvalidInterval {
                        prior: last,
                        current: timestamp,
                    };
                    warn!("Skipping log line {}: {}", index + 1, e);
                    skipped.push(e);
                    continue;
                }
            }

            series.push_sorted(timestamp);
        }

        if series.is_empty() {
            return Err(MeterError::EmptySeries);
        }
        Ok((series, skipped))
    }

    pub fn load<P: AsRef<Path>>(path: P, turn_increment_kwh: f64) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let (series, skipped) = Self::parse_lines(reader, turn_increment_kwh)?;
        info!(
            "Loaded {} pulses from {} ({} lines skipped)",
            series.len(),
            path.display(),
            skipped.len()
        );
        Ok(series)
    }

    /// Appends a live pulse. Timestamps must be strictly increasing.
    pub fn push(&mut self, timestamp: NaiveDateTime) -> Result<()> {
        if let Some(&last) = self.timestamps.last() {
            if timestamp <= last {
                return Err(MeterError::InvalidInterval {
                    prior: last,
                    current: timestamp,
                });
            }
        }
        self.push_sorted(timestamp);
        Ok(())
    }

    fn push_sorted(&mut self, timestamp: NaiveDateTime) {
        let power = match self.timestamps.last() {
            None => 0.0,
            Some(&last) => {
                let interval = timestamp - last;
                let seconds = interval
                    .num_microseconds()
                    .map_or(interval.num_seconds() as f64, |us| us as f64 / 1e6);
                if seconds > 0.0 {
                    power_from_interval(self.turn_increment_kwh, seconds)
                } else {
                    warn!("Duplicate pulse timestamp {}; power recorded as 0", timestamp);
                    0.0
                }
            }
        };

        let index = self.timestamps.len();
        self.timestamps.push(timestamp);
        self.power.push(power);
        self.energy.push(index as f64 * self.turn_increment_kwh);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn turn_increment_kwh(&self) -> f64 {
        self.turn_increment_kwh
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn power(&self) -> &[f64] {
        &self.power
    }

    pub fn energy(&self) -> &[f64] {
        &self.energy
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        self.timestamps.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }

    /// Energy between the first and the last pulse.
    pub fn total_energy_kwh(&self) -> f64 {
        self.energy.last().copied().unwrap_or(0.0)
    }

    pub fn query(&self, window_start: NaiveDateTime, window_end: NaiveDateTime) -> WindowStats {
        query(
            &self.timestamps,
            &self.power,
            &self.energy,
            window_start,
            window_end,
        )
    }
}

// SHARED SERIES ---------------------------------------------------------------

/// Series shared between the sampling thread (single writer) and query readers.
#[derive(Debug, Clone)]
pub struct SharedSeries {
    inner: Arc<RwLock<HistoricalSeries>>,
}

impl SharedSeries {
    pub fn new(series: HistoricalSeries) -> Self {
        Self {
            inner: Arc::new(RwLock::new(series)),
        }
    }

    pub fn append(&self, timestamp: NaiveDateTime) -> Result<()> {
        let mut series = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        series.push(timestamp)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the series as of now; later appends are not visible in it.
    pub fn snapshot(&self) -> HistoricalSeries {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs one windowed query under the read lock, over the length seen at entry.
    pub fn query(&self, window_start: NaiveDateTime, window_end: NaiveDateTime) -> WindowStats {
        let series = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        series.query(window_start, window_end)
    }
}
