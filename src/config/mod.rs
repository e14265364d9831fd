use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::analysis::tariff::Tariff;
use crate::error::{MeterError, Result};
use crate::processing::debouncer::DebounceConfig;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub tariff: Tariff,
    pub debounce: DebounceConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    /// Durable pulse log, one timestamp per line.
    pub log_path: PathBuf,
    /// Channel the power readings are published on.
    pub topic: String,
    pub flush_interval_secs: u64,
    /// Readings buffered for the publisher before new ones are dropped.
    pub publish_queue: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("log/log.csv"),
            topic: "smarter-meter/power".to_string(),
            flush_interval_secs: 15 * 60,
            publish_queue: 64,
        }
    }
}

/// Upper bound for debounce windows and the flush interval.
pub const MAX_WINDOW_SECS: u64 = 24 * 60 * 60;

impl SinkConfig {
    /// Flush interval as a duration, saturating at `Duration::MAX`.
    pub fn flush_interval(&self) -> Duration {
        i64::try_from(self.flush_interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

fn check_at_most(name: &str, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(MeterError::InvalidConfig(format!(
            "{} must be at most {}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.tariff.validate()?;

        let max_ms = MAX_WINDOW_SECS * 1000;
        check_at_most("debounce.confirm_window_ms", self.debounce.confirm_window_ms, max_ms)?;
        check_at_most("debounce.silence_window_ms", self.debounce.silence_window_ms, max_ms)?;
        check_at_most(
            "sink.flush_interval_secs",
            self.sink.flush_interval_secs,
            MAX_WINDOW_SECS,
        )?;

        if self.debounce.silence_window_ms == 0 {
            return Err(MeterError::InvalidConfig(
                "debounce.silence_window_ms must be greater than zero".to_string(),
            ));
        }
        if self.sink.topic.trim().is_empty() {
            return Err(MeterError::InvalidConfig(
                "sink.topic must not be empty".to_string(),
            ));
        }
        if self.sink.flush_interval_secs == 0 {
            return Err(MeterError::InvalidConfig(
                "sink.flush_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config_str = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}
