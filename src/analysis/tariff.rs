use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{MeterError, Result};

/// Energy represented by one wheel revolution on the installed meter (75 rev/kWh).
pub const DEFAULT_TURN_INCREMENT_KWH: f64 = 1.0 / 75.0;

/// Two-tier time-of-day tariff.
///
/// `low_start..low_end` is half-open. When `low_start > low_end` the low window
/// wraps across midnight, i.e. it is `[low_start, 24:00) ∪ [00:00, low_end)`.
/// Equal bounds describe an empty low window (single-rate contract).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Tariff {
    pub turn_increment_kwh: f64,
    pub high_rate: f64,
    pub low_rate: f64,
    #[serde(with = "time_of_day")]
    pub low_start: NaiveTime,
    #[serde(with = "time_of_day")]
    pub low_end: NaiveTime,
}

/// Which tier a pulse was billed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    High,
    Low,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            turn_increment_kwh: DEFAULT_TURN_INCREMENT_KWH,
            high_rate: 0.3,
            low_rate: 0.2,
            low_start: NaiveTime::from_hms_opt(21, 55, 0).unwrap_or_default(),
            low_end: NaiveTime::from_hms_opt(5, 55, 0).unwrap_or_default(),
        }
    }
}

impl Tariff {
    pub fn validate(&self) -> Result<()> {
        if !(self.turn_increment_kwh.is_finite() && self.turn_increment_kwh > 0.0) {
            return Err(MeterError::InvalidConfig(format!(
                "turn_increment_kwh must be positive, got {}",
                self.turn_increment_kwh
            )));
        }
        for (name, rate) in [("high_rate", self.high_rate), ("low_rate", self.low_rate)] {
            if !(rate.is_finite() && rate >= 0.0) {
                return Err(MeterError::InvalidConfig(format!(
                    "{} must be a non-negative price, got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }

    pub fn is_low_rate(&self, time: NaiveTime) -> bool {
        if self.low_start <= self.low_end {
            self.low_start <= time && time < self.low_end
        } else {
            // Wrapping window: evening part or early-morning part.
            time >= self.low_start || time < self.low_end
        }
    }

    pub fn tier_at(&self, timestamp: NaiveDateTime) -> RateTier {
        if self.is_low_rate(timestamp.time()) {
            RateTier::Low
        } else {
            RateTier::High
        }
    }

    pub fn rate(&self, tier: RateTier) -> f64 {
        match tier {
            RateTier::High => self.high_rate,
            RateTier::Low => self.low_rate,
        }
    }

    /// Price per kWh applying at `timestamp`.
    pub fn rate_at(&self, timestamp: NaiveDateTime) -> f64 {
        self.rate(self.tier_at(timestamp))
    }

    /// Cost of `pulses` revolutions billed at `tier`.
    pub fn cost_of(&self, pulses: u64, tier: RateTier) -> f64 {
        pulses as f64 * self.turn_increment_kwh * self.rate(tier)
    }
}

/// Serialises times of day as `HH:MM`, accepting `HH:MM:SS` on input.
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&text, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&text, "%H:%M:%S"))
            .map_err(|e| de::Error::custom(format!("invalid time of day {:?}: {}", text, e)))
    }
}
