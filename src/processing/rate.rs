use chrono::Duration;

use crate::analysis::tariff::Tariff;
use crate::error::{MeterError, Result};
use crate::processing::debouncer::PulseEvent;

const SECONDS_PER_HOUR: f64 = 3600.0;
const WATTS_PER_KILOWATT: f64 = 1000.0;

/// Reading derived from one confirmed pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateReading {
    /// `None` for the first pulse ever, which has no interval to measure.
    pub power_watts: Option<f64>,
    pub energy_kwh_increment: f64,
}

impl RateReading {
    /// Integer watts as published on the metric channel.
    pub fn published_watts(&self) -> Option<i64> {
        self.power_watts.map(|w| w as i64)
    }
}

/// Average power over `interval_seconds` for one revolution of `turn_increment_kwh`.
pub fn power_from_interval(turn_increment_kwh: f64, interval_seconds: f64) -> f64 {
    WATTS_PER_KILOWATT * turn_increment_kwh * SECONDS_PER_HOUR / interval_seconds
}

/// Converts a pulse and its predecessor into instantaneous power.
///
/// Fails with [`MeterError::InvalidInterval`] when `event` is not strictly after
/// `prior`; callers still accrue the energy increment in that case.
pub fn on_pulse(event: PulseEvent, prior: Option<PulseEvent>, tariff: &Tariff) -> Result<RateReading> {
    let energy_kwh_increment = tariff.turn_increment_kwh;

    let power_watts = match prior {
        None => None,
        Some(prior) => {
            let interval = event.timestamp - prior.timestamp;
            if interval <= Duration::zero() {
                return Err(MeterError::InvalidInterval {
                    prior: prior.timestamp,
                    current: event.timestamp,
                });
            }
            let seconds = interval
                .num_microseconds()
                .map_or(interval.num_seconds() as f64, |us| us as f64 / 1e6);
            Some(power_from_interval(tariff.turn_increment_kwh, seconds))
        }
    };

    Ok(RateReading {
        power_watts,
        energy_kwh_increment,
    })
}
