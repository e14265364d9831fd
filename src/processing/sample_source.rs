use std::io::{BufRead, Lines};

use chrono::{Duration, Local, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::debouncer::DetectionSample;
use crate::error::{MeterError, Result};
use crate::processing::rate::power_from_interval;
use crate::sinks::log_file::parse_timestamp;

/// Producer of classified detection samples, in arrival order.
pub trait SampleSource {
    /// `None` once the source is exhausted.
    fn next_sample(&mut self) -> Option<Result<DetectionSample>>;
}

// LINE SOURCE -----------------------------------------------------------------

/// Reads samples written by an external classifier, one per line.
///
/// Accepted forms are `1`, `0`, `true`, `false` or `<timestamp>,<flag>` with the
/// pulse log timestamp format. Lines without a timestamp are stamped with the
/// local wall clock on arrival.
pub struct LineSampleSource<R: BufRead> {
    lines: Lines<R>,
    line: usize,
    clock: fn() -> NaiveDateTime,
}

fn wall_clock() -> NaiveDateTime {
    Local::now().naive_local()
}

impl<R: BufRead> LineSampleSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_clock(reader, wall_clock)
    }

    pub fn with_clock(reader: R, clock: fn() -> NaiveDateTime) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            clock,
        }
    }

    fn parse(&self, text: &str) -> Result<DetectionSample> {
        let (timestamp, flag) = match text.split_once(',') {
            Some((timestamp, flag)) => (parse_timestamp(timestamp, self.line)?, flag.trim()),
            None => ((self.clock)(), text),
        };

        let detected = match flag.to_ascii_lowercase().as_str() {
            "1" | "true" => true,
            "0" | "false" => false,
            _ => {
                return Err(MeterError::InvalidSample {
                    line: self.line,
                    text: text.to_string(),
                })
            }
        };

        Ok(DetectionSample::new(timestamp, detected))
    }
}

impl<R: BufRead> SampleSource for LineSampleSource<R> {
    fn next_sample(&mut self) -> Option<Result<DetectionSample>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;

            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            return Some(self.parse(text));
        }
    }
}

// SIMULATED WHEEL -------------------------------------------------------------

/// Synthetic marker signal for a wheel turning at constant load.
pub struct SimulatedWheel {
    rng: StdRng,
    now: NaiveDateTime,
    frame_interval: Duration,
    revolution_period: Duration,
    /// Portion of each revolution during which the marker is in view.
    marker_duty: f64,
    flicker_probability: f64,
    phase: Duration,
    revolutions_left: Option<u64>,
}

impl SimulatedWheel {
    /// # Arguments
    ///
    /// * `start` - Timestamp of the first frame.
    /// * `revolution_period` - Time for one full turn of the wheel.
    /// * `frame_interval` - Time between frames (~70 ms at 12-15 fps).
    pub fn new(start: NaiveDateTime, revolution_period: Duration, frame_interval: Duration) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            now: start,
            frame_interval,
            revolution_period,
            marker_duty: 0.1,
            flicker_probability: 0.0,
            phase: Duration::zero(),
            revolutions_left: None,
        }
    }

    /// Wheel speed matching a constant load of `watts`.
    pub fn for_power(start: NaiveDateTime, watts: f64, turn_increment_kwh: f64) -> Self {
        // Inverse of the power formula evaluated at a one-second interval.
        let period_s = power_from_interval(turn_increment_kwh, 1.0) / watts.max(1.0);
        let period = Duration::milliseconds((period_s * 1000.0).round() as i64);
        Self::new(start, period, Duration::milliseconds(70))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_marker_duty(mut self, duty: f64) -> Self {
        self.marker_duty = duty.clamp(0.0, 1.0);
        self
    }

    /// Probability that a single frame is misclassified.
    pub fn with_flicker(mut self, probability: f64) -> Self {
        self.flicker_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_revolutions(mut self, revolutions: u64) -> Self {
        self.revolutions_left = Some(revolutions);
        self
    }

    pub fn revolution_period(&self) -> Duration {
        self.revolution_period
    }
}

impl SampleSource for SimulatedWheel {
    fn next_sample(&mut self) -> Option<Result<DetectionSample>> {
        if self.revolutions_left == Some(0)
            || self.revolution_period <= Duration::zero()
            || self.frame_interval <= Duration::zero()
        {
            return None;
        }

        let period_ms = self.revolution_period.num_milliseconds() as f64;
        let visible = (self.phase.num_milliseconds() as f64) < period_ms * self.marker_duty;
        let detected = if self.rng.gen_bool(self.flicker_probability) {
            !visible
        } else {
            visible
        };
        let sample = DetectionSample::new(self.now, detected);

        self.now += self.frame_interval;
        self.phase = self.phase + self.frame_interval;
        // A frame longer than one turn can complete several revolutions.
        while self.phase >= self.revolution_period {
            self.phase = self.phase - self.revolution_period;
            if let Some(left) = self.revolutions_left.as_mut() {
                *left = left.saturating_sub(1);
            }
        }

        Some(Ok(sample))
    }
}
