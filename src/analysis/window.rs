use std::ops::Range;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::series::HistoricalSeries;

pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const HOURS_PER_DAY: f64 = 24.0;

/// Headroom applied above the window maximum when scaling a power axis.
const POWER_AXIS_HEADROOM: f64 = 1.05;

const LABEL_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Aggregate statistics for one `[start, end)` window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    /// `first..last`: first index at or after the start, first index at or after the end.
    pub index_range: Range<usize>,
    pub energy_delta_kwh: f64,
    /// `None` ("no reading") when the window holds fewer than two pulses.
    pub max_power_w: Option<f64>,
    pub min_power_w: Option<f64>,
    /// Window start as `YYYY-MM-DD HH:MM`.
    pub label: String,
}

impl WindowStats {
    pub fn pulses(&self) -> usize {
        self.index_range.len()
    }

    pub fn max_power_or_zero(&self) -> f64 {
        self.max_power_w.unwrap_or(0.0)
    }

    pub fn energy_label(&self) -> String {
        format!("{:.2}kWh", self.energy_delta_kwh)
    }

    pub fn power_ceiling(&self) -> f64 {
        self.max_power_or_zero() * POWER_AXIS_HEADROOM
    }
}

/// Resolves `[window_start, window_end)` against a timestamp-sorted series.
///
/// Both bounds are found by binary search. Bounds outside the series clamp to
/// the nearest valid index, so the call never fails; an empty or out-of-range
/// window yields a zero energy delta and no power reading.
pub fn query(
    timestamps: &[NaiveDateTime],
    power: &[f64],
    energy: &[f64],
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
) -> WindowStats {
    // Only the prefix present in all three arrays is considered.
    let len = timestamps.len().min(power.len()).min(energy.len());
    let timestamps = &timestamps[..len];

    let first = timestamps.partition_point(|t| *t < window_start);
    let last = first + timestamps[first..].partition_point(|t| *t < window_end);

    let label = window_start.format(LABEL_FORMAT).to_string();

    if len == 0 {
        return WindowStats {
            index_range: 0..0,
            energy_delta_kwh: 0.0,
            max_power_w: None,
            min_power_w: None,
            label,
        };
    }

    let energy_delta_kwh = energy[last.min(len - 1)] - energy[first.min(len - 1)];

    let (max_power_w, min_power_w) = if last - first < 2 {
        (None, None)
    } else {
        let window = &power[first..last];
        let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = window.iter().copied().fold(f64::INFINITY, f64::min);
        (Some(max), Some(min))
    };

    WindowStats {
        index_range: first..last,
        energy_delta_kwh,
        max_power_w,
        min_power_w,
        label,
    }
}

// WINDOW POSITION -------------------------------------------------------------

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Real-valued day offset from 1970-01-01 00:00 (naive local time).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct WindowPosition(pub f64);

impl WindowPosition {
    pub fn from_datetime(timestamp: NaiveDateTime) -> Self {
        let elapsed = timestamp - epoch();
        let seconds = elapsed
            .num_microseconds()
            .map_or(elapsed.num_seconds() as f64, |us| us as f64 / 1e6);
        Self(seconds / SECONDS_PER_DAY)
    }

    /// Whole days since the epoch containing `timestamp`.
    pub fn day_of(timestamp: NaiveDateTime) -> Self {
        Self(Self::from_datetime(timestamp).0.floor())
    }

    pub fn days(&self) -> f64 {
        self.0
    }

    /// Start of the window, rounded to the second.
    ///
    /// Offsets beyond the representable calendar clamp to
    /// `NaiveDateTime::MIN` / `NaiveDateTime::MAX`; NaN is the epoch itself.
    pub fn start(&self) -> NaiveDateTime {
        if self.0.is_nan() {
            return epoch();
        }
        let seconds = (self.0 * SECONDS_PER_DAY).round();
        let limit = if seconds < 0.0 {
            NaiveDateTime::MIN
        } else {
            NaiveDateTime::MAX
        };
        // `as` saturates at the i64 bounds.
        Duration::try_seconds(seconds as i64)
            .and_then(|offset| epoch().checked_add_signed(offset))
            .unwrap_or(limit)
    }

    /// `[start, start + 1 day)`, with the end clamped to `NaiveDateTime::MAX`.
    pub fn day_window(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.start();
        let end = start
            .checked_add_signed(Duration::days(1))
            .unwrap_or(NaiveDateTime::MAX);
        (start, end)
    }
}

/// Day-long window stepped across a loaded series.
///
/// Fine steps move by one hour, coarse steps by one day; the position stays
/// within the whole days spanned by the series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayNavigator {
    position: f64,
    min: f64,
    max: f64,
}

impl DayNavigator {
    pub fn new(min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            position: max,
            min,
            max,
        }
    }

    /// Starts on the day of the most recent pulse. `None` for an empty series.
    pub fn for_series(series: &HistoricalSeries) -> Option<Self> {
        let first = WindowPosition::day_of(series.first()?);
        let last = WindowPosition::day_of(series.last()?);
        Some(Self::new(first.days(), last.days()))
    }

    pub fn position(&self) -> WindowPosition {
        WindowPosition(self.position)
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn set(&mut self, days: f64) -> WindowPosition {
        if days.is_nan() {
            return self.position();
        }
        // Snap to the hour grid so repeated fine steps do not drift.
        let snapped = (days * HOURS_PER_DAY).round() / HOURS_PER_DAY;
        self.position = snapped.clamp(self.min, self.max);
        self.position()
    }

    pub fn step_hours(&mut self, hours: i32) -> WindowPosition {
        self.set(self.position + hours as f64 / HOURS_PER_DAY)
    }

    pub fn step_days(&mut self, days: i32) -> WindowPosition {
        self.set(self.position + days as f64)
    }

    pub fn query(&self, series: &HistoricalSeries) -> WindowStats {
        let (start, end) = self.position().day_window();
        series.query(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INC: f64 = 1.0 / 75.0;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn series(times: &[NaiveDateTime]) -> HistoricalSeries {
        HistoricalSeries::from_timestamps(times.iter().copied(), INC).unwrap()
    }

    #[test]
    fn full_range_returns_total_energy() {
        let s = series(&[at(1, 8, 0), at(1, 9, 0), at(1, 9, 30), at(2, 7, 0)]);
        let stats = s.query(at(1, 8, 0), at(2, 7, 0) + Duration::seconds(1));
        assert_eq!(stats.index_range, 0..4);
        assert!((stats.energy_delta_kwh - s.total_energy_kwh()).abs() < 1e-12);
    }

    #[test]
    fn start_bound_is_inclusive_end_bound_exclusive() {
        let s = series(&[at(1, 8, 0), at(1, 9, 0), at(1, 10, 0), at(1, 11, 0)]);
        let stats = s.query(at(1, 9, 0), at(1, 11, 0));
        assert_eq!(stats.index_range, 1..3);
        // Delta runs up to the first pulse at or after the end bound.
        assert!((stats.energy_delta_kwh - 2.0 * INC).abs() < 1e-12);
        // One revolution per hour in both slots.
        assert!((stats.max_power_w.unwrap() - 1000.0 / 75.0).abs() < 1e-9);
        assert_eq!(stats.max_power_w, stats.min_power_w);
    }

    #[test]
    fn max_and_min_power_in_window() {
        let s = series(&[at(1, 8, 0), at(1, 8, 1), at(1, 8, 11), at(1, 9, 11)]);
        let stats = s.query(at(1, 8, 1), at(1, 10, 0));
        assert_eq!(stats.index_range, 1..4);
        assert!((stats.max_power_w.unwrap() - 800.0).abs() < 1e-9);
        assert!((stats.min_power_w.unwrap() - 1000.0 / 75.0).abs() < 1e-9);
        assert_eq!(stats.label, "2024-02-01 08:01");
        assert_eq!(stats.energy_label(), "0.03kWh");
    }

    #[test]
    fn window_outside_series_clamps() {
        let s = series(&[at(1, 8, 0), at(1, 9, 0)]);
        let after = s.query(at(5, 0, 0), at(6, 0, 0));
        assert_eq!(after.energy_delta_kwh, 0.0);
        assert_eq!(after.index_range, 2..2);
        assert!(after.max_power_w.is_none());

        let before = s.query(at(1, 0, 0), at(1, 1, 0));
        assert_eq!(before.energy_delta_kwh, 0.0);
        assert_eq!(before.pulses(), 0);
    }

    #[test]
    fn single_pulse_window_has_no_reading() {
        let s = series(&[at(1, 8, 0), at(1, 9, 0), at(1, 10, 0)]);
        let stats = s.query(at(1, 8, 30), at(1, 9, 30));
        assert_eq!(stats.pulses(), 1);
        assert!(stats.max_power_w.is_none());
        assert_eq!(stats.max_power_or_zero(), 0.0);
        assert_eq!(stats.power_ceiling(), 0.0);
    }

    #[test]
    fn empty_series_never_fails() {
        let s = HistoricalSeries::new(INC);
        let stats = s.query(at(1, 0, 0), at(2, 0, 0));
        assert_eq!(stats.energy_delta_kwh, 0.0);
        assert!(stats.max_power_w.is_none());
        assert!(DayNavigator::for_series(&s).is_none());
    }

    #[test]
    fn inverted_window_is_empty() {
        let s = series(&[at(1, 8, 0), at(1, 9, 0), at(1, 10, 0)]);
        let stats = s.query(at(1, 10, 0), at(1, 8, 0));
        assert_eq!(stats.pulses(), 0);
        assert_eq!(stats.energy_delta_kwh, 0.0);
    }

    #[test]
    fn position_round_trips_through_datetime() {
        let t = at(3, 6, 0);
        let position = WindowPosition::from_datetime(t);
        assert_eq!(position.start(), t);
        assert_eq!(WindowPosition::day_of(t).start(), at(3, 0, 0));
        assert_eq!(position.day_window().1, at(4, 6, 0));
    }

    #[test]
    fn extreme_offsets_clamp_to_calendar_limits() {
        assert_eq!(WindowPosition(1e12).start(), NaiveDateTime::MAX);
        assert_eq!(WindowPosition(f64::INFINITY).start(), NaiveDateTime::MAX);
        assert_eq!(WindowPosition(-1e9).start(), NaiveDateTime::MIN);
        assert_eq!(WindowPosition(f64::NEG_INFINITY).start(), NaiveDateTime::MIN);
        assert_eq!(WindowPosition(f64::NAN).start(), epoch());

        assert_eq!(
            WindowPosition(1e12).day_window(),
            (NaiveDateTime::MAX, NaiveDateTime::MAX)
        );
        let (start, end) = WindowPosition(-1e9).day_window();
        assert_eq!(start, NaiveDateTime::MIN);
        assert_eq!(end, NaiveDateTime::MIN + Duration::days(1));

        let s = series(&[at(1, 8, 0), at(1, 9, 0)]);
        let (start, end) = WindowPosition(1e12).day_window();
        let stats = s.query(start, end);
        assert_eq!(stats.index_range, 2..2);
        assert_eq!(stats.energy_delta_kwh, 0.0);
        let (start, end) = WindowPosition(-1e9).day_window();
        assert_eq!(s.query(start, end).pulses(), 0);
    }

    #[test]
    fn navigator_ignores_nan_position() {
        let s = series(&[at(1, 8, 0), at(2, 9, 0)]);
        let mut nav = DayNavigator::for_series(&s).unwrap();
        assert_eq!(nav.set(f64::NAN).start(), at(2, 0, 0));
    }

    #[test]
    fn navigator_steps_and_clamps() {
        let s = series(&[at(1, 8, 0), at(2, 9, 0), at(4, 23, 0)]);
        let mut nav = DayNavigator::for_series(&s).unwrap();
        assert_eq!(nav.position().start(), at(4, 0, 0));

        assert_eq!(nav.step_days(1).start(), at(4, 0, 0));
        assert_eq!(nav.step_hours(-3).start(), at(3, 21, 0));
        for _ in 0..48 {
            nav.step_hours(-1);
        }
        assert_eq!(nav.position().start(), at(1, 21, 0));
        assert_eq!(nav.step_days(-5).start(), at(1, 0, 0));

        let stats = nav.query(&s);
        assert_eq!(stats.index_range, 0..1);
        assert_eq!(stats.label, "2024-02-01 00:00");
    }
}
