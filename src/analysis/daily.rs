use std::io::Write;
use std::iter::Fuse;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use super::tariff::{RateTier, Tariff};
use crate::error::Result;

/// Energy and cost rolled up for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    /// Revolutions counted on this day.
    pub revolutions: u64,
    /// Revolutions billed at the low rate.
    pub low_revolutions: u64,
    pub energy_kwh: f64,
    pub cost: f64,
}

struct DayTally {
    date: NaiveDate,
    low: u64,
    high: u64,
}

impl DayTally {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            low: 0,
            high: 0,
        }
    }

    fn count(&mut self, timestamp: NaiveDateTime, tariff: &Tariff) {
        match tariff.tier_at(timestamp) {
            RateTier::Low => self.low += 1,
            RateTier::High => self.high += 1,
        }
    }

    // Costs are derived from integer counts so no per-pulse rounding accumulates.
    fn into_bucket(self, tariff: &Tariff) -> DailyBucket {
        let revolutions = self.low + self.high;
        DailyBucket {
            date: self.date,
            revolutions,
            low_revolutions: self.low,
            energy_kwh: revolutions as f64 * tariff.turn_increment_kwh,
            cost: tariff.cost_of(self.low, RateTier::Low) + tariff.cost_of(self.high, RateTier::High),
        }
    }
}

/// Lazily rolls a time-ordered pulse stream into per-day buckets.
///
/// The first pulse of the stream is the reference point and carries no
/// energy, so `N` pulses yield `N - 1` revolutions in total. Each later pulse
/// is counted on its own calendar date and billed by its own time of day.
/// Days without pulses produce no bucket; the trailing day is always emitted.
pub struct DailyAggregator<I: Iterator<Item = NaiveDateTime>> {
    timestamps: Fuse<I>,
    tariff: Tariff,
    current: Option<DayTally>,
}

impl<I: Iterator<Item = NaiveDateTime>> DailyAggregator<I> {
    pub fn new<T>(timestamps: T, tariff: Tariff) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            timestamps: timestamps.into_iter().fuse(),
            tariff,
            current: None,
        }
    }
}

impl<I: Iterator<Item = NaiveDateTime>> Iterator for DailyAggregator<I> {
    type Item = DailyBucket;

    fn next(&mut self) -> Option<DailyBucket> {
        while let Some(timestamp) = self.timestamps.next() {
            let date = timestamp.date();
            match self.current.as_mut() {
                // Seeds the running day; nothing to count before the first pulse.
                None => self.current = Some(DayTally::new(date)),
                Some(tally) if tally.date == date => tally.count(timestamp, &self.tariff),
                Some(_) => {
                    let mut next_day = DayTally::new(date);
                    next_day.count(timestamp, &self.tariff);
                    let finished = self.current.replace(next_day);
                    return finished.map(|tally| tally.into_bucket(&self.tariff));
                }
            }
        }

        self.current
            .take()
            .map(|tally| tally.into_bucket(&self.tariff))
    }
}

/// Buckets for a whole series of timestamps.
pub fn aggregate(
    series: &[NaiveDateTime],
    tariff: Tariff,
) -> DailyAggregator<std::iter::Copied<std::slice::Iter<'_, NaiveDateTime>>> {
    DailyAggregator::new(series.iter().copied(), tariff)
}

/// Totals over a set of daily buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailySummary {
    pub days: usize,
    pub revolutions: u64,
    pub energy_kwh: f64,
    pub cost: f64,
}

impl DailySummary {
    pub fn from_buckets(buckets: &[DailyBucket], tariff: &Tariff) -> Self {
        let revolutions: u64 = buckets.iter().map(|b| b.revolutions).sum();
        let low: u64 = buckets.iter().map(|b| b.low_revolutions).sum();
        Self {
            days: buckets.len(),
            revolutions,
            energy_kwh: revolutions as f64 * tariff.turn_increment_kwh,
            cost: tariff.cost_of(low, RateTier::Low)
                + tariff.cost_of(revolutions - low, RateTier::High),
        }
    }
}

/// Writes buckets as CSV with a header row.
pub fn write_daily_csv<W: Write>(buckets: &[DailyBucket], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for bucket in buckets {
        csv_writer.serialize(bucket)?;
    }
    csv_writer.flush()?;
    Ok(())
}
