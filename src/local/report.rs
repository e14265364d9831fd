use std::fs::File;
use std::path::Path;

use colored::Colorize;

use crate::analysis::daily::{aggregate, write_daily_csv, DailyBucket, DailySummary};
use crate::analysis::series::HistoricalSeries;
use crate::analysis::window::{WindowPosition, WindowStats};
use crate::config::Config;
use crate::error::Result;

/// Loads the pulse log and rolls it up per day.
pub fn daily_report<P: AsRef<Path>>(
    log_path: P,
    config: &Config,
) -> Result<(Vec<DailyBucket>, DailySummary)> {
    let series = HistoricalSeries::load(log_path, config.tariff.turn_increment_kwh)?;
    let buckets: Vec<DailyBucket> = aggregate(series.timestamps(), config.tariff).collect();
    let summary = DailySummary::from_buckets(&buckets, &config.tariff);
    Ok((buckets, summary))
}

pub fn print_daily_report(buckets: &[DailyBucket], summary: &DailySummary) {
    println!(
        "{}",
        format!("{:<12}{:>8}{:>12}{:>10}", "Date", "Turns", "Energy", "Cost").bold()
    );
    for bucket in buckets {
        println!(
            "{:<12}{:>8}{:>12}{:>10}",
            bucket.date.format("%Y-%m-%d").to_string(),
            bucket.revolutions,
            format!("{:.2}kWh", bucket.energy_kwh),
            format!("{:.2}€", bucket.cost),
        );
    }
    println!(
        "{}",
        format!(
            "{:<12}{:>8}{:>12}{:>10}",
            format!("{} days", summary.days),
            summary.revolutions,
            format!("{:.1}kWh", summary.energy_kwh),
            format!("{:.2}€", summary.cost),
        )
        .green()
        .bold()
    );
}

/// Writes the daily buckets to `out_path` as CSV.
pub fn export_daily_csv<P: AsRef<Path>>(buckets: &[DailyBucket], out_path: P) -> Result<()> {
    let file = File::create(out_path)?;
    write_daily_csv(buckets, file)
}

/// One day-long windowed query starting `day_offset` days after the epoch.
pub fn window_report<P: AsRef<Path>>(
    log_path: P,
    day_offset: f64,
    config: &Config,
) -> Result<WindowStats> {
    let series = HistoricalSeries::load(log_path, config.tariff.turn_increment_kwh)?;
    let (start, end) = WindowPosition(day_offset).day_window();
    Ok(series.query(start, end))
}

pub fn print_window(stats: &WindowStats) {
    let max = match stats.max_power_w {
        Some(w) => format!("{:.0} W", w),
        None => "no reading".to_string(),
    };
    let min = match stats.min_power_w {
        Some(w) => format!("{:.0} W", w),
        None => "no reading".to_string(),
    };
    println!("{}", stats.label.bold());
    println!("  energy  {}", stats.energy_label().cyan());
    println!("  max     {}", max.red());
    println!("  min     {}", min);
    println!("  pulses  {}", stats.pulses());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn report_and_window_from_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let mut file = File::create(&log_path).unwrap();
        writeln!(file, "2024-09-01 22:00:00.000000").unwrap();
        writeln!(file, "2024-09-01 23:00:00.000000").unwrap();
        writeln!(file, "corrupted line").unwrap();
        writeln!(file, "2024-09-02 12:00:00.000000").unwrap();
        drop(file);

        let config = Config::default();
        let (buckets, summary) = daily_report(&log_path, &config).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(summary.revolutions, 2);

        let csv_path = dir.path().join("daily.csv");
        export_daily_csv(&buckets, &csv_path).unwrap();
        assert_eq!(std::fs::read_to_string(&csv_path).unwrap().lines().count(), 3);

        // 2024-09-01 is day 19967 after the epoch.
        let stats = window_report(&log_path, 19967.0, &config).unwrap();
        assert_eq!(stats.label, "2024-09-01 00:00");
        assert_eq!(stats.index_range, 0..2);
        assert!((stats.energy_delta_kwh - 2.0 / 75.0).abs() < 1e-12);

        for offset in [1e12, -1e9, f64::NAN] {
            let stats = window_report(&log_path, offset, &config).unwrap();
            assert_eq!(stats.pulses(), 0);
            assert_eq!(stats.energy_delta_kwh, 0.0);
        }
    }
}
