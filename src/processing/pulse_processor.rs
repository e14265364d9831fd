use chrono::{Duration, NaiveDateTime};
use log::{debug, error, info, warn};

use super::debouncer::{DetectionSample, PulseDebouncer, PulseEvent};
use super::rate::on_pulse;
use crate::analysis::series::SharedSeries;
use crate::analysis::tariff::Tariff;
use crate::config::Config;
use crate::error::Result;
use crate::sinks::{EventLog, MetricPublisher};

// -----------------------------------------------------------------------------
// PULSE PROCESSOR
// -----------------------------------------------------------------------------

/// Result of one confirmed pulse as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedPulse {
    pub event: PulseEvent,
    /// `None` for the first pulse and for suppressed (invalid interval) readings.
    pub power_watts: Option<f64>,
    pub energy_kwh_increment: f64,
}

/// Single-threaded sample pipeline: debounce, rate, then best-effort sinks.
///
/// Sink failures are logged and counted but never returned from
/// [`PulseProcessor::process_sample`], so the sampling loop keeps running.
pub struct PulseProcessor {
    debouncer: PulseDebouncer,
    tariff: Tariff,
    topic: String,
    flush_interval: Duration,
    log: Box<dyn EventLog>,
    publisher: Box<dyn MetricPublisher>,
    live_series: Option<SharedSeries>,
    last_pulse: Option<PulseEvent>,
    last_flush: Option<NaiveDateTime>,
    pulse_count: u64,
    sink_errors: u64,
    shut_down: bool,
}

impl PulseProcessor {
    pub fn new(
        config: &Config,
        log: Box<dyn EventLog>,
        publisher: Box<dyn MetricPublisher>,
    ) -> Self {
        Self {
            debouncer: PulseDebouncer::new(config.debounce),
            tariff: config.tariff,
            topic: config.sink.topic.clone(),
            flush_interval: config.sink.flush_interval(),
            log,
            publisher,
            live_series: None,
            last_pulse: None,
            last_flush: None,
            pulse_count: 0,
            sink_errors: 0,
            shut_down: false,
        }
    }

    /// Confirmed pulses are also appended to `series` for live queries.
    pub fn attach_series(&mut self, series: SharedSeries) {
        self.live_series = Some(series);
    }

    pub fn pulse_count(&self) -> u64 {
        self.pulse_count
    }

    /// Energy since the first confirmed pulse.
    pub fn total_energy_kwh(&self) -> f64 {
        self.pulse_count.saturating_sub(1) as f64 * self.tariff.turn_increment_kwh
    }

    pub fn sink_errors(&self) -> u64 {
        self.sink_errors
    }

    pub fn last_pulse(&self) -> Option<PulseEvent> {
        self.last_pulse
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn process_sample(&mut self, sample: DetectionSample) -> Option<ProcessedPulse> {
        if self.shut_down {
            return None;
        }

        self.flush_if_due(sample.timestamp);

        let event = self.debouncer.observe(sample)?;
        let prior = self.last_pulse.replace(event);
        self.pulse_count += 1;

        let (power_watts, energy_kwh_increment) = match on_pulse(event, prior, &self.tariff) {
            Ok(reading) => (reading.power_watts, reading.energy_kwh_increment),
            Err(e) => {
                warn!("Suppressing power reading: {}", e);
                (None, self.tariff.turn_increment_kwh)
            }
        };

        match power_watts {
            Some(watts) => {
                info!("Pulse at {}: {:.0} W", event.timestamp, watts);
                self.publish(watts as i64);
            }
            None => debug!("Pulse at {}: no power reading", event.timestamp),
        }

        if let Err(e) = self.log.append(event.timestamp) {
            self.sink_errors += 1;
            error!("Failed to append pulse {} to log: {}", event.timestamp, e);
        }

        if let Some(series) = &self.live_series {
            if let Err(e) = series.append(event.timestamp) {
                warn!("Live series rejected pulse: {}", e);
            }
        }

        Some(ProcessedPulse {
            event,
            power_watts,
            energy_kwh_increment,
        })
    }

    /// Flushes the log and closes the publisher. Further samples are ignored.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let flushed = self.log.flush();
        let closed = self.publisher.close();
        info!(
            "Pulse processor stopped after {} pulses ({:.3} kWh)",
            self.pulse_count,
            self.total_energy_kwh()
        );
        flushed.and(closed)
    }

    fn publish(&mut self, watts: i64) {
        if let Err(e) = self.publisher.publish(&self.topic, watts) {
            self.sink_errors += 1;
            error!("Failed to publish {} W on {}: {}", watts, self.topic, e);
        }
    }

    fn flush_if_due(&mut self, now: NaiveDateTime) {
        let last_flush = *self.last_flush.get_or_insert(now);
        if now - last_flush < self.flush_interval {
            return;
        }

        self.last_flush = Some(now);
        match self.log.flush() {
            Ok(()) => info!("Flushed pulse log at {}", now),
            Err(e) => {
                self.sink_errors += 1;
                error!("Periodic log flush failed: {}", e);
            }
        }
    }
}

impl Drop for PulseProcessor {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Pulse processor shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeterError;
    use crate::sinks::publisher::{ChannelPublisher, Metric};
    use chrono::NaiveDate;
    use std::sync::mpsc::Receiver;
    use std::sync::{Arc, Mutex};

    /// Log that records into shared state so tests can inspect it after handing it over.
    #[derive(Clone, Default)]
    struct SpyLog {
        entries: Arc<Mutex<Vec<NaiveDateTime>>>,
        flushes: Arc<Mutex<usize>>,
        fail_appends: bool,
    }

    impl EventLog for SpyLog {
        fn append(&mut self, timestamp: NaiveDateTime) -> Result<()> {
            if self.fail_appends {
                return Err(MeterError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.entries.lock().unwrap().push(timestamp);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn processor(log: SpyLog) -> (PulseProcessor, Receiver<Metric>) {
        let (publisher, receiver) = ChannelPublisher::bounded(16);
        let processor = PulseProcessor::new(&Config::default(), Box::new(log), Box::new(publisher));
        (processor, receiver)
    }

    /// One marker pass starting at `start_s`: 300 ms visible, then dark until the next pass.
    fn revolution(processor: &mut PulseProcessor, start_s: i64, period_s: i64) -> Vec<ProcessedPulse> {
        let mut out = Vec::new();
        let mut ms = 0;
        while ms < period_s * 1000 {
            let timestamp = t0() + Duration::seconds(start_s) + Duration::milliseconds(ms);
            if let Some(p) = processor.process_sample(DetectionSample::new(timestamp, ms < 300)) {
                out.push(p);
            }
            ms += 70;
        }
        out
    }

    #[test]
    fn publishes_power_from_second_pulse_on() {
        let log = SpyLog::default();
        let (mut processor, receiver) = processor(log.clone());

        let first = revolution(&mut processor, 0, 12);
        let second = revolution(&mut processor, 12, 12);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert!(first[0].power_watts.is_none());
        assert!((second[0].power_watts.unwrap() - 4000.0).abs() < 1.0);

        let metrics: Vec<Metric> = receiver.try_iter().collect();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].topic, "smarter-meter/power");
        assert_eq!(log.entries.lock().unwrap().len(), 2);
        assert_eq!(processor.pulse_count(), 2);
        assert!((processor.total_energy_kwh() - 1.0 / 75.0).abs() < 1e-12);
    }

    #[test]
    fn log_failures_do_not_stop_processing() {
        let log = SpyLog {
            fail_appends: true,
            ..SpyLog::default()
        };
        let (mut processor, receiver) = processor(log);
        revolution(&mut processor, 0, 10);
        revolution(&mut processor, 10, 10);
        assert_eq!(processor.pulse_count(), 2);
        assert_eq!(processor.sink_errors(), 2);
        assert_eq!(receiver.try_iter().count(), 1);
    }

    #[test]
    fn flushes_periodically_and_on_shutdown() {
        let log = SpyLog::default();
        let (mut processor, _receiver) = processor(log.clone());
        for minute in 0..31 {
            let timestamp = t0() + Duration::minutes(minute);
            processor.process_sample(DetectionSample::new(timestamp, false));
        }
        assert_eq!(*log.flushes.lock().unwrap(), 2);

        processor.shutdown().unwrap();
        processor.shutdown().unwrap();
        assert_eq!(*log.flushes.lock().unwrap(), 3);
        assert!(processor
            .process_sample(DetectionSample::new(t0() + Duration::hours(1), true))
            .is_none());
    }

    #[test]
    fn oversized_flush_interval_never_triggers_periodic_flush() {
        let mut config = Config::default();
        config.sink.flush_interval_secs = u64::MAX / 2;
        let log = SpyLog::default();
        let mut processor = PulseProcessor::new(
            &config,
            Box::new(log.clone()),
            Box::new(crate::sinks::NullPublisher),
        );
        for day in 0..400 {
            processor.process_sample(DetectionSample::new(t0() + Duration::days(day), false));
        }
        assert_eq!(*log.flushes.lock().unwrap(), 0);
        processor.shutdown().unwrap();
        assert_eq!(*log.flushes.lock().unwrap(), 1);
    }

    #[test]
    fn drop_flushes_pending_pulses() {
        let log = SpyLog::default();
        {
            let (mut processor, _receiver) = processor(log.clone());
            revolution(&mut processor, 0, 5);
        }
        assert_eq!(log.entries.lock().unwrap().len(), 1);
        assert_eq!(*log.flushes.lock().unwrap(), 1);
    }

    #[test]
    fn live_series_receives_pulses() {
        let shared = SharedSeries::new(crate::analysis::series::HistoricalSeries::new(1.0 / 75.0));
        let (mut processor, _receiver) = processor(SpyLog::default());
        processor.attach_series(shared.clone());
        revolution(&mut processor, 0, 6);
        revolution(&mut processor, 6, 6);
        assert_eq!(shared.len(), 2);
        assert!((shared.snapshot().total_energy_kwh() - 1.0 / 75.0).abs() < 1e-12);
    }
}
