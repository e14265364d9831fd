use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::Result;
use crate::processing::debouncer::DetectionSample;
use crate::processing::pulse_processor::PulseProcessor;
use crate::processing::sample_source::SampleSource;

/// Samples buffered between the reader thread and the sampling loop.
const SAMPLE_QUEUE: usize = 256;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cancellation flag shared between a signal handler and the sampling loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels the token on SIGINT / SIGTERM.
    pub fn install_signal_handler(&self) -> std::result::Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            info!("Termination requested, stopping sampling loop");
            token.cancel();
        })
    }
}

/// Pulls a blocking source on a reader thread.
///
/// The sampling loop then waits on a channel with a timeout, so a cancelled
/// token ends the loop even while the source is stuck waiting for input (an
/// idle stdin pipe, for instance). The reader thread is left to exit on its own
/// once its source returns or the channel is gone.
pub struct BackgroundSource {
    receiver: Receiver<Result<DetectionSample>>,
    token: ShutdownToken,
}

impl BackgroundSource {
    pub fn spawn<S>(mut source: S, token: ShutdownToken) -> Result<Self>
    where
        S: SampleSource + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(SAMPLE_QUEUE);
        thread::Builder::new()
            .name("sample-reader".to_string())
            .spawn(move || {
                while let Some(sample) = source.next_sample() {
                    if sender.send(sample).is_err() {
                        break;
                    }
                }
                debug!("Sample reader finished");
            })?;
        Ok(Self { receiver, token })
    }
}

impl SampleSource for BackgroundSource {
    fn next_sample(&mut self) -> Option<Result<DetectionSample>> {
        loop {
            match self.receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(sample) => return Some(sample),
                Err(RecvTimeoutError::Timeout) if self.token.is_cancelled() => return None,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub samples: u64,
    pub rejected_samples: u64,
    pub pulses: u64,
    pub cancelled: bool,
}

/// Feeds `source` into `processor` until the source ends or `token` is cancelled.
///
/// The token is checked before every sample. Whatever ends the loop, the
/// processor is shut down afterwards so confirmed pulses reach the log.
pub fn run_sampling_loop<S: SampleSource>(
    source: &mut S,
    processor: &mut PulseProcessor,
    token: &ShutdownToken,
) -> LoopStats {
    let started = Instant::now();
    let mut stats = LoopStats::default();

    loop {
        if token.is_cancelled() {
            stats.cancelled = true;
            break;
        }

        let sample = match source.next_sample() {
            Some(Ok(sample)) => sample,
            Some(Err(e)) => {
                stats.rejected_samples += 1;
                warn!("Skipping detection sample: {}", e);
                continue;
            }
            None => {
                stats.cancelled = token.is_cancelled();
                break;
            }
        };

        stats.samples += 1;
        if processor.process_sample(sample).is_some() {
            stats.pulses += 1;
        }
    }

    if let Err(e) = processor.shutdown() {
        error!("Flush on shutdown failed: {}", e);
    }

    info!(
        "Sampling loop finished in {:?}: {} samples, {} rejected, {} pulses",
        started.elapsed(),
        stats.samples,
        stats.rejected_samples,
        stats.pulses
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::processing::sample_source::SimulatedWheel;
    use crate::sinks::{MemoryLog, NullPublisher};
    use chrono::NaiveDate;

    fn wheel(revolutions: u64) -> SimulatedWheel {
        let start = NaiveDate::from_ymd_opt(2024, 8, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        SimulatedWheel::new(
            start,
            chrono::Duration::seconds(10),
            chrono::Duration::milliseconds(70),
        )
            .with_seed(1)
            .with_revolutions(revolutions)
    }

    fn processor() -> PulseProcessor {
        PulseProcessor::new(
            &Config::default(),
            Box::new(MemoryLog::default()),
            Box::new(NullPublisher),
        )
    }

    #[test]
    fn counts_one_pulse_per_revolution() {
        let mut processor = processor();
        let stats = run_sampling_loop(&mut wheel(5), &mut processor, &ShutdownToken::new());
        assert_eq!(stats.pulses, 5);
        assert!(!stats.cancelled);
        assert!(processor.is_shut_down());
    }

    /// Blocks in `next_sample` until its sender sends or is dropped.
    struct StalledSource {
        wake: mpsc::Receiver<()>,
        at: chrono::NaiveDateTime,
    }

    impl SampleSource for StalledSource {
        fn next_sample(&mut self) -> Option<Result<DetectionSample>> {
            self.wake
                .recv()
                .ok()
                .map(|()| Ok(DetectionSample::new(self.at, false)))
        }
    }

    #[test]
    fn cancellation_reaches_loop_while_source_is_idle() {
        let (wake, stalled) = mpsc::channel();
        let token = ShutdownToken::new();
        let at = NaiveDate::from_ymd_opt(2024, 8, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut source =
            BackgroundSource::spawn(StalledSource { wake: stalled, at }, token.clone()).unwrap();

        // One sample gets through, then the source goes quiet.
        wake.send(()).unwrap();
        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                token.cancel();
            })
        };

        let started = Instant::now();
        let mut processor = processor();
        let stats = run_sampling_loop(&mut source, &mut processor, &token);
        canceller.join().unwrap();

        assert!(stats.cancelled);
        assert_eq!(stats.samples, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(processor.is_shut_down());
        drop(wake);
    }

    #[test]
    fn background_source_ends_with_its_source() {
        let mut processor = processor();
        let token = ShutdownToken::new();
        let mut source = BackgroundSource::spawn(wheel(3), token.clone()).unwrap();
        let stats = run_sampling_loop(&mut source, &mut processor, &token);
        assert_eq!(stats.pulses, 3);
        assert!(!stats.cancelled);
    }

    #[test]
    fn cancelled_token_stops_before_first_sample() {
        let token = ShutdownToken::new();
        token.cancel();
        let mut processor = processor();
        let stats = run_sampling_loop(&mut wheel(5), &mut processor, &token);
        assert_eq!(stats.samples, 0);
        assert!(stats.cancelled);
        assert!(processor.is_shut_down());
    }
}
