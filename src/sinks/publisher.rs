use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use colored::Colorize;
use log::{info, warn};

use super::MetricPublisher;
use crate::error::{MeterError, Result};

/// One published reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub topic: String,
    pub value: i64,
}

// CHANNEL PUBLISHER -----------------------------------------------------------

/// Hands readings to a bus client running on another thread.
///
/// The queue is bounded and `publish` never blocks: when the consumer falls
/// behind, the reading is dropped and reported as an error.
pub struct ChannelPublisher {
    sender: Option<SyncSender<Metric>>,
}

impl ChannelPublisher {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Metric>) {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }
}

impl MetricPublisher for ChannelPublisher {
    fn publish(&mut self, topic: &str, value: i64) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| MeterError::Publish("channel closed".to_string()))?;

        let metric = Metric {
            topic: topic.to_string(),
            value,
        };
        match sender.try_send(metric) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(m)) => Err(MeterError::Publish(format!(
                "queue full, dropped {} W on {}",
                m.value, m.topic
            ))),
            Err(TrySendError::Disconnected(_)) => {
                Err(MeterError::Publish("consumer disconnected".to_string()))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the sender ends the consumer's receive loop.
        self.sender = None;
        Ok(())
    }
}

// LINE PUBLISHER --------------------------------------------------------------

/// Writes `"<topic> <value>"` lines, e.g. to a TCP bridge or stdout.
pub struct LinePublisher<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> LinePublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> MetricPublisher for LinePublisher<W> {
    fn publish(&mut self, topic: &str, value: i64) -> Result<()> {
        writeln!(self.writer, "{} {}", topic, value)?;
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// BACKGROUND PUBLISHER --------------------------------------------------------

/// Runs a possibly blocking publisher on its own thread behind a bounded queue.
///
/// `publish` only enqueues, so a stalled consumer (full pipe, slow bridge)
/// costs dropped readings rather than a stalled sampling loop. `close` ends the
/// queue and joins the worker once it has drained what was already queued.
pub struct BackgroundPublisher {
    queue: ChannelPublisher,
    worker: Option<JoinHandle<u64>>,
}

impl BackgroundPublisher {
    pub fn spawn<P>(mut inner: P, capacity: usize) -> Result<Self>
    where
        P: MetricPublisher + 'static,
    {
        let (queue, receiver) = ChannelPublisher::bounded(capacity);
        let worker = thread::Builder::new()
            .name("metric-publisher".to_string())
            .spawn(move || {
                let mut failures = 0;
                for metric in receiver {
                    if let Err(e) = inner.publish(&metric.topic, metric.value) {
                        failures += 1;
                        warn!("Dropping {} W on {}: {}", metric.value, metric.topic, e);
                    }
                }
                if let Err(e) = inner.close() {
                    warn!("Closing metric publisher failed: {}", e);
                }
                failures
            })?;

        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }
}

impl MetricPublisher for BackgroundPublisher {
    fn publish(&mut self, topic: &str, value: i64) -> Result<()> {
        self.queue.publish(topic, value)
    }

    fn close(&mut self) -> Result<()> {
        self.queue.close()?;
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let failures = worker
            .join()
            .map_err(|_| MeterError::Publish("publisher thread panicked".to_string()))?;
        if failures > 0 {
            info!("Metric publisher stopped after {} failed writes", failures);
        }
        Ok(())
    }
}

impl Drop for BackgroundPublisher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}", e);
        }
    }
}

// CONSOLE PUBLISHER -----------------------------------------------------------

/// Prints readings for interactive runs.
#[derive(Debug, Default)]
pub struct ConsolePublisher {
    published: u64,
}

impl MetricPublisher for ConsolePublisher {
    fn publish(&mut self, topic: &str, value: i64) -> Result<()> {
        self.published += 1;
        println!(
            "{} {} {}",
            format!("#{:<6}", self.published).dimmed(),
            topic.cyan(),
            format!("{} W", value).bold().red()
        );
        Ok(())
    }
}
