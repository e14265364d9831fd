use chrono::{Duration, NaiveDateTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct DebounceConfig {
    /// Minimum length of a detection run before it counts as a pulse.
    pub confirm_window_ms: u64,
    /// Minimum silence before the next detection run may count again.
    pub silence_window_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            confirm_window_ms: 50,
            silence_window_ms: 2000,
        }
    }
}

/// Milliseconds as a duration, saturating at `Duration::MAX`.
fn saturating_millis(ms: u64) -> Duration {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .unwrap_or(Duration::MAX)
}

impl DebounceConfig {
    pub fn confirm_window(&self) -> Duration {
        saturating_millis(self.confirm_window_ms)
    }

    pub fn silence_window(&self) -> Duration {
        saturating_millis(self.silence_window_ms)
    }
}

/// One classified frame: was the marker visible at `timestamp`?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSample {
    pub timestamp: NaiveDateTime,
    pub detected: bool,
}

impl DetectionSample {
    pub fn new(timestamp: NaiveDateTime, detected: bool) -> Self {
        Self {
            timestamp,
            detected,
        }
    }
}

/// One confirmed wheel revolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PulseEvent {
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceState {
    /// Consecutive detected samples in the current run.
    pub hits: u32,
    pub hit_started_at: Option<NaiveDateTime>,
    pub silence_started_at: Option<NaiveDateTime>,
    /// Ready to confirm the next sustained detection.
    pub armed: bool,
}

impl Default for DebounceState {
    fn default() -> Self {
        Self {
            hits: 0,
            hit_started_at: None,
            silence_started_at: None,
            armed: true,
        }
    }
}

/// Edge-triggered debounce with a refractory guard.
///
/// A detection run must last `confirm_window` before a pulse is emitted, and at
/// most one pulse is emitted until the marker has been out of view for
/// `silence_window`.
pub struct PulseDebouncer {
    config: DebounceConfig,
    confirm_window: Duration,
    silence_window: Duration,
    state: DebounceState,
    last_timestamp: Option<NaiveDateTime>,
}

impl PulseDebouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            confirm_window: config.confirm_window(),
            silence_window: config.silence_window(),
            config,
            state: DebounceState::default(),
            last_timestamp: None,
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    pub fn state(&self) -> &DebounceState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = DebounceState::default();
        self.last_timestamp = None;
    }

    pub fn observe(&mut self, sample: DetectionSample) -> Option<PulseEvent> {
        let now = sample.timestamp;

        // Samples from a clock that stepped backwards would let a run confirm early.
        if self.last_timestamp.map_or(false, |last| now < last) {
            warn!(
                "Dropping out-of-order detection sample at {} (previous {:?})",
                now, self.last_timestamp
            );
            return None;
        }
        self.last_timestamp = Some(now);

        if sample.detected {
            self.on_detected(now)
        } else {
            self.on_silence(now);
            None
        }
    }

    fn on_detected(&mut self, now: NaiveDateTime) -> Option<PulseEvent> {
        let state = &mut self.state;
        state.silence_started_at = None;
        state.hits = state.hits.saturating_add(1);

        let hit_started_at = *state.hit_started_at.get_or_insert(now);

        if state.armed && now - hit_started_at >= self.confirm_window {
            state.armed = false;
            debug!(
                "Pulse confirmed at {} after {} detected samples",
                now, state.hits
            );
            return Some(PulseEvent { timestamp: now });
        }

        None
    }

    fn on_silence(&mut self, now: NaiveDateTime) {
        let state = &mut self.state;

        // First silent sample restarts the confirm window so flickers never add up.
        let silence_started_at = match state.silence_started_at {
            Some(t) => t,
            None => {
                state.silence_started_at = Some(now);
                state.hits = 0;
                state.hit_started_at = None;
                now
            }
        };

        if !state.armed && now - silence_started_at >= self.silence_window {
            state.armed = true;
        }
    }
}
