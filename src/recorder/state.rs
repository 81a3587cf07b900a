// src/recorder/state.rs
use std::fmt;
use std::path::PathBuf;

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;

use crate::recorder::config::RecorderConfig;
use crate::recorder::segment::SegmentInfo;

// Events beyond this many undrained ones are dropped.
const EVENT_BACKLOG: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Recording,
    Paused,
    Stopping,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Idle => "idle",
            Mode::Recording => "recording",
            Mode::Paused => "paused",
            Mode::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Process-wide recorder state. Created with the controller, dropped with it.
#[derive(Debug)]
pub struct RecorderState {
    pub mode: Mode,
    pub config: RecorderConfig,
    pub segment: Option<SegmentInfo>,
    pub segments_completed: u64,
    pub last_error: Option<String>,
}

impl RecorderState {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            mode: Mode::Idle,
            config,
            segment: None,
            segments_completed: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> RecorderStatus {
        let elapsed = self
            .segment
            .as_ref()
            .map(|s| s.samples as f64 / self.config.sample_rate.max(1) as f64)
            .unwrap_or(0.0);
        RecorderStatus {
            mode: self.mode,
            device: self.config.device.clone(),
            format: self.config.format.to_string(),
            elapsed_in_segment_secs: elapsed,
            current_file: self.segment.as_ref().map(|s| s.path.clone()),
            segments_completed: self.segments_completed,
            retention_days: self.config.retention_days,
            segment_secs: self.config.segment_duration.as_secs_f64(),
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecorderStatus {
    pub mode: Mode,
    pub device: String,
    pub format: String,
    pub elapsed_in_segment_secs: f64,
    pub current_file: Option<PathBuf>,
    pub segments_completed: u64,
    pub retention_days: u64,
    pub segment_secs: f64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecorderEvent {
    SegmentOpened { segment: SegmentInfo },
    SegmentFinalized { segment: SegmentInfo, artifact: PathBuf },
    EncodeFailed { segment: SegmentInfo, detail: String },
    /// The raw file could not be written or closed; capture halts.
    SegmentFailed { segment: SegmentInfo, error: String },
    CaptureHalted { error: String },
    Swept { deleted: usize, failed: usize },
}

/// Bounded event queue; receivers share it, publishing never blocks and
/// evicts the oldest undrained event when full.
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<RecorderEvent>,
    rx: Receiver<RecorderEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = bounded(EVENT_BACKLOG);
        Self { tx, rx }
    }

    pub fn publish(&self, event: RecorderEvent) {
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(ev)) => {
                    if let Ok(old) = self.rx.try_recv() {
                        log::trace!("[recorder] event evicted: {:?}", old);
                    }
                    event = ev;
                }
            }
        }
    }

    pub fn subscribe(&self) -> Receiver<RecorderEvent> {
        self.rx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_elapsed_from_samples() {
        let mut state = RecorderState::new(RecorderConfig {
            sample_rate: 1000,
            ..RecorderConfig::default()
        });
        state.mode = Mode::Recording;
        state.segment = Some(SegmentInfo {
            index: 1,
            path: PathBuf::from("/rec/20260101_000000.wav"),
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            samples: 2500,
            target_samples: 10_000,
            status: crate::recorder::segment::SegmentStatus::Open,
        });

        let status = state.status();
        assert_eq!(status.mode, Mode::Recording);
        assert!((status.elapsed_in_segment_secs - 2.5).abs() < 1e-9);
        assert_eq!(status.current_file, Some(PathBuf::from("/rec/20260101_000000.wav")));
    }

    #[test]
    fn full_bus_evicts_oldest_instead_of_blocking() {
        let bus = EventBus::new();
        for i in 0..EVENT_BACKLOG + 10 {
            bus.publish(RecorderEvent::Swept { deleted: i, failed: 0 });
        }
        let rx = bus.subscribe();
        assert_eq!(rx.len(), EVENT_BACKLOG);
        assert_eq!(rx.try_recv().unwrap(), RecorderEvent::Swept { deleted: 10, failed: 0 });
    }
}
