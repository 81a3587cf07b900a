// src/recorder/controller.rs
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::error::{RecorderError, RecorderResult};
use crate::lock::InstanceLock;
use crate::recorder::active::ActiveFiles;
use crate::recorder::capture::{CaptureLoop, Command};
use crate::recorder::config::{OutputFormat, RecorderConfig};
use crate::recorder::encoder::Encoder;
use crate::recorder::finalizer::{EncodeSettings, FinalizeJob, Finalizer, FinalizerContext};
use crate::recorder::retention_fs::{FsRetention, Sweeper, SweepReport};
use crate::recorder::segment::Segment;
use crate::recorder::segmenter::{Segmenter, SegmenterContext};
use crate::recorder::sink_wav::recover_partials;
use crate::recorder::state::{EventBus, Mode, RecorderEvent, RecorderState, RecorderStatus};
use crate::source::AudioSource;

const COMMAND_BACKLOG: usize = 16;

struct CaptureHandle {
    commands: Sender<Command>,
    thread: JoinHandle<()>,
}

/// Owns the recording state machine and the worker threads behind it.
///
/// Every method takes `&self`; control operations are serialized on an
/// internal lock while `status()` only reads the shared state.
pub struct Recorder {
    state: Arc<Mutex<RecorderState>>,
    source: Arc<dyn AudioSource>,
    active: ActiveFiles,
    events: EventBus,
    retention_days: Arc<AtomicU64>,
    next_index: Arc<AtomicU64>,
    capture: Mutex<Option<CaptureHandle>>,
    finalizer: Mutex<Option<Finalizer>>,
    sweeper: Mutex<Option<Sweeper>>,
    _lock: InstanceLock,
}

impl Recorder {
    /// Prepares the output directory, recovers segments left by an unclean
    /// shutdown and starts the finalizer and retention workers. Capture does
    /// not begin until `start()`.
    pub fn new(
        config: RecorderConfig,
        source: Arc<dyn AudioSource>,
        encoder: Arc<dyn Encoder>,
    ) -> RecorderResult<Self> {
        validate(&config)?;
        fs::create_dir_all(&config.output_dir)
            .map_err(|e| RecorderError::storage(&config.output_dir, e))?;
        let lock = InstanceLock::acquire(&config.output_dir)?;

        let active = ActiveFiles::new();
        let events = EventBus::new();
        let retention_days = Arc::new(AtomicU64::new(config.retention_days));
        let state = Arc::new(Mutex::new(RecorderState::new(config.clone())));

        let finalizer = Finalizer::spawn(
            FinalizerContext {
                encoder,
                active: active.clone(),
                state: state.clone(),
                events: events.clone(),
            },
            config.encode_queue,
        )?;

        let recovered = recover_partials(&config.output_dir);
        if !recovered.is_empty() {
            log::info!("[recorder] finalizing {} recovered segment(s)", recovered.len());
        }
        let settings = EncodeSettings {
            format: config.format,
            quality: config.quality,
            keep_raw: config.keep_raw,
        };
        for path in recovered {
            let segment = Segment::recovered(0, path, config.sample_rate);
            active.pin([segment.path.clone()]);
            if let Some(q) = finalizer.queue() {
                let _ = q.send(FinalizeJob {
                    segment,
                    settings,
                    done: None,
                });
            }
        }

        let sweeper = Sweeper::spawn(
            Box::new(FsRetention::new(
                config.output_dir.clone(),
                retention_days.clone(),
                active.clone(),
            )),
            config.sweep_interval,
            events.clone(),
        )?;

        log::info!(
            "[recorder] ready: dir={:?} device='{}' format={} segment={:?} retention={}d",
            config.output_dir,
            config.device,
            config.format,
            config.segment_duration,
            config.retention_days
        );

        Ok(Self {
            state,
            source,
            active,
            events,
            retention_days,
            next_index: Arc::new(AtomicU64::new(1)),
            capture: Mutex::new(None),
            finalizer: Mutex::new(Some(finalizer)),
            sweeper: Mutex::new(Some(sweeper)),
            _lock: lock,
        })
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn status(&self) -> RecorderStatus {
        self.state.lock().status()
    }

    pub fn config(&self) -> RecorderConfig {
        self.state.lock().config.clone()
    }

    /// Receiver for lifecycle events. All receivers share one queue.
    pub fn events(&self) -> Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    /// Opens the device and the first segment. Device problems surface here
    /// synchronously as `DeviceUnavailable`.
    pub fn start(&self) -> RecorderResult<()> {
        let mut capture = self.capture.lock();
        let config = {
            let st = self.state.lock();
            if st.mode != Mode::Idle {
                return Err(RecorderError::invalid_state("start", st.mode));
            }
            st.config.clone()
        };
        reap(&mut capture);

        let Some(queue) = self.finalizer.lock().as_ref().and_then(|f| f.queue()) else {
            return Err(RecorderError::invalid_state("start", "shut down"));
        };

        let spec = config.capture_spec();
        let mut stream = match self.source.open(&spec) {
            Ok(s) => s,
            Err(e) => {
                log::error!("[recorder] {}", e);
                self.state.lock().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut segmenter = Segmenter::new(
            &config,
            SegmenterContext {
                queue,
                active: self.active.clone(),
                state: self.state.clone(),
                events: self.events.clone(),
                next_index: self.next_index.clone(),
            },
        );
        if let Err(e) = segmenter.open() {
            stream.close();
            self.state.lock().last_error = Some(e.to_string());
            return Err(e);
        }

        let (tx, rx) = bounded(COMMAND_BACKLOG);
        let worker = CaptureLoop {
            source: self.source.clone(),
            spec,
            stream,
            segmenter,
            commands: rx,
            state: self.state.clone(),
            events: self.events.clone(),
            reconnect_delay: config.reconnect_delay,
        };

        {
            let mut st = self.state.lock();
            st.mode = Mode::Recording;
            st.last_error = None;
        }
        let thread = thread::Builder::new()
            .name("capture".into())
            .spawn(move || worker.run())
            .map_err(|e| {
                let mut st = self.state.lock();
                st.mode = Mode::Idle;
                st.segment = None;
                RecorderError::capture(format!("spawn capture thread: {}", e))
            })?;

        *capture = Some(CaptureHandle {
            commands: tx,
            thread,
        });
        log::info!("[recorder] recording from '{}'", config.device);
        Ok(())
    }

    /// Closes the open segment and waits until the finalizer has produced
    /// its artifact. Ends in `Idle`.
    pub fn stop(&self) -> RecorderResult<()> {
        let mut capture = self.capture.lock();
        {
            let mut st = self.state.lock();
            match st.mode {
                Mode::Recording | Mode::Paused => st.mode = Mode::Stopping,
                other => return Err(RecorderError::invalid_state("stop", other)),
            }
        }

        let outcome = match capture.as_ref() {
            Some(handle) => {
                let (tx, rx) = bounded(1);
                if handle.commands.send(Command::Stop(tx)).is_ok() {
                    // Disconnected means the capture thread halted on its own.
                    rx.recv().ok()
                } else {
                    None
                }
            }
            None => None,
        };
        reap(&mut capture);

        {
            let mut st = self.state.lock();
            st.mode = Mode::Idle;
            st.segment = None;
        }

        match outcome {
            Some(Ok(status)) => {
                log::info!("[recorder] stopped (final segment {})", status);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                log::warn!("[recorder] capture had already halted");
                Ok(())
            }
        }
    }

    pub fn pause(&self) -> RecorderResult<()> {
        self.toggle_pause(Mode::Recording, Mode::Paused, "pause", Command::Pause)
    }

    pub fn resume(&self) -> RecorderResult<()> {
        self.toggle_pause(Mode::Paused, Mode::Recording, "resume", Command::Resume)
    }

    fn toggle_pause(
        &self,
        from: Mode,
        to: Mode,
        operation: &str,
        command: fn(Sender<()>) -> Command,
    ) -> RecorderResult<()> {
        let capture = self.capture.lock();
        let mode = self.mode();
        if mode != from {
            return Err(RecorderError::invalid_state(operation, mode));
        }
        let (tx, rx) = bounded(1);
        let acked = capture
            .as_ref()
            .map(|h| h.commands.send(command(tx)).is_ok() && rx.recv().is_ok())
            .unwrap_or(false);
        settle_transition(&mut self.state.lock(), from, to, acked)?;
        log::info!("[recorder] {}", to);
        Ok(())
    }

    /// Idle only; the next `start()` opens the new device.
    pub fn set_device(&self, device: &str) -> RecorderResult<()> {
        let _capture = self.capture.lock();
        let mut st = self.state.lock();
        if st.mode != Mode::Idle {
            return Err(RecorderError::invalid_state("set_device", st.mode));
        }
        if device.trim().is_empty() {
            return Err(RecorderError::config("device must not be empty"));
        }
        st.config.device = device.trim().to_string();
        log::info!("[recorder] device → '{}'", st.config.device);
        Ok(())
    }

    /// Idle only.
    pub fn set_format(&self, format: OutputFormat) -> RecorderResult<()> {
        let _capture = self.capture.lock();
        let mut st = self.state.lock();
        if st.mode != Mode::Idle {
            return Err(RecorderError::invalid_state("set_format", st.mode));
        }
        st.config.format = format;
        log::info!("[recorder] format → {}", format);
        Ok(())
    }

    /// Applies from the next sweep.
    pub fn set_retention(&self, days: u64) -> RecorderResult<()> {
        if days == 0 {
            return Err(RecorderError::config("retention must be at least one day"));
        }
        self.retention_days.store(days, Ordering::Relaxed);
        self.state.lock().config.retention_days = days;
        log::info!("[recorder] retention → {} days", days);
        Ok(())
    }

    /// Applies from the next segment; the open one keeps its target.
    pub fn set_segment_duration(&self, duration: Duration) -> RecorderResult<()> {
        if duration.is_zero() {
            return Err(RecorderError::config("segment duration must be positive"));
        }
        let config = self.config();
        check_segment_size(duration, config.sample_rate, config.output_channels())?;

        let capture = self.capture.lock();
        self.state.lock().config.segment_duration = duration;
        if let Some(h) = capture.as_ref() {
            let _ = h.commands.send(Command::SetSegmentDuration(duration));
        }
        log::info!("[recorder] segment duration → {:?}", duration);
        Ok(())
    }

    /// Runs one retention pass on the calling thread.
    pub fn sweep_now(&self) -> SweepReport {
        let report = FsRetention::new(
            self.config().output_dir,
            self.retention_days.clone(),
            self.active.clone(),
        )
        .sweep(SystemTime::now());
        if !report.deleted.is_empty() || !report.failed.is_empty() {
            self.events.publish(RecorderEvent::Swept {
                deleted: report.deleted.len(),
                failed: report.failed.len(),
            });
        }
        report
    }

    /// Stops capture if running, drains the finalize queue and stops the
    /// retention worker. Idempotent.
    pub fn shutdown(&self) -> RecorderResult<()> {
        let result = match self.mode() {
            Mode::Recording | Mode::Paused => self.stop(),
            _ => Ok(()),
        };
        reap(&mut self.capture.lock());
        if let Some(mut s) = self.sweeper.lock().take() {
            s.shutdown();
        }
        if let Some(mut f) = self.finalizer.lock().take() {
            f.shutdown();
        }
        result
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("[recorder] shutdown: {}", e);
        }
    }
}

/// Applies an acknowledged pause/resume. The capture thread may have halted
/// after acking, in which case its `Idle` stands.
fn settle_transition(
    st: &mut RecorderState,
    from: Mode,
    to: Mode,
    acked: bool,
) -> RecorderResult<()> {
    if acked && st.mode == from {
        st.mode = to;
        return Ok(());
    }
    let reason = st
        .last_error
        .clone()
        .unwrap_or_else(|| "capture thread is gone".to_string());
    Err(RecorderError::capture(reason))
}

/// Joins a capture thread that has ended or is about to.
fn reap(capture: &mut Option<CaptureHandle>) {
    if let Some(h) = capture.take() {
        drop(h.commands);
        if h.thread.join().is_err() {
            log::error!("[recorder] capture thread panicked");
        }
    }
}

/// Rejects configurations the engine cannot run with.
pub fn validate(config: &RecorderConfig) -> RecorderResult<()> {
    if config.sample_rate == 0 || config.channels == 0 || config.chunk_size == 0 {
        return Err(RecorderError::config(
            "sample_rate, channels and chunk_size must be positive",
        ));
    }
    if config.segment_duration.is_zero() {
        return Err(RecorderError::config("segment duration must be positive"));
    }
    if config.retention_days == 0 {
        return Err(RecorderError::config("retention must be at least one day"));
    }
    if config.sweep_interval.is_zero() {
        return Err(RecorderError::config("sweep interval must be positive"));
    }
    check_segment_size(config.segment_duration, config.sample_rate, config.output_channels())
}

// A WAV data chunk is limited to u32::MAX bytes.
fn check_segment_size(duration: Duration, sample_rate: u32, channels: u16) -> RecorderResult<()> {
    let bytes = duration.as_secs_f64() * sample_rate as f64 * channels as f64 * 2.0;
    if bytes >= u32::MAX as f64 {
        return Err(RecorderError::config(format!(
            "segment of {:?} at {}Hz/{}ch exceeds the 4 GiB WAV limit",
            duration, sample_rate, channels
        )));
    }
    Ok(())
}
