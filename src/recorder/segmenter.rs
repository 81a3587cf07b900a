// src/recorder/segmenter.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Local;
use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::error::{RecorderError, RecorderResult};
use crate::recorder::active::ActiveFiles;
use crate::recorder::config::RecorderConfig;
use crate::recorder::finalizer::{EncodeSettings, FinalizeJob, FinalizeQueue};
use crate::recorder::segment::{Segment, SegmentStatus};
use crate::recorder::sink_wav::WavSink;
use crate::recorder::state::{EventBus, RecorderEvent, RecorderState};
use crate::source::Frame;

/// Shared handles for the segmenter.
#[derive(Clone)]
pub struct SegmenterContext {
    pub queue: FinalizeQueue,
    pub active: ActiveFiles,
    pub state: Arc<Mutex<RecorderState>>,
    pub events: EventBus,
    /// Next segment index; survives stop/start.
    pub next_index: Arc<AtomicU64>,
}

/// Writes frames into the open segment and rotates at the sample boundary.
///
/// Every frame lands in exactly one segment: rotation happens after the
/// frame that reaches the target, before the next one is accepted.
pub struct Segmenter {
    dir: PathBuf,
    sample_rate: u32,
    channels: u16,
    mono: bool,
    segment_duration: Duration,
    settings: EncodeSettings,
    sink: Option<WavSink>,
    last_seq: Option<u64>,
    ctx: SegmenterContext,
}

impl Segmenter {
    pub fn new(cfg: &RecorderConfig, ctx: SegmenterContext) -> Self {
        Self {
            dir: cfg.output_dir.clone(),
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            mono: cfg.mono,
            segment_duration: cfg.segment_duration,
            settings: EncodeSettings {
                format: cfg.format,
                quality: cfg.quality,
                keep_raw: cfg.keep_raw,
            },
            sink: None,
            last_seq: None,
            ctx,
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn current(&self) -> Option<&Segment> {
        self.sink.as_ref().map(|s| s.segment())
    }

    /// Takes effect from the next segment on.
    pub fn set_segment_duration(&mut self, duration: Duration) {
        log::info!("[segmenter] segment duration → {:?}", duration);
        self.segment_duration = duration;
    }

    /// Forgets the last sequence number, e.g. after pause or a reconnect.
    pub fn reset_continuity(&mut self) {
        self.last_seq = None;
    }

    /// Opens a new segment. The file must not exist before its paths are
    /// pinned, so the sweeper can't race the creation.
    pub fn open(&mut self) -> RecorderResult<()> {
        if self.sink.is_some() {
            return Ok(());
        }
        let index = self.ctx.next_index.fetch_add(1, Ordering::Relaxed);
        let segment = Segment::new(
            index,
            &self.dir,
            Local::now(),
            self.segment_duration,
            self.sample_rate,
        );
        let paths = [segment.path.clone(), segment.part_path.clone()];
        self.ctx.active.pin(paths.iter().cloned());

        let sink = match WavSink::create(segment, self.channels, self.mono) {
            Ok(s) => s,
            Err(e) => {
                self.ctx.active.unpin(paths.iter());
                return Err(e);
            }
        };

        let info = sink.segment().info();
        self.ctx.state.lock().segment = Some(info.clone());
        self.ctx.events.publish(RecorderEvent::SegmentOpened { segment: info });
        self.sink = Some(sink);
        Ok(())
    }

    /// Appends one frame and rotates if the segment reached its target.
    pub fn write(&mut self, frame: &Frame) -> RecorderResult<()> {
        if let Some(last) = self.last_seq {
            if frame.seq <= last {
                log::warn!("[segmenter] dropping stale frame {} (last {})", frame.seq, last);
                return Ok(());
            }
            if frame.seq != last + 1 {
                log::warn!(
                    "[segmenter] {} frame(s) missing before seq {}",
                    frame.seq - last - 1,
                    frame.seq
                );
            }
        }
        self.last_seq = Some(frame.seq);

        if frame.sample_rate != self.sample_rate || frame.channels != self.channels {
            let path = self.current().map(|s| s.part_path.clone()).unwrap_or_default();
            return Err(RecorderError::capture(format!(
                "frame format {}Hz/{}ch does not match {}Hz/{}ch ({:?})",
                frame.sample_rate, frame.channels, self.sample_rate, self.channels, path
            )));
        }

        let Some(sink) = self.sink.as_mut() else {
            return Err(RecorderError::capture("no open segment"));
        };

        if let Err(e) = sink.write_frame(frame) {
            self.fail(&e);
            return Err(e);
        }

        let segment = sink.segment_mut();
        let due = segment.clock.advance(frame.len_per_channel());
        let samples = segment.clock.samples();
        if let Some(info) = self.ctx.state.lock().segment.as_mut() {
            info.samples = samples;
        }

        if due {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> RecorderResult<()> {
        self.close(None)?;
        self.open()
    }

    /// Closes the open segment and hands it to the finalizer. `done`
    /// receives the final status. Blocks while the finalize queue is full.
    /// A segment without audio is discarded instead.
    pub fn close(
        &mut self,
        done: Option<Sender<RecorderResult<SegmentStatus>>>,
    ) -> RecorderResult<()> {
        let Some(mut sink) = self.sink.take() else {
            if let Some(done) = done {
                let _ = done.send(Ok(SegmentStatus::Closed));
            }
            return Ok(());
        };

        if sink.segment().clock.samples() == 0 {
            let seg = sink.discard();
            self.release(&seg);
            if let Some(done) = done {
                let _ = done.send(Ok(seg.status));
            }
            return Ok(());
        }

        if let Err(e) = sink.finish() {
            // Whatever reached the disk stays as a part file for recovery.
            self.report_failed(sink.into_segment(), &e);
            return Err(e);
        }
        let segment = sink.into_segment();
        self.ctx.state.lock().segment = None;

        log::info!(
            "[segmenter] segment {} complete: {:?} ({:.1}s)",
            segment.index,
            segment.path,
            segment.clock.elapsed().as_secs_f64()
        );

        let job = FinalizeJob {
            segment,
            settings: self.settings,
            done,
        };
        if let Err(e) = self.ctx.queue.send(job) {
            let seg = e.into_inner().segment;
            self.release(&seg);
            return Err(RecorderError::storage_other(&seg.path, "finalizer is gone"));
        }
        Ok(())
    }

    /// Abandons the open segment after a storage failure.
    pub fn fail(&mut self, err: &RecorderError) {
        if let Some(sink) = self.sink.take() {
            self.report_failed(sink.abandon(), err);
        }
    }

    fn report_failed(&self, seg: Segment, err: &RecorderError) {
        log::error!("[segmenter] segment {} failed: {:?}: {}", seg.index, seg.path, err);
        self.release(&seg);
        self.ctx.events.publish(RecorderEvent::SegmentFailed {
            segment: seg.info(),
            error: err.to_string(),
        });
    }

    fn release(&self, seg: &Segment) {
        self.ctx.active.unpin([&seg.path, &seg.part_path]);
        self.ctx.state.lock().segment = None;
    }
}
