// src/recorder/finalizer.rs
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::error::{EncodeError, RecorderError, RecorderResult};
use crate::recorder::active::ActiveFiles;
use crate::recorder::config::{OutputFormat, Quality};
use crate::recorder::encoder::Encoder;
use crate::recorder::segment::{Segment, SegmentStatus, encoded_path_for};
use crate::recorder::state::{EventBus, RecorderEvent, RecorderState};

/// Output settings captured when a segment is handed off, so a later
/// configuration change never affects a queued segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub format: OutputFormat,
    pub quality: Quality,
    pub keep_raw: bool,
}

pub struct FinalizeJob {
    pub segment: Segment,
    pub settings: EncodeSettings,
    /// Receives the terminal status once the job is done.
    pub done: Option<Sender<RecorderResult<SegmentStatus>>>,
}

pub type FinalizeQueue = Sender<FinalizeJob>;

/// Shared handles the worker needs.
#[derive(Clone)]
pub struct FinalizerContext {
    pub encoder: Arc<dyn Encoder>,
    pub active: ActiveFiles,
    pub state: Arc<Mutex<RecorderState>>,
    pub events: EventBus,
}

/// Single worker thread draining a bounded queue of closed segments.
///
/// Segments are finalized in hand-off order. When the queue is full the
/// sender blocks, which throttles capture instead of growing memory.
pub struct Finalizer {
    tx: Option<FinalizeQueue>,
    handle: Option<JoinHandle<()>>,
}

impl Finalizer {
    pub fn spawn(ctx: FinalizerContext, capacity: usize) -> RecorderResult<Self> {
        let (tx, rx) = bounded::<FinalizeJob>(capacity.max(1));
        let handle = thread::Builder::new()
            .name("finalizer".into())
            .spawn(move || run_finalizer(rx, ctx))
            .map_err(|e| RecorderError::capture(format!("spawn finalizer: {}", e)))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// A new sender for the queue. The worker exits once every sender,
    /// including the one held here, is dropped.
    pub fn queue(&self) -> Option<FinalizeQueue> {
        self.tx.clone()
    }

    /// Closes the queue and waits for pending jobs to finish.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                log::error!("[finalizer] worker panicked");
            }
        }
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_finalizer(rx: Receiver<FinalizeJob>, ctx: FinalizerContext) {
    log::debug!("[finalizer] started");
    for job in rx.iter() {
        let FinalizeJob {
            segment,
            settings,
            done,
        } = job;
        let status = finalize(segment, settings, &ctx);
        if let Some(done) = done {
            let _ = done.send(Ok(status));
        }
    }
    log::debug!("[finalizer] queue closed, exiting");
}

/// Encodes one closed segment and releases its paths. Never fails; the
/// outcome is the returned status plus events and `last_error`.
pub fn finalize(mut segment: Segment, settings: EncodeSettings, ctx: &FinalizerContext) -> SegmentStatus {
    segment.status = SegmentStatus::Closed;
    let raw = segment.path.clone();
    let mut pinned: Vec<PathBuf> = vec![raw.clone(), segment.part_path.clone()];

    let artifact = if settings.format.is_raw() {
        segment.status = SegmentStatus::Encoded;
        Some(raw.clone())
    } else {
        let out = encoded_path_for(&raw, settings.format);
        ctx.active.pin([out.clone()]);
        pinned.push(out.clone());

        let result = ctx
            .encoder
            .encode(&raw, &out, settings.quality)
            .and_then(|()| {
                if out.exists() {
                    Ok(())
                } else {
                    Err(EncodeError::new(&raw, "encoder produced no output"))
                }
            });

        match result {
            Ok(()) => {
                if !settings.keep_raw {
                    if let Err(e) = fs::remove_file(&raw) {
                        log::warn!("[finalizer] could not remove {:?}: {}", raw, e);
                    }
                }
                segment.status = SegmentStatus::Encoded;
                log::info!("[finalizer] encoded {:?}", out);
                Some(out)
            }
            Err(e) => {
                if out.exists() {
                    let _ = fs::remove_file(&out);
                }
                segment.status = SegmentStatus::EncodeFailed;
                log::error!("[finalizer] {} (raw file kept)", e);
                ctx.state.lock().last_error = Some(e.to_string());
                ctx.events.publish(RecorderEvent::EncodeFailed {
                    segment: segment.info(),
                    detail: e.detail.clone(),
                });
                None
            }
        }
    };

    ctx.active.unpin(pinned.iter());
    ctx.state.lock().segments_completed += 1;

    if let Some(artifact) = artifact {
        ctx.events.publish(RecorderEvent::SegmentFinalized {
            segment: segment.info(),
            artifact,
        });
    }
    segment.status
}
