// src/recorder/capture.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::{RecorderError, RecorderResult};
use crate::recorder::segment::SegmentStatus;
use crate::recorder::segmenter::Segmenter;
use crate::recorder::state::{EventBus, Mode, RecorderEvent, RecorderState};
use crate::source::{AudioSource, CaptureSpec, CaptureStream};

/// Requests from the controller. Applied between frames only.
pub enum Command {
    Pause(Sender<()>),
    Resume(Sender<()>),
    SetSegmentDuration(Duration),
    /// Closes the open segment; the reply carries its final status once
    /// the finalizer is done with it.
    Stop(Sender<RecorderResult<SegmentStatus>>),
}

enum Exit {
    Stopped,
    Detached,
}

/// Owns the capture stream and the segmenter on the capture thread.
pub struct CaptureLoop {
    pub source: Arc<dyn AudioSource>,
    pub spec: CaptureSpec,
    pub stream: Box<dyn CaptureStream>,
    pub segmenter: Segmenter,
    pub commands: Receiver<Command>,
    pub state: Arc<Mutex<RecorderState>>,
    pub events: EventBus,
    pub reconnect_delay: Duration,
}

impl CaptureLoop {
    pub fn run(mut self) {
        log::info!(
            "[capture] running on '{}' ({})",
            self.spec.device,
            self.source.name()
        );
        match self.run_inner() {
            Ok(Exit::Stopped) => log::info!("[capture] stopped"),
            Ok(Exit::Detached) => {
                log::warn!("[capture] controller went away, closing segment");
                if let Err(e) = self.segmenter.close(None) {
                    log::error!("[capture] final close failed: {}", e);
                }
            }
            Err(e) => self.halt(e),
        }
        self.stream.close();
    }

    fn run_inner(&mut self) -> RecorderResult<Exit> {
        let mut paused = false;
        let mut fresh_reconnect = false;

        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(cmd) => {
                        if let Some(exit) = self.apply(cmd, &mut paused) {
                            return Ok(exit);
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Ok(Exit::Detached),
                }
            }

            match self.stream.read_frame() {
                Ok(Some(frame)) => {
                    fresh_reconnect = false;
                    // Paused audio is drained from the device and discarded.
                    if !paused {
                        self.segmenter.write(&frame)?;
                    }
                }
                Ok(None) => {}
                Err(e) if fresh_reconnect => {
                    return Err(RecorderError::capture(format!(
                        "{} (again right after reconnecting)",
                        e
                    )));
                }
                Err(e) => {
                    if let Some(exit) = self.reconnect(e, &mut paused)? {
                        return Ok(exit);
                    }
                    fresh_reconnect = true;
                }
            }
        }
    }

    fn apply(&mut self, cmd: Command, paused: &mut bool) -> Option<Exit> {
        match cmd {
            Command::Pause(ack) => {
                *paused = true;
                log::info!("[capture] paused");
                let _ = ack.send(());
            }
            Command::Resume(ack) => {
                *paused = false;
                self.segmenter.reset_continuity();
                log::info!("[capture] resumed");
                let _ = ack.send(());
            }
            Command::SetSegmentDuration(d) => self.segmenter.set_segment_duration(d),
            Command::Stop(reply) => {
                self.stop(reply);
                return Some(Exit::Stopped);
            }
        }
        None
    }

    fn stop(&mut self, reply: Sender<RecorderResult<SegmentStatus>>) {
        if let Err(e) = self.segmenter.close(Some(reply.clone())) {
            log::error!("[capture] closing final segment: {}", e);
            self.state.lock().last_error = Some(e.to_string());
            let _ = reply.send(Err(e));
        }
    }

    /// One bounded reopen attempt; the segment stays open across it.
    /// Commands keep being served while waiting out the delay, so a stop
    /// ends the wait early.
    fn reconnect(
        &mut self,
        err: RecorderError,
        paused: &mut bool,
    ) -> RecorderResult<Option<Exit>> {
        log::warn!(
            "[capture] {}; reopening '{}' in {:?}",
            err,
            self.spec.device,
            self.reconnect_delay
        );
        self.stream.close();

        let deadline = Instant::now() + self.reconnect_delay;
        loop {
            match self.commands.recv_deadline(deadline) {
                Ok(cmd) => {
                    if let Some(exit) = self.apply(cmd, paused) {
                        return Ok(Some(exit));
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Ok(Some(Exit::Detached)),
            }
        }

        match self.source.open(&self.spec) {
            Ok(stream) => {
                self.stream = stream;
                self.segmenter.reset_continuity();
                log::info!("[capture] reconnected to '{}'", self.spec.device);
                Ok(None)
            }
            Err(open_err) => Err(RecorderError::capture(format!(
                "{}; reconnect failed: {}",
                err, open_err
            ))),
        }
    }

    fn halt(&mut self, err: RecorderError) {
        log::error!("[capture] halted: {}", err);
        if self.segmenter.is_open() {
            if matches!(err, RecorderError::Storage { .. }) {
                self.segmenter.fail(&err);
            } else if let Err(e) = self.segmenter.close(None) {
                log::error!("[capture] closing segment after halt: {}", e);
            }
        }

        let message = err.to_string();
        {
            let mut st = self.state.lock();
            st.mode = Mode::Idle;
            st.segment = None;
            st.last_error = Some(message.clone());
        }
        self.events.publish(RecorderEvent::CaptureHalted { error: message });
    }
}
