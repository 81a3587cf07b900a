use std::time::{Duration, Instant};

use crate::error::{RecorderError, RecorderResult};
use crate::source::{AudioSource, CaptureSpec, CaptureStream, Frame, check_spec};

// Longest single sleep inside read_frame.
const SINE_POLL_INTERVAL_MS: u64 = 50;
const SINE_AMPLITUDE: f32 = 0.25;

/// Real-time paced tone generator.
pub struct SineSource {
    freq: f32,
}

impl SineSource {
    pub fn new(freq: f32) -> Self {
        Self { freq }
    }
}

impl AudioSource for SineSource {
    fn name(&self) -> &str {
        "sine"
    }

    fn open(&self, spec: &CaptureSpec) -> RecorderResult<Box<dyn CaptureStream>> {
        check_spec(spec)?;
        log::info!(
            "[sine] generating {}Hz at {}Hz/{}ch, {} samples per frame",
            self.freq,
            spec.sample_rate,
            spec.channels,
            spec.chunk_size
        );
        Ok(Box::new(SineStream {
            step: 2.0 * std::f32::consts::PI * self.freq / spec.sample_rate as f32,
            phase: 0.0,
            spec: spec.clone(),
            started: Instant::now(),
            next_seq: 1,
            closed: false,
        }))
    }
}

struct SineStream {
    step: f32,
    phase: f32,
    spec: CaptureSpec,
    started: Instant,
    next_seq: u64,
    closed: bool,
}

impl SineStream {
    fn due(&self) -> Instant {
        let produced = (self.next_seq - 1) as f64 * self.spec.chunk_size as f64;
        self.started + Duration::from_secs_f64(produced / self.spec.sample_rate as f64)
    }
}

impl CaptureStream for SineStream {
    fn read_frame(&mut self) -> RecorderResult<Option<Frame>> {
        if self.closed {
            return Err(RecorderError::capture("sine stream closed"));
        }

        let now = Instant::now();
        let due = self.due();
        if due > now {
            let wait = due - now;
            let poll = Duration::from_millis(SINE_POLL_INTERVAL_MS);
            if wait > poll {
                std::thread::sleep(poll);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        let channels = self.spec.channels as usize;
        let mut samples = Vec::with_capacity(self.spec.chunk_size * channels);
        for _ in 0..self.spec.chunk_size {
            let v = (self.phase.sin() * SINE_AMPLITUDE * i16::MAX as f32) as i16;
            self.phase = (self.phase + self.step) % (2.0 * std::f32::consts::PI);
            samples.extend(std::iter::repeat_n(v, channels));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        Ok(Some(Frame {
            seq,
            sample_rate: self.spec.sample_rate,
            channels: self.spec.channels,
            samples,
        }))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
