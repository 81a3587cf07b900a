use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::error::{EncodeError, RecorderError, RecorderResult};
use crate::recorder::{Encoder, Quality};
use crate::source::{AudioSource, CaptureSpec, CaptureStream, Frame};

const POLL: Duration = Duration::from_millis(10);

enum FeedItem {
    Samples(Vec<i16>),
    Fail(String),
}

/// Audio source driven by the test through a [`SourceFeed`].
///
/// Every stream opened from it reads the same feed, so a reconnect picks
/// up where the failed stream stopped. Sequence numbers restart at 1 per
/// stream like a real device.
pub struct ScriptedSource {
    rx: Receiver<FeedItem>,
    shared: Arc<FeedShared>,
}

#[derive(Default)]
struct FeedShared {
    opens: AtomicUsize,
    fail_opens: AtomicUsize,
    delivered: AtomicUsize,
}

#[derive(Clone)]
pub struct SourceFeed {
    tx: Sender<FeedItem>,
    shared: Arc<FeedShared>,
}

impl ScriptedSource {
    pub fn new() -> (Self, SourceFeed) {
        let (tx, rx) = unbounded();
        let shared = Arc::new(FeedShared::default());
        (
            Self {
                rx,
                shared: shared.clone(),
            },
            SourceFeed { tx, shared },
        )
    }
}

impl SourceFeed {
    /// Queues one frame of interleaved samples.
    pub fn push(&self, samples: Vec<i16>) {
        let _ = self.tx.send(FeedItem::Samples(samples));
    }

    /// Queues `count` frames of `len` samples each, numbered consecutively
    /// from `start` so tests can check what reached disk.
    pub fn push_ramp(&self, start: i16, count: usize, len: usize) -> i16 {
        let mut next = start;
        for _ in 0..count {
            let samples: Vec<i16> = (0..len)
                .map(|_| {
                    let v = next;
                    next = next.wrapping_add(1);
                    v
                })
                .collect();
            self.push(samples);
        }
        next
    }

    /// The stream reading this item fails with a capture error.
    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(FeedItem::Fail(message.to_string()));
    }

    /// The next `n` opens fail with `DeviceUnavailable`.
    pub fn fail_opens(&self, n: usize) {
        self.shared.fail_opens.store(n, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Frames handed to a reader so far.
    pub fn delivered(&self) -> usize {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl AudioSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&self, spec: &CaptureSpec) -> RecorderResult<Box<dyn CaptureStream>> {
        let fail = self
            .shared
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(RecorderError::device(spec.device.clone(), "scripted open failure"));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            rx: self.rx.clone(),
            shared: self.shared.clone(),
            spec: spec.clone(),
            next_seq: 1,
            closed: false,
        }))
    }
}

struct ScriptedStream {
    rx: Receiver<FeedItem>,
    shared: Arc<FeedShared>,
    spec: CaptureSpec,
    next_seq: u64,
    closed: bool,
}

impl CaptureStream for ScriptedStream {
    fn read_frame(&mut self) -> RecorderResult<Option<Frame>> {
        if self.closed {
            return Err(RecorderError::capture("scripted stream closed"));
        }
        match self.rx.recv_timeout(POLL) {
            Ok(FeedItem::Samples(samples)) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.shared.delivered.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Frame {
                    seq,
                    sample_rate: self.spec.sample_rate,
                    channels: self.spec.channels,
                    samples,
                }))
            }
            Ok(FeedItem::Fail(message)) => Err(RecorderError::capture(message)),
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Encoder that copies its input, or fails as scripted.
pub struct ScriptedEncoder {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    calls: Mutex<Vec<(PathBuf, PathBuf, Quality)>>,
    delay: Duration,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// The next call fails with `detail`. Unscripted calls succeed.
    pub fn fail_next(&self, detail: &str) {
        self.outcomes.lock().push_back(Err(detail.to_string()));
    }

    pub fn calls(&self) -> Vec<(PathBuf, PathBuf, Quality)> {
        self.calls.lock().clone()
    }
}

impl Default for ScriptedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for ScriptedEncoder {
    fn encode(&self, input: &Path, output: &Path, quality: Quality) -> Result<(), EncodeError> {
        self.calls
            .lock()
            .push((input.to_path_buf(), output.to_path_buf(), quality));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.outcomes.lock().pop_front() {
            Some(Err(detail)) => Err(EncodeError::new(input, detail)),
            _ => fs::copy(input, output)
                .map(|_| ())
                .map_err(|e| EncodeError::new(input, e.to_string())),
        }
    }
}
