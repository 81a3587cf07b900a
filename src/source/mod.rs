// src/source/mod.rs

use std::sync::Arc;
use std::time::Duration;

use crate::error::{RecorderError, RecorderResult};

#[cfg(feature = "audio")]
pub mod alsa;
pub mod sine;

#[cfg(feature = "audio")]
pub use self::alsa::AlsaSource;
pub use sine::SineSource;

/// Device id that selects the built-in tone generator instead of hardware.
pub const SINE_DEVICE: &str = "sine";

/// One fixed-size chunk of interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl Frame {
    /// Samples per channel.
    pub fn len_per_channel(&self) -> u64 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / self.channels as usize) as u64
    }

    /// Averages all channels into one.
    pub fn downmix_mono(&self) -> Vec<i16> {
        let ch = self.channels.max(1) as usize;
        self.samples
            .chunks_exact(ch)
            .map(|c| {
                let sum: i32 = c.iter().map(|s| *s as i32).sum();
                (sum / ch as i32) as i16
            })
            .collect()
    }
}

/// Parameters for opening a capture stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in every frame.
    pub chunk_size: usize,
    pub open_timeout: Duration,
    pub read_timeout: Duration,
}

impl CaptureSpec {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Capability to open capture streams. Shared with the capture thread so it
/// can reopen once after a device loss.
pub trait AudioSource: Send + Sync {
    fn name(&self) -> &str;

    /// Opens the device named in `spec`. Fails with `DeviceUnavailable`
    /// within `spec.open_timeout`.
    fn open(&self, spec: &CaptureSpec) -> RecorderResult<Box<dyn CaptureStream>>;
}

pub trait CaptureStream: Send {
    /// Returns the next frame of exactly `chunk_size` samples per channel.
    ///
    /// `Ok(None)` means nothing arrived within the stream's poll interval; the
    /// caller is expected to service its commands and read again. A device
    /// that stays silent past `read_timeout` yields `Capture`.
    fn read_frame(&mut self) -> RecorderResult<Option<Frame>>;

    /// Releases the device. Idempotent.
    fn close(&mut self);
}

/// Routes `sine` to the generator and everything else to ALSA.
pub struct SystemSource {
    sine: SineSource,
    #[cfg(feature = "audio")]
    alsa: AlsaSource,
}

impl SystemSource {
    pub fn new() -> Self {
        Self {
            sine: SineSource::new(440.0),
            #[cfg(feature = "audio")]
            alsa: AlsaSource::new(),
        }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for SystemSource {
    fn name(&self) -> &str {
        "system"
    }

    fn open(&self, spec: &CaptureSpec) -> RecorderResult<Box<dyn CaptureStream>> {
        if spec.device == SINE_DEVICE {
            return self.sine.open(spec);
        }

        #[cfg(feature = "audio")]
        {
            self.alsa.open(spec)
        }

        #[cfg(not(feature = "audio"))]
        {
            Err(RecorderError::device(
                spec.device.clone(),
                "built without the 'audio' feature; only 'sine' is available",
            ))
        }
    }
}

pub fn system_source() -> Arc<dyn AudioSource> {
    Arc::new(SystemSource::new())
}

pub(crate) fn check_spec(spec: &CaptureSpec) -> RecorderResult<()> {
    if spec.sample_rate == 0 || spec.channels == 0 || spec.chunk_size == 0 {
        return Err(RecorderError::device(
            spec.device.clone(),
            format!(
                "invalid capture format {}Hz/{}ch/{} samples",
                spec.sample_rate, spec.channels, spec.chunk_size
            ),
        ));
    }
    Ok(())
}
