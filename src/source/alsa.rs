use std::time::{Duration, Instant};

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::error::{RecorderError, RecorderResult};
use crate::source::{AudioSource, CaptureSpec, CaptureStream, Frame, check_spec};

// Upper bound for a single snd_pcm_wait so commands are serviced promptly.
const ALSA_POLL_MS: u32 = 50;
const ALSA_OPEN_RETRY_MS: u64 = 50;
const ALSA_PERIODS: Frames = 4;
const EAGAIN: i32 = 11;
const EBUSY: i32 = 16;

/// Capture from an ALSA PCM. For loopback capture point `device` at a
/// monitor/loopback PCM (e.g. `pulse` or `hw:Loopback,1,0`).
pub struct AlsaSource;

impl AlsaSource {
    pub fn new() -> Self {
        Self
    }

    /// Opens non-blocking so a busy device fails immediately instead of
    /// hanging; retries only until `open_timeout`.
    fn open_pcm(spec: &CaptureSpec) -> RecorderResult<PCM> {
        let deadline = Instant::now() + spec.open_timeout;
        loop {
            match PCM::new(&spec.device, Direction::Capture, true) {
                Ok(pcm) => return Ok(pcm),
                Err(e) if e.errno() == EBUSY && Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(ALSA_OPEN_RETRY_MS));
                }
                Err(e) => {
                    return Err(RecorderError::device(
                        spec.device.clone(),
                        format!("open failed: {}", e),
                    ));
                }
            }
        }
    }

    fn configure(pcm: &PCM, spec: &CaptureSpec) -> Result<(Frames, u32), alsa::Error> {
        let hwp = HwParams::any(pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::s16())?;
        hwp.set_channels(spec.channels as u32)?;
        hwp.set_rate(spec.sample_rate, ValueOr::Nearest)?;
        let period = hwp.set_period_size_near(spec.chunk_size as Frames, ValueOr::Nearest)?;
        hwp.set_buffer_size_near(period * ALSA_PERIODS)?;
        pcm.hw_params(&hwp)?;
        let rate = hwp.get_rate()?;
        Ok((period, rate))
    }
}

impl Default for AlsaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for AlsaSource {
    fn name(&self) -> &str {
        "alsa"
    }

    fn open(&self, spec: &CaptureSpec) -> RecorderResult<Box<dyn CaptureStream>> {
        check_spec(spec)?;
        let pcm = Self::open_pcm(spec)?;

        let (period, rate) = Self::configure(&pcm, spec).map_err(|e| {
            RecorderError::device(spec.device.clone(), format!("hw params rejected: {}", e))
        })?;

        if rate != spec.sample_rate {
            return Err(RecorderError::device(
                spec.device.clone(),
                format!("requested {}Hz, device offers {}Hz", spec.sample_rate, rate),
            ));
        }

        pcm.prepare()
            .and_then(|_| pcm.start())
            .map_err(|e| RecorderError::device(spec.device.clone(), format!("start failed: {}", e)))?;

        log::info!(
            "[alsa] capture '{}' started: {}Hz, {}ch, period={} frames",
            spec.device,
            rate,
            spec.channels,
            period
        );

        let channels = spec.channels as usize;
        Ok(Box::new(AlsaStream {
            pcm: Some(pcm),
            buf: vec![0i16; period.max(1) as usize * channels],
            fifo: Vec::with_capacity(spec.chunk_size * channels * 2),
            spec: spec.clone(),
            next_seq: 1,
            last_data: Instant::now(),
        }))
    }
}

struct AlsaStream {
    pcm: Option<PCM>,
    buf: Vec<i16>,
    fifo: Vec<i16>,
    spec: CaptureSpec,
    next_seq: u64,
    last_data: Instant,
}

impl AlsaStream {
    /// Pulls whatever the device has. Returns `false` if the poll timed out.
    fn fill(&mut self, pcm: &PCM) -> RecorderResult<bool> {
        let ready = pcm
            .wait(Some(ALSA_POLL_MS))
            .map_err(|e| RecorderError::capture(format!("{}: wait failed: {}", self.spec.device, e)))?;
        if !ready {
            return Ok(false);
        }

        let io = pcm
            .io_i16()
            .map_err(|e| RecorderError::capture(format!("{}: {}", self.spec.device, e)))?;

        match io.readi(&mut self.buf) {
            Ok(frames) => {
                let n = frames * self.spec.channels as usize;
                self.fifo.extend_from_slice(&self.buf[..n]);
                if frames > 0 {
                    self.last_data = Instant::now();
                }
                Ok(true)
            }
            Err(e) if e.errno() == EAGAIN => Ok(true),
            Err(e) => {
                // Overruns are recoverable; anything else means the device is gone.
                log::warn!("[alsa] read error on '{}': {}", self.spec.device, e);
                pcm.try_recover(e, true).map_err(|e| {
                    RecorderError::capture(format!("{}: unrecoverable: {}", self.spec.device, e))
                })?;
                Ok(true)
            }
        }
    }
}

impl CaptureStream for AlsaStream {
    fn read_frame(&mut self) -> RecorderResult<Option<Frame>> {
        let Some(pcm) = self.pcm.take() else {
            return Err(RecorderError::capture(format!("{}: stream closed", self.spec.device)));
        };

        let target = self.spec.chunk_size * self.spec.channels as usize;
        let mut result = Ok(None);

        while self.fifo.len() < target {
            match self.fill(&pcm) {
                Ok(true) => continue,
                Ok(false) => {
                    if self.last_data.elapsed() > self.spec.read_timeout {
                        result = Err(RecorderError::capture(format!(
                            "{}: no audio for {:?}",
                            self.spec.device, self.spec.read_timeout
                        )));
                    }
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.pcm = Some(pcm);

        if self.fifo.len() >= target && result.is_ok() {
            let samples: Vec<i16> = self.fifo.drain(..target).collect();
            let seq = self.next_seq;
            self.next_seq += 1;
            return Ok(Some(Frame {
                seq,
                sample_rate: self.spec.sample_rate,
                channels: self.spec.channels,
                samples,
            }));
        }

        result
    }

    fn close(&mut self) {
        if let Some(pcm) = self.pcm.take() {
            if let Err(e) = pcm.drop() {
                log::debug!("[alsa] drop on close failed: {}", e);
            }
            log::info!("[alsa] capture '{}' closed", self.spec.device);
        }
    }
}

impl Drop for AlsaStream {
    fn drop(&mut self) {
        self.close();
    }
}
