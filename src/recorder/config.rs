// src/recorder/config.rs
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::CaptureSpec;

/// Extension of the raw capture artifact.
pub const RAW_EXTENSION: &str = "wav";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
    Flac,
    Ogg,
    Opus,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Wav,
        OutputFormat::Mp3,
        OutputFormat::Flac,
        OutputFormat::Ogg,
        OutputFormat::Opus,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Flac => "flac",
            OutputFormat::Ogg => "ogg",
            OutputFormat::Opus => "opus",
        }
    }

    /// True when the captured WAV already is the final artifact.
    pub fn is_raw(self) -> bool {
        self == OutputFormat::Wav
    }

    pub fn is_lossy(self) -> bool {
        matches!(self, OutputFormat::Mp3 | OutputFormat::Ogg | OutputFormat::Opus)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.extension() == lower)
            .ok_or_else(|| format!("unknown format '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

impl Quality {
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            Quality::High => 320,
            Quality::Medium => 192,
            Quality::Low => 128,
        }
    }
}

/// Validated configuration snapshot the recording engine runs on.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: usize,
    pub mono: bool,
    pub segment_duration: Duration,
    pub retention_days: u64,
    pub sweep_interval: Duration,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub quality: Quality,
    pub keep_raw: bool,
    pub encode_queue: usize,
    pub open_timeout: Duration,
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl RecorderConfig {
    pub fn capture_spec(&self) -> CaptureSpec {
        CaptureSpec {
            device: self.device.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            chunk_size: self.chunk_size,
            open_timeout: self.open_timeout,
            read_timeout: self.read_timeout,
        }
    }

    /// Channels actually written to disk.
    pub fn output_channels(&self) -> u16 {
        if self.mono { 1 } else { self.channels }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 44_100,
            channels: 2,
            chunk_size: 1024,
            mono: false,
            segment_duration: Duration::from_secs(3 * 3600),
            retention_days: 90,
            sweep_interval: Duration::from_secs(3600),
            output_dir: PathBuf::from("recordings"),
            format: OutputFormat::Mp3,
            quality: Quality::High,
            keep_raw: false,
            encode_queue: 4,
            open_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}
