use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};

use crate::recorder::{OutputFormat, Quality, RecorderConfig};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: usize,
    pub mono: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub segment_secs: u64,
    pub format: OutputFormat,
    pub quality: Quality,
    pub keep_raw: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub open_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct ControlConfig {
    pub http_bind: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
    pub retention: RetentionConfig,
    pub encoder: EncoderConfig,
    pub capture: CaptureConfig,
    pub control: ControlConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing config {:?}", path))?;
        config.validate().context("config validation failed")?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let a = &self.audio;
        if a.device.trim().is_empty() {
            bail!("audio.device must not be empty");
        }
        if a.sample_rate == 0 {
            bail!("audio.sample_rate must be > 0");
        }
        if !(1..=8).contains(&a.channels) {
            bail!("audio.channels must be between 1 and 8");
        }
        if a.chunk_size == 0 {
            bail!("audio.chunk_size must be > 0");
        }

        if self.recording.output_dir.as_os_str().is_empty() {
            bail!("recording.output_dir must not be empty");
        }
        if self.recording.segment_secs == 0 {
            bail!("recording.segment_secs must be > 0");
        }

        if self.retention.days == 0 {
            bail!("retention.days must be >= 1");
        }
        if self.retention.sweep_interval_secs == 0 {
            bail!("retention.sweep_interval_secs must be > 0");
        }

        if self.encoder.ffmpeg_path.as_os_str().is_empty() {
            bail!("encoder.ffmpeg_path must not be empty");
        }
        if self.encoder.queue_capacity == 0 {
            bail!("encoder.queue_capacity must be >= 1");
        }

        if let Some(ref bind) = self.control.http_bind {
            if bind.trim().is_empty() {
                bail!("control.http_bind must not be empty when set");
            }
        }

        crate::recorder::controller::validate(&self.recorder_config())?;
        Ok(())
    }

    /// The snapshot the recording engine runs on.
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            device: self.audio.device.trim().to_string(),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            chunk_size: self.audio.chunk_size,
            mono: self.audio.mono,
            segment_duration: Duration::from_secs(self.recording.segment_secs),
            retention_days: self.retention.days,
            sweep_interval: Duration::from_secs(self.retention.sweep_interval_secs),
            output_dir: self.recording.output_dir.clone(),
            format: self.recording.format,
            quality: self.recording.quality,
            keep_raw: self.recording.keep_raw,
            encode_queue: self.encoder.queue_capacity,
            open_timeout: Duration::from_millis(self.capture.open_timeout_ms),
            read_timeout: Duration::from_millis(self.capture.read_timeout_ms),
            reconnect_delay: Duration::from_millis(self.capture.reconnect_delay_ms),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let d = RecorderConfig::default();
        Self {
            device: d.device,
            sample_rate: d.sample_rate,
            channels: d.channels,
            chunk_size: d.chunk_size,
            mono: d.mono,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let d = RecorderConfig::default();
        Self {
            output_dir: d.output_dir,
            segment_secs: d.segment_duration.as_secs(),
            format: d.format,
            quality: d.quality,
            keep_raw: d.keep_raw,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        let d = RecorderConfig::default();
        Self {
            days: d.retention_days,
            sweep_interval_secs: d.sweep_interval.as_secs(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            queue_capacity: RecorderConfig::default().encode_queue,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let d = RecorderConfig::default();
        Self {
            open_timeout_ms: d.open_timeout.as_millis() as u64,
            read_timeout_ms: d.read_timeout.as_millis() as u64,
            reconnect_delay_ms: d.reconnect_delay.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        let rc = cfg.recorder_config();
        assert_eq!(rc.segment_duration, Duration::from_secs(10_800));
        assert_eq!(rc.retention_days, 90);
        assert_eq!(rc.format, OutputFormat::Mp3);
        assert_eq!(rc.quality, Quality::High);
        assert!(cfg.control.http_bind.is_none());
    }

    #[test]
    fn parses_all_sections() {
        let cfg: Config = toml::from_str(
            r#"
            [audio]
            device = "sine"
            sample_rate = 48000
            channels = 1
            mono = true

            [recording]
            output_dir = "/var/rec"
            segment_secs = 600
            format = "flac"
            quality = "low"
            keep_raw = true

            [retention]
            days = 7

            [encoder]
            queue_capacity = 2

            [capture]
            reconnect_delay_ms = 250

            [control]
            http_bind = "127.0.0.1:3010"
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();

        let rc = cfg.recorder_config();
        assert_eq!(rc.device, "sine");
        assert_eq!(rc.sample_rate, 48_000);
        assert_eq!(rc.output_channels(), 1);
        assert_eq!(rc.format, OutputFormat::Flac);
        assert_eq!(rc.quality, Quality::Low);
        assert!(rc.keep_raw);
        assert_eq!(rc.encode_queue, 2);
        assert_eq!(rc.reconnect_delay, Duration::from_millis(250));
        assert_eq!(rc.chunk_size, 1024);
        assert_eq!(cfg.control.http_bind.as_deref(), Some("127.0.0.1:3010"));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut cfg = Config::default();
        cfg.retention.days = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.audio.channels = 9;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.encoder.queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.recording.segment_secs = 24 * 3600;
        assert!(cfg.validate().is_err(), "a day of stereo 44.1k overflows a WAV");
    }

    #[test]
    fn unknown_format_fails_to_parse() {
        let res: Result<Config, _> = toml::from_str("[recording]\nformat = \"aiff\"\n");
        assert!(res.is_err());
    }

    #[test]
    fn load_reports_path_on_error() {
        let err = Config::load("/nonexistent/airlift.toml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/airlift.toml"));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.audio.device = "hw:Loopback,1,0".to_string();
        cfg.control.http_bind = Some("0.0.0.0:3010".to_string());
        cfg.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), cfg);
    }
}
