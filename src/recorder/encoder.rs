// src/recorder/encoder.rs
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::EncodeError;
use crate::recorder::config::{OutputFormat, Quality};

/// External format converter. Implementations must not touch the
/// filesystem beyond reading `input` and writing `output`.
pub trait Encoder: Send + Sync {
    fn encode(&self, input: &Path, output: &Path, quality: Quality) -> Result<(), EncodeError>;
}

/// Runs `ffmpeg` once per segment; the codec follows the output extension.
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn args(input: &Path, output: &Path, quality: Quality) -> Result<Vec<String>, EncodeError> {
        let ext = output
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let format: OutputFormat = ext
            .parse()
            .map_err(|e: String| EncodeError::new(input, e))?;

        let codec = match format {
            OutputFormat::Wav => "pcm_s16le",
            OutputFormat::Mp3 => "libmp3lame",
            OutputFormat::Flac => "flac",
            OutputFormat::Ogg => "libvorbis",
            OutputFormat::Opus => "libopus",
        };

        let mut args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-codec:a".to_string(),
            codec.to_string(),
        ];
        if format.is_lossy() {
            args.push("-b:a".to_string());
            args.push(format!("{}k", quality.bitrate_kbps()));
        }
        args.push(output.to_string_lossy().into_owned());
        Ok(args)
    }
}

impl Encoder for FfmpegEncoder {
    fn encode(&self, input: &Path, output: &Path, quality: Quality) -> Result<(), EncodeError> {
        let args = Self::args(input, output, quality)?;
        log::info!(
            "[encoder] {} {} → {}",
            self.ffmpeg.display(),
            input.display(),
            output.display()
        );

        let out = Command::new(&self.ffmpeg)
            .args(&args)
            .output()
            .map_err(|e| EncodeError::new(input, format!("spawn {:?}: {}", self.ffmpeg, e)))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let last = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(EncodeError::new(
                input,
                format!("ffmpeg exited with {}: {}", out.status, last),
            ));
        }
        Ok(())
    }
}
