// src/recorder/segment.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;

use crate::recorder::config::{OutputFormat, RAW_EXTENSION};

/// strftime pattern of a segment stem; sorts lexicographically by time.
pub const STEM_FORMAT: &str = "%Y%m%d_%H%M%S";
const STEM_LEN: usize = 15;
pub const PART_SUFFIX: &str = "part";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Open,
    Finalizing,
    Closed,
    Encoded,
    /// The raw file could not be written; capture stopped.
    Failed,
    /// Encoding failed; the raw file is retained.
    EncodeFailed,
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SegmentStatus::Open => "open",
            SegmentStatus::Finalizing => "finalizing",
            SegmentStatus::Closed => "closed",
            SegmentStatus::Encoded => "encoded",
            SegmentStatus::Failed => "failed",
            SegmentStatus::EncodeFailed => "encode_failed",
        };
        f.write_str(s)
    }
}

/// Sample-accurate rotation accounting for one segment.
///
/// Rotation is due at the first frame boundary where the accumulated count
/// reaches the target, so a segment overshoots by less than one frame and
/// rotations never drift against the sample clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentClock {
    sample_rate: u32,
    target: u64,
    samples: u64,
}

impl SegmentClock {
    pub fn new(target_duration: Duration, sample_rate: u32) -> Self {
        let nanos = target_duration.as_nanos() * sample_rate as u128;
        let target = nanos.div_ceil(1_000_000_000).max(1) as u64;
        Self {
            sample_rate,
            target,
            samples: 0,
        }
    }

    /// Adds `samples` (per channel) and reports whether rotation is due.
    pub fn advance(&mut self, samples: u64) -> bool {
        self.samples += samples;
        self.is_due()
    }

    pub fn is_due(&self) -> bool {
        self.samples >= self.target
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn target_samples(&self) -> u64 {
        self.target
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / self.sample_rate.max(1) as f64)
    }
}

/// One output file's lifetime.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u64,
    pub started_at: DateTime<Local>,
    /// Final raw path (`<stem>.wav`).
    pub path: PathBuf,
    /// Path written while open (`<stem>.wav.part`).
    pub part_path: PathBuf,
    pub clock: SegmentClock,
    pub status: SegmentStatus,
}

impl Segment {
    pub fn new(
        index: u64,
        dir: &Path,
        started_at: DateTime<Local>,
        target: Duration,
        sample_rate: u32,
    ) -> Self {
        let path = unique_segment_path(dir, &segment_stem(&started_at));
        let part_path = part_path_for(&path);
        Self {
            index,
            started_at,
            path,
            part_path,
            clock: SegmentClock::new(target, sample_rate),
            status: SegmentStatus::Open,
        }
    }

    /// Rebuilds a closed segment from a raw file left by an earlier run.
    pub fn recovered(index: u64, path: PathBuf, sample_rate: u32) -> Self {
        let started_at = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_segment_name)
            .and_then(|t| t.and_local_timezone(Local).earliest())
            .unwrap_or_else(Local::now);
        Self {
            index,
            started_at,
            part_path: part_path_for(&path),
            path,
            clock: SegmentClock::new(Duration::ZERO, sample_rate),
            status: SegmentStatus::Closed,
        }
    }

    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            index: self.index,
            path: self.path.clone(),
            started_at: self.started_at.to_rfc3339(),
            samples: self.clock.samples(),
            target_samples: self.clock.target_samples(),
            status: self.status,
        }
    }
}

/// Serializable view of a segment for status reports and events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentInfo {
    pub index: u64,
    pub path: PathBuf,
    pub started_at: String,
    pub samples: u64,
    pub target_samples: u64,
    pub status: SegmentStatus,
}

pub fn segment_stem(started_at: &DateTime<Local>) -> String {
    started_at.format(STEM_FORMAT).to_string()
}

/// Parses the timestamp prefix of a segment file name.
pub fn parse_segment_name(name: &str) -> Option<NaiveDateTime> {
    let stem = name.get(..STEM_LEN)?;
    let rest = &name[STEM_LEN..];
    if !(rest.starts_with('.') || rest.starts_with('_')) {
        return None;
    }
    NaiveDateTime::parse_from_str(stem, STEM_FORMAT).ok()
}

pub fn part_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(PART_SUFFIX);
    PathBuf::from(os)
}

pub fn encoded_path_for(raw: &Path, format: OutputFormat) -> PathBuf {
    raw.with_extension(format.extension())
}

/// `<dir>/<stem>.wav`, or `<stem>_N.wav` if any artifact of that stem exists.
pub fn unique_segment_path(dir: &Path, stem: &str) -> PathBuf {
    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            stem.to_string()
        } else {
            format!("{}_{}", stem, n)
        };
        let raw = dir.join(format!("{}.{}", candidate, RAW_EXTENSION));
        let taken = raw.exists()
            || part_path_for(&raw).exists()
            || OutputFormat::ALL
                .iter()
                .any(|f| encoded_path_for(&raw, *f).exists());
        if !taken {
            return raw;
        }
        n += 1;
    }
}
