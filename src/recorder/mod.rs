// src/recorder/mod.rs

use std::time::SystemTime;

pub trait RetentionPolicy: Send {
    fn run(&mut self, now: SystemTime) -> SweepReport;
}

pub mod active;
pub mod capture;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod finalizer;
pub mod retention_fs;
pub mod segment;
pub mod segmenter;
pub mod sink_wav;
pub mod state;

pub use active::ActiveFiles;
pub use config::{OutputFormat, Quality, RecorderConfig};
pub use controller::Recorder;
pub use encoder::{Encoder, FfmpegEncoder};
pub use retention_fs::{FsRetention, SweepReport, Sweeper};
pub use segment::{Segment, SegmentClock, SegmentInfo, SegmentStatus};
pub use sink_wav::WavSink;
pub use state::{EventBus, Mode, RecorderEvent, RecorderStatus};
