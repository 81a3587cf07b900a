// src/lib.rs
pub mod api;
pub mod config;
pub mod error;
pub mod lock;
pub mod recorder;
pub mod source;
pub mod testing;
pub mod wait;

// Re-export die wichtigsten Typen
pub use config::Config;
pub use error::{EncodeError, RecorderError, RecorderResult};
pub use recorder::{
    FfmpegEncoder, Mode, OutputFormat, Quality, Recorder, RecorderConfig, RecorderEvent,
    RecorderStatus,
};
pub use source::{AudioSource, CaptureSpec, CaptureStream, Frame};
