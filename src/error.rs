use std::path::PathBuf;

use thiserror::Error;

pub type RecorderResult<T> = Result<T, RecorderError>;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("device '{device}' unavailable: {message}")]
    DeviceUnavailable { device: String, message: String },
    #[error("capture failed: {message}")]
    Capture { message: String },
    #[error("storage failure on {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("'{operation}' not allowed while {mode}")]
    InvalidState { operation: String, mode: String },
    #[error("{message}")]
    Config { message: String },
    #[error("{dir:?} is in use by another recorder (pid {pid})")]
    Locked { dir: PathBuf, pid: u32 },
}

impl RecorderError {
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Wraps a non-io failure (e.g. from hound) as a storage error.
    pub fn storage_other(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            source: std::io::Error::other(err.to_string()),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, mode: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            mode: mode.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Failure reported by the external encoder for a single segment.
#[derive(Debug, Error)]
#[error("encoding {input:?} failed: {detail}")]
pub struct EncodeError {
    pub input: PathBuf,
    pub detail: String,
}

impl EncodeError {
    pub fn new(input: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            detail: detail.into(),
        }
    }
}
