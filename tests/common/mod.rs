#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;

use airlift_recorder::recorder::{OutputFormat, RecorderConfig, RecorderEvent};

/// 1 kHz mono, 100-sample frames, 1 s segments: ten frames per segment.
pub fn config(dir: &Path) -> RecorderConfig {
    RecorderConfig {
        device: "scripted".to_string(),
        sample_rate: 1000,
        channels: 1,
        chunk_size: 100,
        segment_duration: Duration::from_secs(1),
        output_dir: dir.to_path_buf(),
        format: OutputFormat::Wav,
        reconnect_delay: Duration::from_millis(10),
        ..RecorderConfig::default()
    }
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Waits for the first event matching `pred`, skipping others.
pub fn wait_event(
    rx: &Receiver<RecorderEvent>,
    timeout: Duration,
    pred: impl Fn(&RecorderEvent) -> bool,
) -> Option<RecorderEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let left = deadline.checked_duration_since(Instant::now())?;
        match rx.recv_timeout(left) {
            Ok(ev) if pred(&ev) => return Some(ev),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Finalized artifacts in segment order.
pub fn finalized(rx: &Receiver<RecorderEvent>) -> Vec<(u64, PathBuf)> {
    let mut out: Vec<(u64, PathBuf)> = rx
        .try_iter()
        .filter_map(|ev| match ev {
            RecorderEvent::SegmentFinalized { segment, artifact } => Some((segment.index, artifact)),
            _ => None,
        })
        .collect();
    out.sort();
    out
}

pub fn read_samples(path: &Path) -> Vec<i16> {
    hound::WavReader::open(path)
        .unwrap_or_else(|e| panic!("open {:?}: {}", path, e))
        .samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

pub fn files_with_ext(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut v: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    v.sort();
    v
}

pub const WAIT: Duration = Duration::from_secs(5);
