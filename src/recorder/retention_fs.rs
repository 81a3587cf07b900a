// src/recorder/retention_fs.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::error::{RecorderError, RecorderResult};
use crate::recorder::RetentionPolicy;
use crate::recorder::active::ActiveFiles;
use crate::recorder::segment::parse_segment_name;
use crate::recorder::state::{EventBus, RecorderEvent};
use crate::wait::StopWait;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub skipped_active: usize,
}

/// Deletes segment files older than the retention window from one directory.
///
/// Only names that parse as segment stems are considered; anything else in
/// the directory is left alone. Age is taken from the file's mtime.
pub struct FsRetention {
    base_dir: PathBuf,
    retention_days: Arc<AtomicU64>,
    active: ActiveFiles,
    remove: fn(&Path) -> io::Result<()>,
}

impl FsRetention {
    pub fn new(base_dir: PathBuf, retention_days: Arc<AtomicU64>, active: ActiveFiles) -> Self {
        Self {
            base_dir,
            retention_days,
            active,
            remove: |path: &Path| fs::remove_file(path),
        }
    }

    #[cfg(test)]
    fn with_remover(mut self, remove: fn(&Path) -> io::Result<()>) -> Self {
        self.remove = remove;
        self
    }

    pub fn sweep(&self, now: SystemTime) -> SweepReport {
        let days = self.retention_days.load(Ordering::Relaxed);
        let max_age = Duration::from_secs(days.saturating_mul(SECS_PER_DAY));
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.base_dir) {
            Ok(e) => e,
            Err(err) => {
                log::warn!("[retention] cannot list {:?}: {}", self.base_dir, err);
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if parse_segment_name(name).is_none() {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(err) => {
                    log::warn!("[retention] stat {:?} failed: {}", path, err);
                    report.failed.push((path, err.to_string()));
                    continue;
                }
            };
            let modified = match meta.modified() {
                Ok(t) => t,
                Err(err) => {
                    report.failed.push((path, err.to_string()));
                    continue;
                }
            };
            // Future mtimes count as age zero.
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match self.active.unless_pinned(&path, || (self.remove)(&path)) {
                None => {
                    log::debug!("[retention] skipping active {:?}", path);
                    report.skipped_active += 1;
                }
                Some(Ok(())) => {
                    log::info!("[retention] removed {:?}", path);
                    report.deleted.push(path);
                }
                Some(Err(err)) => {
                    log::warn!("[retention] failed {:?}: {}", path, err);
                    report.failed.push((path, err.to_string()));
                }
            }
        }

        report.deleted.sort();
        report
    }
}

impl RetentionPolicy for FsRetention {
    fn run(&mut self, now: SystemTime) -> SweepReport {
        self.sweep(now)
    }
}

/// Periodic sweeper thread. The first pass runs immediately.
pub struct Sweeper {
    stop: Arc<StopWait>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(
        mut policy: Box<dyn RetentionPolicy>,
        interval: Duration,
        events: EventBus,
    ) -> RecorderResult<Self> {
        let stop = Arc::new(StopWait::new());
        let wait = stop.clone();
        let handle = thread::Builder::new()
            .name("retention".into())
            .spawn(move || {
                loop {
                    let report = policy.run(SystemTime::now());
                    if !report.deleted.is_empty() || !report.failed.is_empty() {
                        events.publish(RecorderEvent::Swept {
                            deleted: report.deleted.len(),
                            failed: report.failed.len(),
                        });
                    }
                    if wait.wait_timeout(interval) {
                        break;
                    }
                }
            })
            .map_err(|e| RecorderError::capture(format!("spawn retention: {}", e)))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn shutdown(&mut self) {
        self.stop.stop();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
