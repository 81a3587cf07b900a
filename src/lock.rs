// src/lock.rs
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{RecorderError, RecorderResult};

pub const LOCK_FILE: &str = ".recorder.lock";

/// Marks an output directory as owned by this process.
///
/// The lock file holds the owner's PID. A lock whose owner no longer runs
/// is taken over. Released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(dir: &Path) -> RecorderResult<Self> {
        let path = dir.join(LOCK_FILE);
        let pid = std::process::id();

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    writeln!(f, "{}", pid).map_err(|e| RecorderError::storage(&path, e))?;
                    log::debug!("[lock] acquired {:?}", path);
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_pid(&path) {
                        Some(owner) if owner == pid || pid_alive(owner) => {
                            return Err(RecorderError::Locked {
                                dir: dir.to_path_buf(),
                                pid: owner,
                            });
                        }
                        owner => {
                            log::warn!("[lock] removing stale lock {:?} (pid {:?})", path, owner);
                            match fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => return Err(RecorderError::storage(&path, e)),
                            }
                        }
                    }
                }
                Err(e) => return Err(RecorderError::storage(&path, e)),
            }
        }
        Err(RecorderError::storage_other(&path, "lock contended"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if read_pid(&self.path) == Some(std::process::id()) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without /proc there is no cheap liveness check; assume the owner runs.
#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_in_same_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        let err = InstanceLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, RecorderError::Locked { pid, .. } if pid == std::process::id()));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
        InstanceLock::acquire(dir.path()).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        // PIDs above pid_max never exist.
        fs::write(dir.path().join(LOCK_FILE), "4294967\n").unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn garbage_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "not a pid").unwrap();
        assert!(InstanceLock::acquire(dir.path()).is_ok());
    }
}
