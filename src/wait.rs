use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Interruptible sleep for periodic worker threads.
///
/// Once `stop()` has been called every current and future wait returns
/// immediately.
pub struct StopWait {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopWait {
    pub fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Sleeps for `duration` or until stopped. Returns `true` when stopped.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }
}

impl Default for StopWait {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn times_out_when_not_stopped() {
        let wait = StopWait::new();
        assert!(!wait.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn stop_wakes_waiter() {
        let wait = Arc::new(StopWait::new());
        let w = wait.clone();
        let handle = std::thread::spawn(move || w.wait_timeout(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        wait.stop();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn stop_before_wait_is_not_lost() {
        let wait = StopWait::new();
        wait.stop();
        let started = Instant::now();
        assert!(wait.wait_timeout(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
