//! Thread signalling primitives used across the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
///
/// Used for the paused handshake between the process thread and a state
/// apply: the process thread posts on entering the paused state, the apply
/// path waits. Posting takes an uncontended lock briefly; the audio thread
/// only posts, never waits.
#[derive(Default)]
pub struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    /// Take one count if available, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Wait for a count, giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        while *count == 0 {
            if self.cond.wait_for(&mut count, timeout).timed_out() {
                return false;
            }
        }
        *count -= 1;
        true
    }
}

/// The one process-wide cancellation source.
///
/// Raised by the backend's shutdown callback, by signal handlers (through
/// the inner atomic, which is async-signal-safe to set), and by the frontend
/// on quit. The UI loop polls it once per tick.
#[derive(Clone, Default)]
pub struct ExitFlag(Arc<AtomicBool>);

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The inner flag, for registration with signal handlers.
    pub fn inner(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_counts() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_wait());

        sem.post();
        sem.post();
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn semaphore_crosses_threads() {
        let sem = Arc::new(Semaphore::new(0));
        let posted = {
            let sem = sem.clone();
            std::thread::spawn(move || sem.post())
        };
        sem.wait();
        posted.join().unwrap();
        assert!(!sem.try_wait());
    }

    #[test]
    fn wait_timeout_expires() {
        let sem = Semaphore::new(0);
        assert!(!sem.wait_timeout(Duration::from_millis(10)));
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(10)));
    }
}
