//! Cross-activity signals
//!
//! - [`ShutdownToken`]: set once when the program should end; every
//!   long-running loop is constructed with a clone and polls it.
//! - [`ReadyFlag`]: per-button "idle" signal. Set while the button is
//!   available, cleared while its action is in flight. Waiters block on a
//!   condition variable instead of spinning.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How often blocked waits re-check the shutdown token
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Program-wide cancellation
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    triggered: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices; returns false if shutdown
    /// was triggered before the time elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}

/// Settable flag with blocking wait, shared between activities
#[derive(Clone, Debug)]
pub struct ReadyFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ReadyFlag {
    /// New flag in the set (ready) state
    pub fn new_set() -> Self {
        Self {
            inner: Arc::new((Mutex::new(true), Condvar::new())),
        }
    }

    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn clear(&self) {
        *self.inner.0.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until the flag is set. Returns false if shutdown was
    /// triggered first.
    pub fn wait(&self, shutdown: &ShutdownToken) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut ready = lock.lock();
        while !*ready {
            if shutdown.is_triggered() {
                return false;
            }
            cvar.wait_for(&mut ready, WAIT_SLICE);
        }
        true
    }
}
