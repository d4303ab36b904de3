//! Cooperative cancellation shared by every background loop.
//!
//! A [`CancelToken`] is checked at the top of each accept, read, pacing and
//! restart loop. Child tokens are cancelled together with their parent, so
//! stopping a server tears down all of its connections and the streaming
//! tasks they spawned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Longest single wait inside [`CancelToken::sleep`] before ancestors are
/// re-checked.
const POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct Flag {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<Flag>,
    ancestors: Vec<Arc<Flag>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is cancelled.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.flag.clone());
        Self {
            flag: Arc::new(Flag::default()),
            ancestors,
        }
    }

    pub fn cancel(&self) {
        self.flag.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.flag.lock.lock();
        self.flag.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.cancelled.load(Ordering::SeqCst)
            || self
                .ancestors
                .iter()
                .any(|a| a.cancelled.load(Ordering::SeqCst))
    }

    /// Sleep for `duration` or until cancelled.
    ///
    /// Returns `true` if the full duration elapsed, `false` if the token was
    /// cancelled first.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let slice = (deadline - now).min(POLL_SLICE);
            let mut guard = self.flag.lock.lock();
            if self.flag.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            self.flag.wake.wait_for(&mut guard, slice);
        }
    }
}
