//! Write serialization and bounded busy retry.
//!
//! Writes to the same `(session, scope)` are serialized in-process through a
//! per-scope mutex; writes to different scopes only meet at SQLite's own
//! write lock, which is short because every transaction is small. When
//! SQLite still reports BUSY/LOCKED the operation is retried with
//! exponential backoff until the retry budget or the deadline runs out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::store::{StoreError, StoreResult};

type ScopeKey = (String, String);

/// Registry of per-scope write locks.
#[derive(Default)]
pub(crate) struct ScopeLocks {
    locks: Mutex<HashMap<ScopeKey, Weak<Mutex<()>>>>,
}

impl ScopeLocks {
    /// Lock handle for `(session_id, scope_id)`. Callers hold the returned
    /// mutex's guard for the duration of the write.
    pub(crate) fn acquire(&self, session_id: &str, scope_id: &str) -> StoreResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::LockPoisoned)?;

        if locks.len() > 256 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        let key = (session_id.to_string(), scope_id.to_string());
        if let Some(existing) = locks.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(key, Arc::downgrade(&lock));
        Ok(lock)
    }

    /// Drop every lock entry belonging to a session.
    pub(crate) fn forget_session(&self, session_id: &str) -> StoreResult<()> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::LockPoisoned)?;
        locks.retain(|(session, _), _| session != session_id);
        Ok(())
    }
}

/// Bounded exponential backoff for BUSY/LOCKED results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op`, retrying transient BUSY/LOCKED failures.
    ///
    /// Exhausting the retry budget yields [`StoreError::Contention`]; reaching
    /// `deadline` yields [`StoreError::Timeout`]. Both are retryable by the
    /// caller. Any other error is returned immediately.
    pub fn run<T>(
        &self,
        operation: &'static str,
        deadline: Instant,
        mut op: impl FnMut() -> StoreResult<T>,
    ) -> StoreResult<T> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            match op() {
                Err(StoreError::Busy(detail)) => {
                    attempt += 1;
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(operation, attempt, %detail, "Store operation timed out under contention");
                        return Err(StoreError::Timeout {
                            operation,
                            waited_ms: elapsed_ms(started),
                        });
                    }
                    if attempt > self.max_retries {
                        warn!(operation, attempt, %detail, "Store contention retries exhausted");
                        return Err(StoreError::Contention {
                            operation,
                            attempts: attempt,
                        });
                    }
                    let pause = self.backoff(attempt).min(deadline - now);
                    debug!(operation, attempt, pause_ms = pause.as_millis() as u64, "Retrying busy store operation");
                    std::thread::sleep(pause);
                }
                other => return other,
            }
        }
    }

    /// Lock `lock`, polling until `deadline`.
    ///
    /// Poll intervals start below a millisecond and grow up to the base
    /// backoff. Reaching the deadline yields a retryable
    /// [`StoreError::Timeout`].
    pub(crate) fn lock_until<'a>(&self, lock: &'a Mutex<()>, deadline: Instant) -> StoreResult<MutexGuard<'a, ()>> {
        let started = Instant::now();
        let ceiling = self.base_backoff.max(Duration::from_millis(1));
        let mut attempt = 0u32;
        loop {
            match lock.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::LockPoisoned),
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(attempt, "Scope lock wait reached deadline");
                        return Err(StoreError::Timeout {
                            operation: "scope_lock",
                            waited_ms: elapsed_ms(started),
                        });
                    }
                    attempt += 1;
                    let factor = 1u32 << attempt.min(10);
                    let pause = Duration::from_micros(100)
                        .saturating_mul(factor)
                        .min(ceiling)
                        .min(deadline - now);
                    std::thread::sleep(pause);
                }
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
