//! Long-term locks for buffer contents. A contended acquire parks the
//! calling thread instead of spinning, so a holder may keep the lock
//! across device I/O without burning a core.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct SleepLock<T> {
    inner: Mutex<T>,
}

pub type SleepLockGuard<'l, T> = MutexGuard<'l, T>;

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> SleepLock<T> {
        SleepLock {
            inner: Mutex::new(value),
        }
    }

    /// Block until the lock is free, then take it. Poison only means a
    /// previous holder panicked; that panic is already the fatal error.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
