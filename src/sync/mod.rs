//! Lock primitives. Spin locks guard short metadata sections and must
//! never be held across blocking; sleep locks park the waiting thread
//! and may be held across device I/O.

pub mod sleeplock;

pub use sleeplock::{SleepLock, SleepLockGuard};

/// Short-critical-section lock for metadata.
pub type SpinLock<T> = spin::Mutex<T>;
