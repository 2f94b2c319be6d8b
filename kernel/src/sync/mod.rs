//! Kernel locking primitives.
//!
//! Two levels, per the concurrency model: interrupt-masking spinlocks for
//! short critical sections, and scheduler-aware sleep locks for long-held
//! ownership (buffers, inodes). `spin::Once` from the ecosystem covers the
//! third, degenerate case of set-once-then-read-only globals.

pub mod sleeplock;
pub mod spinlock;

pub use sleeplock::{SleepLock, SleepLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
