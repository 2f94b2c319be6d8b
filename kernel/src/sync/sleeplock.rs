//! Scheduler-aware sleep locks.
//!
//! A `SleepLock` suspends the acquiring process instead of spinning, so it
//! may be held across operations that themselves sleep (disk I/O, log
//! waits). The lock state lives behind a small spinlock; the wait channel
//! is the lock's own address. Sleep locks are owned by processes (by pid),
//! never by harts, and must not be touched from interrupt handlers.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use crate::{cpu, proc};

use super::spinlock::SpinLock;

struct SleepInner {
    locked: bool,
    /// pid of the owning process, or -1.
    pid: i32,
}

pub struct SleepLock<T: ?Sized> {
    inner: SpinLock<SleepInner>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: exclusion is enforced by the sleep-lock protocol; data moves
// between processes only through acquire/release.
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SleepLock<T> {}

pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            inner: SpinLock::new("sleep_lock", SleepInner {
                locked: false,
                pid: -1,
            }),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// Acquire, sleeping while another process holds the lock.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        if self.holding() {
            panic!("sleeplock {}: repeatedly acquired", self.name);
        }
        let chan = self.chan();
        let mut inner = self.inner.lock();
        while inner.locked {
            inner = proc::sleep_on(chan, inner);
        }
        inner.locked = true;
        inner.pid = cpu::current_proc().pid();
        drop(inner);
        SleepLockGuard { lock: self }
    }

    fn release(&self) {
        if !self.holding() {
            panic!("sleeplock {}: released while not held", self.name);
        }
        let mut inner = self.inner.lock();
        inner.locked = false;
        inner.pid = -1;
        proc::wake_up(self.chan());
        drop(inner);
    }

    /// Does the calling process hold this lock?
    pub fn holding(&self) -> bool {
        let inner = self.inner.lock();
        inner.locked && cpu::running_proc().map(|p| p.pid()) == Some(inner.pid)
    }

    /// The wait channel for this lock: its own (static) address.
    fn chan(&self) -> usize {
        self as *const Self as *const () as usize
    }

    /// Pointer to the protected data, bypassing the lock.
    ///
    /// # Safety
    ///
    /// Caller must guarantee no live guard exists (e.g. the enclosing
    /// object's reference count proves the slot unshared).
    pub unsafe fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

impl<T: ?Sized> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves this process holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive ownership of the data.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
