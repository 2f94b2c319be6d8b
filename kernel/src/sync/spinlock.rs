//! Interrupt-masking spinlocks.
//!
//! A `SpinLock` protects its contents against both other harts and
//! interrupt handlers on the same hart: acquisition disables interrupts
//! (nestably, via `cpu::push_off`) before spinning, and they stay off for
//! the whole critical section. Each lock records its owning hart so that
//! re-acquisition and foreign release are caught as fatal protocol
//! violations rather than deadlocks.
//!
//! The guard is an ordinary value. One deliberate consequence: in the
//! scheduler handshake a guard is held across `context_switch`, so the
//! acquire happens on one kernel stack and the matching drop on another.
//! See `proc` for the protocol; `force_unlock` exists solely for the
//! fresh-process half of it.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{fence, AtomicBool, AtomicIsize, Ordering},
};

use crate::cpu;

pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    /// Owning hart id, or -1.
    hart: AtomicIsize,
    name: &'static str,
    data: UnsafeCell<T>,
}

// SAFETY: the lock provides the exclusion needed to hand out &mut T across
// harts; T must still be Send for the data to migrate between them.
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            hart: AtomicIsize::new(-1),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquire the lock, disabling interrupts on this hart for the
    /// duration of the guard.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.acquire();
        SpinLockGuard { lock: self }
    }

    fn acquire(&self) {
        cpu::push_off();
        if self.holding() {
            panic!("spinlock {}: repeatedly acquired", self.name);
        }
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        fence(Ordering::SeqCst);
        self.hart.store(cpu_id(), Ordering::Relaxed);
    }

    fn release(&self) {
        if !self.holding() {
            panic!("spinlock {}: released while not held", self.name);
        }
        self.hart.store(-1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        self.locked.store(false, Ordering::Release);
        cpu::pop_off();
    }

    /// Does the executing hart hold this lock?
    ///
    /// Only meaningful with interrupts off (callers inside a critical
    /// section, or the panic checks above, satisfy this).
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.hart.load(Ordering::Relaxed) == cpu_id()
    }

    /// Release a lock whose guard lives on another kernel stack.
    ///
    /// # Safety
    ///
    /// This is the fresh-process half of the scheduler handshake: the
    /// scheduler acquired the lock and switched onto a brand-new stack
    /// that owns no guard object, so the landing code must release by
    /// hand. The corresponding guard (parked on the scheduler's stack)
    /// will pair with a *later* acquisition. Callers must hold the lock
    /// and must not use it again until reacquired.
    pub unsafe fn force_unlock(&self) {
        self.release();
    }

    /// Pointer to the protected data, bypassing the lock.
    ///
    /// # Safety
    ///
    /// Caller must guarantee exclusion by other means (e.g. the slot is
    /// provably unshared, or the caller holds the lock via a guard it
    /// cannot name).
    pub unsafe fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

fn cpu_id() -> isize {
    crate::arch::hart_id() as isize
}

impl<'a, T: ?Sized> SpinLockGuard<'a, T> {
    /// The lock this guard came from; used by `sleep_on` to release and
    /// reacquire around a suspension.
    pub fn spinlock(&self) -> &'a SpinLock<T> {
        self.lock
    }

    /// Release the lock, returning a reference with which it can be
    /// reacquired later.
    pub fn unlock(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held by this hart.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive ownership of the data.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_gives_exclusive_access() {
        let lock = SpinLock::new("test", 7u32);
        {
            let mut g = lock.lock();
            *g += 1;
            assert!(lock.holding());
        }
        assert!(!lock.holding());
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn unlock_returns_reusable_handle() {
        let lock = SpinLock::new("test", ());
        let g = lock.lock();
        let lk = g.unlock();
        assert!(!lock.holding());
        let _g = lk.lock();
        assert!(lock.holding());
    }

    #[test]
    #[should_panic(expected = "repeatedly acquired")]
    fn reacquire_is_fatal() {
        let lock = SpinLock::new("test", ());
        let _g = lock.lock();
        let _g2 = lock.lock();
    }
}
