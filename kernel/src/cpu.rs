//! Per-hart CPU descriptors.
//!
//! Each hart owns one `Cpu` slot: the process it is currently running, the
//! scheduler's saved context (the "resume point" a descheduled process
//! switches back into), and the interrupt-mask nesting used by
//! `push_off`/`pop_off`.
//!
//! A hart only ever touches its own slot, and only while interrupts are
//! off (or before interrupts exist, during boot). That is the entire
//! synchronization story for this module.

use core::cell::{Cell, UnsafeCell};

use crate::{
    arch::{self, Context},
    proc::Proc,
};
#[cfg(target_arch = "riscv64")]
use crate::param::N_CPU;

pub struct Cpu {
    /// The process running on this hart, if any.
    proc: Cell<Option<&'static Proc>>,
    /// Scheduler context; `sched` switches here to re-enter the scheduler.
    context: UnsafeCell<Context>,
    /// Depth of `push_off` nesting.
    n_off: Cell<i32>,
    /// Were interrupts enabled before the outermost `push_off`?
    intr_ena: Cell<bool>,
}

// SAFETY: a Cpu slot is only accessed by the hart it belongs to, with
// interrupts disabled for every non-trivial access, so no two threads of
// control ever race on the interior cells.
unsafe impl Sync for Cpu {}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: Cell::new(None),
            context: UnsafeCell::new(Context::zeroed()),
            n_off: Cell::new(0),
            intr_ena: Cell::new(false),
        }
    }

    /// The scheduler context, for `context_switch`.
    pub fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    pub fn set_proc(&self, p: Option<&'static Proc>) {
        self.proc.set(p);
    }

    pub fn proc(&self) -> Option<&'static Proc> {
        self.proc.get()
    }

    pub fn n_off(&self) -> i32 {
        self.n_off.get()
    }

    pub fn intr_ena(&self) -> bool {
        self.intr_ena.get()
    }

    pub fn set_intr_ena(&self, ena: bool) {
        self.intr_ena.set(ena);
    }
}

#[cfg(target_arch = "riscv64")]
static CPUS: [Cpu; N_CPU] = {
    const SLOT: Cpu = Cpu::new();
    [SLOT; N_CPU]
};

/// This hart's CPU slot.
///
/// # Safety
///
/// The caller must have interrupts disabled (or be running before the
/// first `intr_on`), so that the returned reference cannot be used across
/// a migration to another hart.
#[cfg(target_arch = "riscv64")]
pub unsafe fn current() -> &'static Cpu {
    &CPUS[arch::hart_id()]
}

/// Host-test stand-in: every test thread acts as its own hart, so the
/// push_off book-keeping of concurrently running tests cannot interfere.
///
/// # Safety
///
/// Same contract as the bare-metal version; trivially satisfied on the
/// host, where the "hart" is the calling thread.
#[cfg(not(target_arch = "riscv64"))]
pub unsafe fn current() -> &'static Cpu {
    use std::boxed::Box;
    std::thread_local! {
        static CPU: &'static Cpu = Box::leak(Box::new(Cpu::new()));
    }
    CPU.with(|c| *c)
}

/// The process currently running on this hart, if any.
pub fn running_proc() -> Option<&'static Proc> {
    push_off();
    // SAFETY: interrupts are off for the duration of the access.
    let p = unsafe { current() }.proc();
    pop_off();
    p
}

/// The current process, which must exist. Kernel paths reached only via a
/// process context (syscalls, sleeps) use this; reaching it from the
/// scheduler or early boot is a bug.
pub fn current_proc() -> &'static Proc {
    match running_proc() {
        Some(p) => p,
        None => panic!("no process on this cpu"),
    }
}

/// Disable interrupts on this hart, nestably.
///
/// The pre-push interrupt-enable state is recorded at the outermost level
/// only, and restored only by the matching outermost `pop_off`.
pub fn push_off() {
    let old = arch::intr_get();
    arch::intr_off();
    // SAFETY: interrupts are now off.
    let c = unsafe { current() };
    if c.n_off.get() == 0 {
        c.intr_ena.set(old);
    }
    c.n_off.set(c.n_off.get() + 1);
}

/// Undo one `push_off`; re-enables interrupts only when the nesting is
/// fully unwound and they were enabled to begin with.
pub fn pop_off() {
    if arch::intr_get() {
        panic!("pop_off with interrupts enabled");
    }
    // SAFETY: interrupts are off (just checked).
    let c = unsafe { current() };
    let n = c.n_off.get();
    if n < 1 {
        panic!("pop_off without matching push_off");
    }
    c.n_off.set(n - 1);
    if n - 1 == 0 && c.intr_ena.get() {
        arch::intr_on();
    }
}
