//! System timer.
//!
//! The `time` CSR ticks at 10 MHz on QEMU; each hart re-arms its own
//! compare via SBI on every timer interrupt, and hart 0 additionally
//! advances the global tick count that `sleep(2)` waits on.

use crate::{
    arch::{self, sbi},
    cpu,
    error::{KernelError, KernelResult},
    proc::{self, chan},
    sync::SpinLock,
};

/// Timer interrupt interval in `time` CSR units.
const INTERVAL: u64 = 1_000_000;

static TICKS: SpinLock<u64> = SpinLock::new("timer", 0);

fn ticks_chan() -> usize {
    chan(&TICKS)
}

/// Arm the first timer interrupt for this hart.
pub fn init_hart() {
    set_next();
}

/// Program the next timer interrupt.
pub fn set_next() {
    sbi::set_timer(arch::read_time() + INTERVAL);
}

/// Timer interrupt body. Hart 0 owns the tick count.
pub fn handle_intr() {
    if arch::hart_id() == 0 {
        let mut ticks = TICKS.lock();
        *ticks += 1;
        proc::wake_up(ticks_chan());
        drop(ticks);
    }
    set_next();
}

/// Current tick count.
pub fn ticks() -> u64 {
    *TICKS.lock()
}

/// Sleep for `n` ticks. Interruptible: returns `Err(Killed)` if the
/// process is killed while waiting.
pub fn sleep(n: u64) -> KernelResult<()> {
    let mut ticks = TICKS.lock();
    let start = *ticks;
    while (*ticks).wrapping_sub(start) < n {
        if cpu::current_proc().is_killed() {
            return Err(KernelError::Killed);
        }
        ticks = proc::sleep_on(ticks_chan(), ticks);
    }
    Ok(())
}
