//! Host-side stand-ins for the architecture layer.
//!
//! Unit tests run on the build host under the standard test harness; the
//! portable kernel code they exercise still calls into `arch`, so this
//! module supplies inert single-hart answers. Nothing here is ever
//! executed on bare metal.

#![allow(clippy::missing_safety_doc)]

use super::Context;

pub fn hart_id() -> usize {
    0
}

pub fn intr_on() {}
pub fn intr_off() {}

pub fn intr_get() -> bool {
    false
}

pub fn wait_for_interrupt() {}

pub const SCAUSE_INTERRUPT: u64 = 1 << 63;
pub const SCAUSE_TIMER: u64 = SCAUSE_INTERRUPT | 5;
pub const SCAUSE_EXTERNAL: u64 = SCAUSE_INTERRUPT | 9;
pub const SCAUSE_ECALL_USER: u64 = 8;

pub fn trap_cause() -> u64 {
    0
}

pub fn trap_value() -> u64 {
    0
}

pub fn trap_epc() -> u64 {
    0
}

pub fn set_trap_epc(_epc: u64) {}

pub fn trap_from_supervisor() -> bool {
    true
}

pub fn read_sstatus() -> u64 {
    0
}

pub fn write_sstatus(_bits: u64) {}

pub fn prepare_user_return() {}

pub fn install_kernel_vector() {}

pub fn install_user_vector() {}

pub unsafe fn install_page_table(_ppn: u64) {}

pub fn read_time() -> u64 {
    0
}

pub unsafe fn context_switch(_from: *mut Context, _to: *const Context) {
    unreachable!("context_switch on the host");
}

pub fn text_start() -> u64 {
    0
}

pub fn text_end() -> u64 {
    0
}

pub fn kernel_end() -> u64 {
    0
}

pub fn boot_entry_addr() -> u64 {
    0
}

pub mod sbi {
    pub fn set_timer(_stime_value: u64) {}

    pub fn shutdown() -> ! {
        unreachable!("sbi shutdown on the host");
    }
}

pub mod plic {
    pub fn init() {}
    pub fn init_hart() {}

    pub fn claim() -> Option<u32> {
        None
    }

    pub fn complete(_irq: u32) {}
}

pub mod trampoline {
    pub fn base() -> u64 {
        0
    }

    pub fn uservec_va() -> u64 {
        0
    }

    pub fn userret_va() -> u64 {
        0
    }
}
