//! Architecture layer.
//!
//! On bare metal this is the RISC-V supervisor-mode port for the QEMU
//! `virt` machine. On the host (unit tests) a stub implementation stands
//! in so that the portable parts of the kernel compile and run under the
//! standard test harness.

#[cfg(target_arch = "riscv64")]
pub mod riscv;
#[cfg(target_arch = "riscv64")]
pub use riscv::*;

#[cfg(not(target_arch = "riscv64"))]
mod hosted;
#[cfg(not(target_arch = "riscv64"))]
pub use hosted::*;

/// Callee-saved register context for in-kernel context switches.
///
/// `context_switch` saves `ra`/`sp` and the callee-saved registers of the
/// outgoing task here and restores the incoming task's copy; everything
/// else is dead across a call by the C ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub ra: u64,
    pub sp: u64,

    // callee-saved
    pub s0: u64,
    pub s1: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}
