//! In-kernel context switch.
//!
//! `context_switch(from, to)` saves `ra`, `sp` and the callee-saved
//! registers into `from` and restores them from `to`. It returns on the
//! incoming task's stack, at the point where that task last called
//! `context_switch` (or, for a fresh process, at the forged `ra` installed
//! by process allocation).

use core::arch::global_asm;

use crate::arch::Context;

global_asm!(
    r#"
    .section .text
    .globl __context_switch
    .align 4
__context_switch:
    sd ra,   0(a0)
    sd sp,   8(a0)
    sd s0,  16(a0)
    sd s1,  24(a0)
    sd s2,  32(a0)
    sd s3,  40(a0)
    sd s4,  48(a0)
    sd s5,  56(a0)
    sd s6,  64(a0)
    sd s7,  72(a0)
    sd s8,  80(a0)
    sd s9,  88(a0)
    sd s10, 96(a0)
    sd s11, 104(a0)

    ld ra,   0(a1)
    ld sp,   8(a1)
    ld s0,  16(a1)
    ld s1,  24(a1)
    ld s2,  32(a1)
    ld s3,  40(a1)
    ld s4,  48(a1)
    ld s5,  56(a1)
    ld s6,  64(a1)
    ld s7,  72(a1)
    ld s8,  80(a1)
    ld s9,  88(a1)
    ld s10, 96(a1)
    ld s11, 104(a1)

    ret
"#
);

extern "C" {
    fn __context_switch(from: *mut Context, to: *const Context);
}

/// Switch kernel stacks: park the current execution in `from`, resume the
/// one recorded in `to`.
///
/// # Safety
///
/// `to` must contain a context previously saved by `context_switch` or
/// synthesized by process allocation (valid `ra` and kernel `sp`). The
/// caller must hold exactly the locks the resumed side expects: in this
/// kernel, the lock of the process being switched (see the scheduler
/// handshake in `proc`).
pub unsafe fn context_switch(from: *mut Context, to: *const Context) {
    // SAFETY: forwarded to the assembly routine under the caller's contract.
    unsafe { __context_switch(from, to) }
}
