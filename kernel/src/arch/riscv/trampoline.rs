//! The trampoline page.
//!
//! User/kernel transitions must survive a satp switch, so this code lives
//! in its own page, mapped R|X at the top of *every* address space (kernel
//! and user alike). `user_trap_vector` spills user registers into the
//! trap-frame page (mapped just below the trampoline in user space),
//! installs the kernel page table and jumps to the Rust handler;
//! `return_to_user_space` is the exact inverse.
//!
//! Store offsets are the byte offsets of `trap::TrapFrame` fields; the
//! trap module carries compile-time assertions tying the two together.

use core::arch::global_asm;

use crate::mm::layout::TRAMPOLINE;

global_asm!(
    r#"
    # Virtual address of the trap-frame page (mm::layout::TRAP_FRAME).
    .equ TRAPFRAME, 0x3FFFFFE000

    .section .trampsec
    .globl trampoline
trampoline:
    .align 4
    .globl user_trap_vector
user_trap_vector:
    # Trap from U-mode, user page table still active. Park a0 so we can
    # use it as the trap-frame base; TRAPFRAME is mapped in user space.
    csrw sscratch, a0
    li a0, TRAPFRAME

    sd ra,   40(a0)
    sd sp,   48(a0)
    sd gp,   56(a0)
    sd tp,   64(a0)
    sd t0,   72(a0)
    sd t1,   80(a0)
    sd t2,   88(a0)
    sd s0,   96(a0)
    sd s1,  104(a0)
    sd a1,  120(a0)
    sd a2,  128(a0)
    sd a3,  136(a0)
    sd a4,  144(a0)
    sd a5,  152(a0)
    sd a6,  160(a0)
    sd a7,  168(a0)
    sd s2,  176(a0)
    sd s3,  184(a0)
    sd s4,  192(a0)
    sd s5,  200(a0)
    sd s6,  208(a0)
    sd s7,  216(a0)
    sd s8,  224(a0)
    sd s9,  232(a0)
    sd s10, 240(a0)
    sd s11, 248(a0)
    sd t3,  256(a0)
    sd t4,  264(a0)
    sd t5,  272(a0)
    sd t6,  280(a0)

    # The parked user a0.
    csrr t0, sscratch
    sd t0, 112(a0)

    # Kernel stack, hart id, handler address, kernel satp -- all staged
    # into the trap frame by the previous user_trap_return.
    ld sp, 8(a0)
    ld tp, 24(a0)
    ld t0, 16(a0)
    ld t1, 0(a0)

    sfence.vma zero, zero
    csrw satp, t1
    sfence.vma zero, zero

    jr t0

    .globl return_to_user_space
return_to_user_space:
    # return_to_user_space(user_satp in a0), called on the kernel side.
    sfence.vma zero, zero
    csrw satp, a0
    sfence.vma zero, zero

    li a0, TRAPFRAME

    ld ra,   40(a0)
    ld sp,   48(a0)
    ld gp,   56(a0)
    ld tp,   64(a0)
    ld t0,   72(a0)
    ld t1,   80(a0)
    ld t2,   88(a0)
    ld s0,   96(a0)
    ld s1,  104(a0)
    ld a1,  120(a0)
    ld a2,  128(a0)
    ld a3,  136(a0)
    ld a4,  144(a0)
    ld a5,  152(a0)
    ld a6,  160(a0)
    ld a7,  168(a0)
    ld s2,  176(a0)
    ld s3,  184(a0)
    ld s4,  192(a0)
    ld s5,  200(a0)
    ld s6,  208(a0)
    ld s7,  216(a0)
    ld s8,  224(a0)
    ld s9,  232(a0)
    ld s10, 240(a0)
    ld s11, 248(a0)
    ld t3,  256(a0)
    ld t4,  264(a0)
    ld t5,  272(a0)
    ld t6,  280(a0)

    ld a0, 112(a0)

    sret
"#
);

extern "C" {
    static trampoline: u8;
    static user_trap_vector: u8;
    static return_to_user_space: u8;
}

/// Physical address of the trampoline page (identical to its link address,
/// since the kernel runs identity-mapped).
pub fn base() -> u64 {
    core::ptr::addr_of!(trampoline) as u64
}

/// Virtual address of `user_trap_vector` as seen through the TRAMPOLINE
/// mapping.
pub fn uservec_va() -> u64 {
    TRAMPOLINE + (core::ptr::addr_of!(user_trap_vector) as u64 - base())
}

/// Virtual address of `return_to_user_space` through the TRAMPOLINE
/// mapping.
pub fn userret_va() -> u64 {
    TRAMPOLINE + (core::ptr::addr_of!(return_to_user_space) as u64 - base())
}
