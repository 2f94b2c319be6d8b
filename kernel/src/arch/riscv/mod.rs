//! RISC-V supervisor-mode primitives for the QEMU `virt` machine.
//!
//! Everything the portable kernel needs from the hardware funnels through
//! this module: CSR access, interrupt masking, satp installation, the hart
//! identity carried in `tp`, and the handful of assembly shims (boot entry,
//! trap vectors, context switch, trampoline).

pub mod context;
pub mod entry;
pub mod kernelvec;
pub mod plic;
pub mod sbi;
pub mod trampoline;

use core::arch::asm;

use riscv::register::{
    satp, scause, sepc, sie, sstatus, stval,
    stvec::{self, TrapMode},
    time,
};

/// SSTATUS.SPP: previous privilege mode (1 = supervisor).
const SSTATUS_SPP: u64 = 1 << 8;
/// SSTATUS.SPIE: interrupt-enable to restore at `sret`.
const SSTATUS_SPIE: u64 = 1 << 5;

// ---------------------------------------------------------------------------
// Hart identity
// ---------------------------------------------------------------------------

/// Id of the executing hart.
///
/// The boot path stores the hart id in `tp` before any of this code runs
/// and the kernel never repurposes the register, so a plain read suffices.
/// Only meaningful while interrupts are off or the caller is pinned.
#[inline]
pub fn hart_id() -> usize {
    let id: usize;
    // SAFETY: reading `tp` has no side effects.
    unsafe { asm!("mv {}, tp", out(reg) id) };
    id
}

/// Store the hart id into `tp`. Called once per hart from `start`.
#[inline]
pub fn set_hart_id(id: usize) {
    // SAFETY: `tp` is reserved for the hart id for the kernel's lifetime;
    // writing it during single-threaded early boot cannot race.
    unsafe { asm!("mv tp, {}", in(reg) id) };
}

// ---------------------------------------------------------------------------
// Interrupt masking
// ---------------------------------------------------------------------------

/// Enable S-mode device interrupts on this hart.
#[inline]
pub fn intr_on() {
    // SAFETY: setting SSTATUS.SIE only opens this hart to interrupts; the
    // trap vector has been installed before any caller runs.
    unsafe { sstatus::set_sie() };
}

/// Disable S-mode device interrupts on this hart.
#[inline]
pub fn intr_off() {
    // SAFETY: clearing SSTATUS.SIE is always safe.
    unsafe { sstatus::clear_sie() };
}

/// Are S-mode device interrupts enabled on this hart?
#[inline]
pub fn intr_get() -> bool {
    sstatus::read().sie()
}

/// Park the hart until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: `wfi` only pauses the hart; it resumes on any interrupt.
    unsafe { asm!("wfi") };
}

/// Unmask the external, software and timer interrupt classes in `sie`.
/// Called once per hart during boot.
pub fn enable_interrupt_classes() {
    // SAFETY: the trap vector is installed before interrupts are enabled
    // through `intr_on`; until then these bits are latent.
    unsafe {
        sie::set_sext();
        sie::set_ssoft();
        sie::set_stimer();
    }
}

// ---------------------------------------------------------------------------
// Trap CSRs
// ---------------------------------------------------------------------------

/// High bit of `scause` distinguishing interrupts from exceptions.
pub const SCAUSE_INTERRUPT: u64 = 1 << 63;
/// `scause` value for an S-mode timer interrupt.
pub const SCAUSE_TIMER: u64 = SCAUSE_INTERRUPT | 5;
/// `scause` value for an S-mode external (PLIC) interrupt.
pub const SCAUSE_EXTERNAL: u64 = SCAUSE_INTERRUPT | 9;
/// `scause` value for an environment call from U-mode.
pub const SCAUSE_ECALL_USER: u64 = 8;

#[inline]
pub fn trap_cause() -> u64 {
    scause::read().bits() as u64
}

#[inline]
pub fn trap_value() -> u64 {
    stval::read() as u64
}

#[inline]
pub fn trap_epc() -> u64 {
    sepc::read() as u64
}

#[inline]
pub fn set_trap_epc(epc: u64) {
    // SAFETY: `sepc` only takes effect at `sret`; storing a value the
    // caller derived from a trap frame cannot fault here.
    unsafe { asm!("csrw sepc, {}", in(reg) epc) };
}

/// Did the trap arrive from supervisor mode?
#[inline]
pub fn trap_from_supervisor() -> bool {
    sstatus::read().bits() as u64 & SSTATUS_SPP != 0
}

/// Raw `sstatus` snapshot, for save/restore around nested kernel traps.
#[inline]
pub fn read_sstatus() -> u64 {
    sstatus::read().bits() as u64
}

/// Restore a raw `sstatus` snapshot.
#[inline]
pub fn write_sstatus(bits: u64) {
    // SAFETY: `bits` was previously read from `sstatus` on this hart; the
    // kernel trap path restores it verbatim after a possible yield.
    unsafe { asm!("csrw sstatus, {}", in(reg) bits) };
}

/// Arrange `sstatus` for a return to user mode: previous privilege U,
/// interrupts re-enabled after `sret`.
#[inline]
pub fn prepare_user_return() {
    let mut bits = sstatus::read().bits() as u64;
    bits &= !SSTATUS_SPP;
    bits |= SSTATUS_SPIE;
    // SAFETY: mutating SPP/SPIE only affects the next `sret`, which the
    // caller performs via the trampoline with a valid user context.
    unsafe { asm!("csrw sstatus, {}", in(reg) bits) };
}

/// Point `stvec` at the in-kernel trap vector.
#[inline]
pub fn install_kernel_vector() {
    // SAFETY: `kernel_trap_vector` is a valid, 4-byte-aligned S-mode trap
    // entry defined in kernelvec.rs assembly.
    unsafe { stvec::write(kernelvec::kernel_trap_vector_addr(), TrapMode::Direct) };
}

/// Point `stvec` at the user trap vector in the trampoline page.
///
/// The trampoline is mapped at the same virtual address in every address
/// space, so the vector survives the satp switch performed inside it.
#[inline]
pub fn install_user_vector() {
    // SAFETY: the trampoline page is mapped R|X at TRAMPOLINE in both the
    // kernel and every user page table.
    unsafe { stvec::write(trampoline::uservec_va() as usize, TrapMode::Direct) };
}

// ---------------------------------------------------------------------------
// Address translation
// ---------------------------------------------------------------------------

/// Install a page-table root, with the fences required around a satp swap.
///
/// # Safety
///
/// `ppn` must be the physical page number of a valid Sv39 root table that
/// maps the executing kernel text and the current stack.
pub unsafe fn install_page_table(ppn: u64) {
    // SAFETY: per the caller's contract the root table keeps the kernel
    // mapped, so execution continues seamlessly after the swap; the
    // fences retire stale translations on both sides.
    unsafe {
        asm!("sfence.vma zero, zero");
        satp::set(satp::Mode::Sv39, 0, ppn as usize);
        asm!("sfence.vma zero, zero");
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current value of the `time` CSR (QEMU: 10 MHz).
#[inline]
pub fn read_time() -> u64 {
    time::read() as u64
}

// ---------------------------------------------------------------------------
// Context switch (assembly; see context.rs)
// ---------------------------------------------------------------------------

pub use context::context_switch;

// ---------------------------------------------------------------------------
// Linker-provided layout symbols
// ---------------------------------------------------------------------------

extern "C" {
    static _text_start: u8;
    static _text_end: u8;
    static _kernel_end: u8;
    static _entry: u8;
}

/// First byte of kernel text (also the load address).
pub fn text_start() -> u64 {
    core::ptr::addr_of!(_text_start) as u64
}

/// One past the last byte of kernel text (page aligned by the linker).
pub fn text_end() -> u64 {
    core::ptr::addr_of!(_text_end) as u64
}

/// One past the last byte of the loaded image (page aligned).
pub fn kernel_end() -> u64 {
    core::ptr::addr_of!(_kernel_end) as u64
}

/// Physical address of the boot entry, for starting secondary harts.
pub fn boot_entry_addr() -> u64 {
    core::ptr::addr_of!(_entry) as u64
}
