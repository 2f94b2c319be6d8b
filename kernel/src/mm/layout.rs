//! Physical and virtual memory map.
//!
//! The physical side follows QEMU's `hw/riscv/virt.c`:
//!
//! ```text
//! 00001000 -- boot ROM, provided by QEMU
//! 02000000 -- CLINT
//! 0c000000 -- PLIC
//! 10000000 -- uart0
//! 10001000 -- virtio disk
//! 80000000 -- OpenSBI; the kernel itself loads at 80200000
//! ```
//!
//! The per-process user virtual layout, top down: trampoline page, trap
//! frame page, an unmapped guard page, one user stack page, another guard
//! gap, then image + heap growing up from zero:
//!
//! ```text
//! --------------------------- MAX_VADDR
//!         trampoline
//! ---------------------------
//!         trap frame
//! ---------------------------
//!        (guard, unmapped)
//! --------------------------- USER_STACK_TOP
//!         user stack
//! --------------------------- USER_STACK_BASE
//!        (guard, unmapped)
//!            ...
//! --------------------------- p.size
//!         user heap
//!       text and data
//! --------------------------- 0
//! ```

/// Page size used throughout (4 KiB frames and 4 KiB page-table nodes).
pub const PAGE_SIZE: usize = 4096;

/// One past the highest usable physical address (128 MiB of RAM).
pub const MAX_PADDR: u64 = 0x8800_0000;

/// Kernel load address (OpenSBI owns [0x8000_0000, KERNEL_START)).
pub const KERNEL_START: u64 = 0x8020_0000;

/// 16550 UART MMIO base and its PLIC source number.
pub const UART0: u64 = 0x1000_0000;
pub const UART0_IRQ: u32 = 10;

/// Virtio MMIO base (first slot) and its PLIC source number.
pub const VIRTIO0: u64 = 0x1000_1000;
pub const VIRTIO0_IRQ: u32 = 1;

/// PLIC MMIO base and the size of the region the kernel maps.
pub const PLIC: u64 = 0x0c00_0000;
pub const PLIC_SIZE: usize = 0x400_0000;

/// One past the highest user-visible virtual address (Sv39 gives 39 bits;
/// the kernel stays out of the sign-extended upper half and uses 38).
pub const MAX_VADDR: u64 = 1 << 38;

/// The trampoline page sits at the very top of every address space.
pub const TRAMPOLINE: u64 = MAX_VADDR - PAGE_SIZE as u64;

/// The per-process trap-frame page sits directly below the trampoline.
pub const TRAP_FRAME: u64 = TRAMPOLINE - PAGE_SIZE as u64;

/// Top of the user stack; one unmapped guard page separates it from the
/// trap frame.
pub const USER_STACK_TOP: u64 = TRAP_FRAME - PAGE_SIZE as u64;

/// Base of the single-page user stack.
pub const USER_STACK_BASE: u64 = USER_STACK_TOP - PAGE_SIZE as u64;

/// Virtual address of process slot `i`'s kernel stack (one mapped page
/// with an unmapped guard page below, stacked downward from the
/// trampoline in the kernel page table).
pub const fn kernel_stack(i: usize) -> u64 {
    TRAMPOLINE - ((i as u64 + 1) * 2 * PAGE_SIZE as u64)
}

/// Round `addr` down to a page boundary.
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

/// Round `addr` up to a page boundary.
pub const fn page_round_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0x1000), 0x1000);
        assert_eq!(page_round_down(0x1fff), 0x1000);
        assert_eq!(page_round_up(0x1001), 0x2000);
        assert_eq!(page_round_up(0x1000), 0x1000);
        assert_eq!(page_round_up(0), 0);
    }

    #[test]
    fn user_layout_is_stacked_with_guards() {
        assert_eq!(TRAMPOLINE, MAX_VADDR - 0x1000);
        assert_eq!(TRAP_FRAME, MAX_VADDR - 0x2000);
        // Guard page between the trap frame and the stack top.
        assert_eq!(USER_STACK_TOP, MAX_VADDR - 0x3000);
        assert_eq!(USER_STACK_BASE, MAX_VADDR - 0x4000);
    }

    #[test]
    fn kernel_stacks_do_not_collide() {
        // Adjacent slots are two pages apart: one stack, one guard.
        assert_eq!(kernel_stack(0), TRAMPOLINE - 0x2000);
        assert_eq!(kernel_stack(1), kernel_stack(0) - 0x2000);
    }
}
