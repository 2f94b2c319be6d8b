//! The kernel page table.
//!
//! Built once on the boot hart, then installed into satp on every hart.
//! The kernel runs identity-mapped: device MMIO windows and all of RAM
//! above the image map virtual == physical, with only the trampoline page
//! and the per-process kernel stacks living at high "virtual only"
//! addresses below it.

use spin::Once;

use crate::{
    arch,
    mm::{
        frame,
        layout::{
            kernel_stack, MAX_PADDR, PAGE_SIZE, PLIC, PLIC_SIZE, TRAMPOLINE, UART0, VIRTIO0,
        },
        page_table::{PageTable, PteFlags},
    },
    param::N_PROC,
};

static KERNEL_TABLE: Once<PageTable> = Once::new();

fn kvm_map(pt: &mut PageTable, va: u64, pa: u64, size: usize, perm: PteFlags) {
    if pt.map_pages(va, pa, size, perm).is_err() {
        panic!("kvm: mapping failed during boot");
    }
}

fn make() -> PageTable {
    let mut pt = match PageTable::new() {
        Ok(pt) => pt,
        Err(_) => panic!("kvm: no frame for root table"),
    };

    let rw = PteFlags::R | PteFlags::W;
    let rx = PteFlags::R | PteFlags::X;

    // Device windows.
    kvm_map(&mut pt, UART0, UART0, PAGE_SIZE, rw);
    kvm_map(&mut pt, PLIC, PLIC, PLIC_SIZE, rw);
    kvm_map(&mut pt, VIRTIO0, VIRTIO0, PAGE_SIZE, rw);

    // Kernel text, then the rest of RAM.
    let text_start = arch::text_start();
    let text_end = arch::text_end();
    kvm_map(&mut pt, text_start, text_start, (text_end - text_start) as usize, rx);
    kvm_map(&mut pt, text_end, text_end, (MAX_PADDR - text_end) as usize, rw);

    // The trampoline also appears at the top of the kernel address space,
    // so the user-return path can execute it after switching satp.
    kvm_map(&mut pt, TRAMPOLINE, arch::trampoline::base(), PAGE_SIZE, rx);

    // One kernel stack per process slot, each with an unmapped guard page
    // below it.
    for i in 0..N_PROC {
        let Some(stack) = frame::alloc() else {
            panic!("kvm: no frame for kernel stack");
        };
        kvm_map(&mut pt, kernel_stack(i), stack.leak(), PAGE_SIZE, rw);
    }

    pt
}

/// Build the kernel page table. Boot hart only, before `init_hart`.
pub fn init() {
    KERNEL_TABLE.call_once(make);
    log::info!(target: "mm", "kernel page table built");
}

/// Install the kernel page table into this hart's satp.
pub fn init_hart() {
    let pt = KERNEL_TABLE.get().expect("kvm::init_hart before kvm::init");
    // SAFETY: the kernel table maps the executing text, all RAM and the
    // current stack (boot stack or a mapped kernel stack).
    unsafe { arch::install_page_table(pt.root_ppn()) };
}

/// The satp value of the kernel table, staged into trap frames so the
/// trampoline can switch back on user traps.
pub fn kernel_satp() -> u64 {
    KERNEL_TABLE.get().expect("kvm not initialized").satp()
}
