//! Memory management: physical frames, Sv39 page tables, the kernel map,
//! per-process user spaces and the cross-space copy primitives.

pub mod frame;
pub mod kvm;
pub mod layout;
pub mod page_table;

use crate::{
    cpu,
    error::KernelResult,
    mm::{
        layout::{PAGE_SIZE, TRAMPOLINE, TRAP_FRAME, USER_STACK_BASE},
        page_table::{PageTable, PteFlags},
    },
};

/// Build a fresh user page table containing only the fixed furniture:
/// trampoline (R|X), the process's trap-frame page (R|W), and one zeroed
/// user stack page (R|W|U). Unwinds completely on failure.
pub fn new_user_table(trap_frame_pa: u64) -> KernelResult<PageTable> {
    let mut pt = PageTable::new()?;

    if let Err(e) = pt.map_pages(
        TRAMPOLINE,
        crate::arch::trampoline::base(),
        PAGE_SIZE,
        PteFlags::R | PteFlags::X,
    ) {
        drop(pt);
        return Err(e);
    }

    if let Err(e) = pt.map_pages(TRAP_FRAME, trap_frame_pa, PAGE_SIZE, PteFlags::R | PteFlags::W) {
        pt.unmap_pages(TRAMPOLINE, PAGE_SIZE, false);
        drop(pt);
        return Err(e);
    }

    let stack = match frame::alloc_zeroed() {
        Some(f) => f,
        None => {
            pt.unmap_pages(TRAP_FRAME, PAGE_SIZE, false);
            pt.unmap_pages(TRAMPOLINE, PAGE_SIZE, false);
            drop(pt);
            return Err(crate::error::KernelError::ResourceExhausted { resource: "frames" });
        }
    };
    let stack_pa = stack.leak();
    if let Err(e) = pt.map_pages(
        USER_STACK_BASE,
        stack_pa,
        PAGE_SIZE,
        PteFlags::U | PteFlags::R | PteFlags::W,
    ) {
        // SAFETY: the stack frame was never mapped; reclaim it.
        unsafe { frame::free_raw(stack_pa) };
        pt.unmap_pages(TRAP_FRAME, PAGE_SIZE, false);
        pt.unmap_pages(TRAMPOLINE, PAGE_SIZE, false);
        drop(pt);
        return Err(e);
    }

    Ok(pt)
}

/// Tear down a user page table: stack page (freed), trap frame and
/// trampoline (not ours to free), then the user image and the tree.
pub fn free_user_table(mut pt: PageTable, size: u64) {
    pt.unmap_pages(USER_STACK_BASE, PAGE_SIZE, true);
    pt.unmap_pages(TRAP_FRAME, PAGE_SIZE, false);
    pt.unmap_pages(TRAMPOLINE, PAGE_SIZE, false);
    pt.uvm_free(size);
}

/// Copy kernel bytes to either a user virtual address (through the
/// current process's page table) or a kernel address.
pub fn either_copy_out(to_user: bool, dst: u64, src: &[u8]) -> KernelResult<()> {
    if to_user {
        let p = cpu::current_proc();
        // SAFETY: only the current process walks its own page table here.
        unsafe { p.page_table() }.copy_out(dst, src)
    } else {
        // SAFETY: a kernel destination is a plain in-kernel buffer, named
        // by address because callers (disk paths) mix both worlds.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len());
        }
        Ok(())
    }
}

/// Copy bytes into the kernel from either a user virtual address or a
/// kernel address.
pub fn either_copy_in(from_user: bool, dst: &mut [u8], src: u64) -> KernelResult<()> {
    if from_user {
        let p = cpu::current_proc();
        // SAFETY: only the current process walks its own page table here.
        unsafe { p.page_table() }.copy_in(dst, src)
    } else {
        // SAFETY: a kernel source is a plain in-kernel buffer.
        unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }
}
