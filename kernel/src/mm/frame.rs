//! Physical frame allocator.
//!
//! A free-list of 4 KiB frames threaded through the frames themselves,
//! covering the RAM between the end of the kernel image and `MAX_PADDR`.
//! The kernel runs identity-mapped, so a frame's physical address is also
//! the pointer the kernel uses to touch it.
//!
//! `Frame` is an owning RAII handle; transfer of ownership into a page
//! table (which outlives any Rust scope) goes through `Frame::leak` and
//! comes back through `frame::free_raw` when the mapping is torn down.

use core::ptr::{self, NonNull};

use crate::{
    arch,
    mm::layout::{MAX_PADDR, PAGE_SIZE},
    sync::SpinLock,
};

struct FreeNode {
    next: *mut FreeNode,
}

struct FreeList {
    head: *mut FreeNode,
    /// Free-frame count, for the boot banner and leak hunting.
    free: usize,
}

// SAFETY: the raw head pointer only ever refers to otherwise-unowned
// frames; the spinlock serializes all list manipulation.
unsafe impl Send for FreeList {}

static FREE_LIST: SpinLock<FreeList> = SpinLock::new("free_list", FreeList {
    head: ptr::null_mut(),
    free: 0,
});

/// Hand every frame between the kernel image and the top of RAM to the
/// allocator. Called once on the boot hart before paging is enabled.
pub fn init() {
    let mut list = FREE_LIST.lock();
    let mut pa = arch::kernel_end();
    while pa + PAGE_SIZE as u64 <= MAX_PADDR {
        let node = pa as *mut FreeNode;
        // SAFETY: [kernel_end, MAX_PADDR) is unused RAM, identity-mapped,
        // and each frame is visited exactly once.
        unsafe {
            (*node).next = list.head;
        }
        list.head = node;
        list.free += 1;
        pa += PAGE_SIZE as u64;
    }
    log::info!(target: "mm", "frame allocator: {} frames free", list.free);
}

/// An owned physical frame.
pub struct Frame {
    ptr: NonNull<u8>,
}

// SAFETY: a Frame is exclusive ownership of one physical page; nothing
// about it is hart-affine.
unsafe impl Send for Frame {}

impl Frame {
    /// Physical (= kernel-virtual) address of the frame.
    pub fn addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Give up ownership without freeing; the caller (typically a page
    /// table) becomes responsible for a matching `free_raw`.
    pub fn leak(self) -> u64 {
        let pa = self.addr();
        core::mem::forget(self);
        pa
    }

    /// Zero the frame's contents.
    pub fn zero(&mut self) {
        // SAFETY: we own the frame; it is PAGE_SIZE bytes of mapped RAM.
        unsafe { ptr::write_bytes(self.ptr.as_ptr(), 0, PAGE_SIZE) };
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // SAFETY: the Frame owned this page; returning it to the free list
        // ends that ownership.
        unsafe { free_raw(self.addr()) };
    }
}

/// Allocate one frame. Contents are whatever the previous owner left.
pub fn alloc() -> Option<Frame> {
    let mut list = FREE_LIST.lock();
    if list.head.is_null() {
        return None;
    }
    let node = list.head;
    // SAFETY: head is a live free-list node inside an unowned frame.
    list.head = unsafe { (*node).next };
    list.free -= 1;
    drop(list);
    Some(Frame {
        // SAFETY: free-list nodes are never at address zero (RAM starts
        // well above it).
        ptr: unsafe { NonNull::new_unchecked(node as *mut u8) },
    })
}

/// Allocate one zero-filled frame.
pub fn alloc_zeroed() -> Option<Frame> {
    let mut f = alloc()?;
    f.zero();
    Some(f)
}

/// Return a frame to the allocator by physical address.
///
/// # Safety
///
/// `pa` must be a page-aligned frame previously obtained from this
/// allocator (directly or via `Frame::leak`) and must not be referenced
/// again by anyone.
pub unsafe fn free_raw(pa: u64) {
    debug_assert_eq!(pa as usize % PAGE_SIZE, 0, "freeing unaligned frame");
    let mut list = FREE_LIST.lock();
    let node = pa as *mut FreeNode;
    // SAFETY: per the contract the frame is unowned from here on; we may
    // repurpose its first bytes as the list node.
    unsafe {
        (*node).next = list.head;
    }
    list.head = node;
    list.free += 1;
}

/// Reconstruct an owned `Frame` from a leaked physical address.
///
/// # Safety
///
/// `pa` must have come from `Frame::leak` (or an equivalent transfer) and
/// have exactly one owner from now on.
pub unsafe fn from_raw(pa: u64) -> Frame {
    Frame {
        // SAFETY: allocator frames are never at address zero.
        ptr: unsafe { NonNull::new_unchecked(pa as *mut u8) },
    }
}
