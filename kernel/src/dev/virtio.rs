//! Virtio block device driver (legacy MMIO, single split queue).
//!
//! Every disk operation is a three-descriptor chain: request header
//! (type + sector), the 1024-byte data buffer (device-writable iff the
//! operation is a read), and a one-byte status the device fills in last.
//! The submitting process sleeps on the buffer until the completion
//! interrupt clears its disk-owned flag; descriptor exhaustion sleeps on
//! the free list.

use core::{
    cell::UnsafeCell,
    sync::atomic::{fence, Ordering},
};

use crate::{
    fs::buf::{Buf, BufData},
    mm::layout::{PAGE_SIZE, VIRTIO0},
    proc::{self, chan},
    sync::SpinLock,
};

// -- MMIO register offsets (QEMU virtio_mmio.h) -----------------------------

const MMIO_MAGIC_VALUE: usize = 0x000;
const MMIO_VERSION: usize = 0x004;
const MMIO_DEVICE_ID: usize = 0x008;
const MMIO_VENDOR_ID: usize = 0x00c;
const MMIO_DEVICE_FEATURES: usize = 0x010;
const MMIO_DRIVER_FEATURES: usize = 0x020;
const MMIO_GUEST_PAGE_SIZE: usize = 0x028;
const MMIO_QUEUE_SEL: usize = 0x030;
const MMIO_QUEUE_NUM_MAX: usize = 0x034;
const MMIO_QUEUE_NUM: usize = 0x038;
const MMIO_QUEUE_PFN: usize = 0x040;
const MMIO_QUEUE_READY: usize = 0x044;
const MMIO_QUEUE_NOTIFY: usize = 0x050;
const MMIO_INTERRUPT_STATUS: usize = 0x060;
const MMIO_INTERRUPT_ACK: usize = 0x064;
const MMIO_STATUS: usize = 0x070;

// Device status bits.
const STATUS_ACKNOWLEDGE: u32 = 1;
const STATUS_DRIVER: u32 = 2;
const STATUS_DRIVER_OK: u32 = 4;
const STATUS_FEATURES_OK: u32 = 8;

// Feature bits we refuse.
const BLK_F_RO: u32 = 5;
const BLK_F_SCSI: u32 = 7;
const BLK_F_CONFIG_WCE: u32 = 11;
const BLK_F_MQ: u32 = 12;
const F_ANY_LAYOUT: u32 = 27;
const RING_F_INDIRECT_DESC: u32 = 28;
const RING_F_EVENT_IDX: u32 = 29;

// Descriptor flags.
const DESC_F_NEXT: u16 = 1;
const DESC_F_WRITE: u16 = 2;

// Request types.
const BLK_T_IN: u32 = 0;
const BLK_T_OUT: u32 = 1;

/// Queue depth; must be a power of two.
const QUEUE_NUM: usize = 8;

#[inline]
fn read_reg(reg: usize) -> u32 {
    // SAFETY: the virtio MMIO page is mapped R|W in the kernel table.
    unsafe { core::ptr::read_volatile((VIRTIO0 as usize + reg) as *const u32) }
}

#[inline]
fn write_reg(reg: usize, value: u32) {
    // SAFETY: as above.
    unsafe { core::ptr::write_volatile((VIRTIO0 as usize + reg) as *mut u32, value) }
}

// -- Shared (device-visible) structures -------------------------------------

#[repr(C)]
#[derive(Clone, Copy)]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[repr(C)]
struct VirtqAvail {
    flags: u16,
    idx: u16,
    ring: [u16; QUEUE_NUM],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VirtqUsedElem {
    id: u32,
    len: u32,
}

#[repr(C)]
struct VirtqUsed {
    flags: u16,
    idx: u16,
    ring: [VirtqUsedElem; QUEUE_NUM],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct BlkReq {
    type_: u32,
    reserved: u32,
    sector: u64,
}

/// Queue memory: two contiguous, page-aligned pages. Legacy virtio wants
/// descriptors + avail in the first page and the used ring in the second.
#[repr(C, align(4096))]
struct QueueMem(UnsafeCell<[u8; 2 * PAGE_SIZE]>);

// SAFETY: accessed only under the disk lock (driver side) or by the
// device itself (DMA); the raw-pointer views below never form references
// that outlive a critical section.
unsafe impl Sync for QueueMem {}

static QUEUE: QueueMem = QueueMem(UnsafeCell::new([0; 2 * PAGE_SIZE]));

/// Request headers, one per descriptor slot, read by the device while the
/// submitter sleeps.
#[repr(C)]
struct OpsMem(UnsafeCell<[BlkReq; QUEUE_NUM]>);

// SAFETY: slot `i` is only written while descriptor `i` is allocated to
// the writing process (disk lock held) and only read by the device.
unsafe impl Sync for OpsMem {}

static OPS: OpsMem = OpsMem(UnsafeCell::new(
    [BlkReq {
        type_: 0,
        reserved: 0,
        sector: 0,
    }; QUEUE_NUM],
));

/// Status bytes, one per chain head, written by the device last.
struct StatusMem(UnsafeCell<[u8; QUEUE_NUM]>);

// SAFETY: same slot discipline as OpsMem.
unsafe impl Sync for StatusMem {}

static STATUS: StatusMem = StatusMem(UnsafeCell::new([0; QUEUE_NUM]));

fn desc_ptr(i: usize) -> *mut VirtqDesc {
    let base = QUEUE.0.get() as *mut u8;
    // SAFETY: i < QUEUE_NUM, and the descriptor table occupies the start
    // of the first queue page.
    unsafe { (base as *mut VirtqDesc).add(i) }
}

fn avail_ptr() -> *mut VirtqAvail {
    let base = QUEUE.0.get() as *mut u8;
    // SAFETY: the avail ring sits directly after the descriptor table.
    unsafe { base.add(QUEUE_NUM * core::mem::size_of::<VirtqDesc>()) as *mut VirtqAvail }
}

fn used_ptr() -> *mut VirtqUsed {
    let base = QUEUE.0.get() as *mut u8;
    // SAFETY: the used ring owns the second queue page.
    unsafe { base.add(PAGE_SIZE) as *mut VirtqUsed }
}

// -- Driver state -----------------------------------------------------------

struct Track {
    /// Buffer whose disk-owned flag the completion handler clears, used
    /// also as the completion wait channel. Null while idle.
    buf: *const Buf,
}

struct Disk {
    free: [bool; QUEUE_NUM],
    used_idx: u16,
    info: [Track; QUEUE_NUM],
}

// SAFETY: the raw buffer pointers refer to entries of the static buffer
// pool; the spinlock serializes all driver-side access.
unsafe impl Send for Disk {}

static DISK: SpinLock<Disk> = SpinLock::new("virtio_disk", Disk {
    free: [true; QUEUE_NUM],
    used_idx: 0,
    info: [const { Track {
        buf: core::ptr::null(),
    } }; QUEUE_NUM],
});

fn free_chan() -> usize {
    chan(&DISK)
}

/// Probe and configure the device, then publish the queue. Boot hart
/// only, with interrupts still routed but the scheduler not yet running.
pub fn init() {
    if read_reg(MMIO_MAGIC_VALUE) != 0x7472_6976
        || read_reg(MMIO_VERSION) != 1
        || read_reg(MMIO_DEVICE_ID) != 2
        || read_reg(MMIO_VENDOR_ID) != 0x554d_4551
    {
        panic!("virtio: no disk at VIRTIO0");
    }

    let mut status = 0;
    write_reg(MMIO_STATUS, status);

    status |= STATUS_ACKNOWLEDGE;
    write_reg(MMIO_STATUS, status);

    status |= STATUS_DRIVER;
    write_reg(MMIO_STATUS, status);

    let mut features = read_reg(MMIO_DEVICE_FEATURES);
    features &= !(1 << BLK_F_RO);
    features &= !(1 << BLK_F_SCSI);
    features &= !(1 << BLK_F_CONFIG_WCE);
    features &= !(1 << BLK_F_MQ);
    features &= !(1 << F_ANY_LAYOUT);
    features &= !(1 << RING_F_EVENT_IDX);
    features &= !(1 << RING_F_INDIRECT_DESC);
    write_reg(MMIO_DRIVER_FEATURES, features);

    status |= STATUS_FEATURES_OK;
    write_reg(MMIO_STATUS, status);
    if read_reg(MMIO_STATUS) & STATUS_FEATURES_OK == 0 {
        panic!("virtio: device refused our feature set");
    }

    write_reg(MMIO_QUEUE_SEL, 0);
    if read_reg(MMIO_QUEUE_READY) != 0 {
        panic!("virtio: queue 0 already live");
    }
    write_reg(MMIO_GUEST_PAGE_SIZE, PAGE_SIZE as u32);

    let max = read_reg(MMIO_QUEUE_NUM_MAX);
    if max == 0 {
        panic!("virtio: device has no queue 0");
    }
    if (max as usize) < QUEUE_NUM {
        panic!("virtio: queue 0 too short");
    }
    write_reg(MMIO_QUEUE_NUM, QUEUE_NUM as u32);
    write_reg(MMIO_QUEUE_PFN, (QUEUE.0.get() as u64 >> 12) as u32);
    write_reg(MMIO_QUEUE_READY, 0x1);

    status |= STATUS_DRIVER_OK;
    write_reg(MMIO_STATUS, status);

    log::info!(target: "virtio", "disk ready, queue depth {}", QUEUE_NUM);
}

fn alloc_desc(disk: &mut Disk) -> Option<usize> {
    for (i, free) in disk.free.iter_mut().enumerate() {
        if *free {
            *free = false;
            return Some(i);
        }
    }
    None
}

fn free_desc(disk: &mut Disk, i: usize) {
    if i >= QUEUE_NUM {
        panic!("virtio: freeing an invalid descriptor");
    }
    if disk.free[i] {
        panic!("virtio: descriptor already free");
    }
    // SAFETY: descriptor i belongs to the caller until this line.
    unsafe {
        desc_ptr(i).write(VirtqDesc {
            addr: 0,
            len: 0,
            flags: 0,
            next: 0,
        });
    }
    disk.free[i] = true;
    proc::wake_up(free_chan());
}

fn free_chain(disk: &mut Disk, mut i: usize) {
    loop {
        // SAFETY: chain members were allocated to this caller.
        let desc = unsafe { desc_ptr(i).read() };
        free_desc(disk, i);
        if desc.flags & DESC_F_NEXT != 0 {
            i = desc.next as usize;
        } else {
            break;
        }
    }
}

fn alloc3_desc(disk: &mut Disk) -> Option<[usize; 3]> {
    let mut idx = [0; 3];
    for i in 0..3 {
        match alloc_desc(disk) {
            Some(d) => idx[i] = d,
            None => {
                for &d in &idx[..i] {
                    free_desc(disk, d);
                }
                return None;
            }
        }
    }
    Some(idx)
}

/// Submit one block operation and sleep until it completes.
fn rw(buf: &'static Buf, data: &mut BufData, write: bool) {
    let sector = data.bno as u64 * (crate::fs::BLOCK_SIZE as u64 / 512);

    let mut disk = DISK.lock();

    // Three descriptors per operation; sleep if the table is full.
    let idx = loop {
        match alloc3_desc(&mut disk) {
            Some(idx) => break idx,
            None => disk = proc::sleep_on(free_chan(), disk),
        }
    };

    // SAFETY: slots idx[0..3] are ours; OPS/STATUS slot idx[0] likewise.
    // The device reads/writes these and the data buffer between the
    // notify below and the completion interrupt; the kernel does not
    // touch them in that window.
    unsafe {
        let req = (OPS.0.get() as *mut BlkReq).add(idx[0]);
        req.write(BlkReq {
            type_: if write { BLK_T_OUT } else { BLK_T_IN },
            reserved: 0,
            sector,
        });

        desc_ptr(idx[0]).write(VirtqDesc {
            addr: req as u64,
            len: core::mem::size_of::<BlkReq>() as u32,
            flags: DESC_F_NEXT,
            next: idx[1] as u16,
        });

        desc_ptr(idx[1]).write(VirtqDesc {
            addr: data.bytes.as_mut_ptr() as u64,
            len: crate::fs::BLOCK_SIZE as u32,
            flags: (if write { 0 } else { DESC_F_WRITE }) | DESC_F_NEXT,
            next: idx[2] as u16,
        });

        let status = (STATUS.0.get() as *mut u8).add(idx[0]);
        status.write(0xff);
        desc_ptr(idx[2]).write(VirtqDesc {
            addr: status as u64,
            len: 1,
            flags: DESC_F_WRITE,
            next: 0,
        });
    }

    buf.set_owned_by_disk(true);
    disk.info[idx[0]].buf = buf;

    // SAFETY: the avail ring is ours under the disk lock; the fences
    // order ring contents before the index bump before the notify.
    unsafe {
        let avail = avail_ptr();
        let slot = (*avail).idx as usize % QUEUE_NUM;
        (*avail).ring[slot] = idx[0] as u16;
        fence(Ordering::SeqCst);
        (*avail).idx = (*avail).idx.wrapping_add(1);
    }
    fence(Ordering::SeqCst);
    write_reg(MMIO_QUEUE_NOTIFY, 0);

    // Wait for the interrupt handler to hand the buffer back.
    while buf.owned_by_disk() {
        disk = proc::sleep_on(chan(buf), disk);
    }

    disk.info[idx[0]].buf = core::ptr::null();
    free_chain(&mut disk, idx[0]);
}

/// Read the block named by `data.bno` into `data.bytes`.
pub fn read(buf: &'static Buf, data: &mut BufData) {
    rw(buf, data, false);
}

/// Write `data.bytes` to the block named by `data.bno`.
pub fn write(buf: &'static Buf, data: &mut BufData) {
    rw(buf, data, true);
}

/// Completion interrupt: ack, then walk the used ring waking submitters.
pub fn handle_intr() {
    let mut disk = DISK.lock();

    write_reg(MMIO_INTERRUPT_ACK, read_reg(MMIO_INTERRUPT_STATUS) & 0x3);

    fence(Ordering::SeqCst);

    // SAFETY: the used ring is device-written; reads are ordered by the
    // fences around the index comparison.
    unsafe {
        let used = used_ptr();
        while disk.used_idx != (*used).idx {
            fence(Ordering::SeqCst);
            let id = (*used).ring[disk.used_idx as usize % QUEUE_NUM].id as usize;

            let status = (STATUS.0.get() as *const u8).add(id).read();
            if status != 0 {
                panic!("virtio: request failed with status {}", status);
            }

            let buf = disk.info[id].buf;
            if buf.is_null() {
                panic!("virtio: completion for an idle descriptor");
            }
            (*buf).set_owned_by_disk(false);
            proc::wake_up(chan(&*buf));

            disk.used_idx = disk.used_idx.wrapping_add(1);
        }
    }
}
