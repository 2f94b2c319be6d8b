//! File objects.
//!
//! A fixed table of reference-counted file objects unifies inodes,
//! devices and pipe endpoints behind one read/write/seek/stat surface.
//! The table spinlock guards reference counts; a slot's payload is only
//! written while it is unshared (refcount 0 -> 1 on allocate, 1 -> 0 on
//! close), so readers access it without further locking.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    error::{KernelError, KernelResult},
    fs::{
        inode::{InodeType, Iref},
        log,
        pipe::Pipe,
        BLOCK_SIZE,
    },
    param::{MAX_OP_BLKS, N_DEV, N_FILE},
    sync::SpinLock,
};

/// Console device major number.
pub const CONSOLE: usize = 1;

/// Seek anchors.
pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

/// A character device: read/write entry points taking (to/from user,
/// user or kernel address, byte count).
#[derive(Clone, Copy)]
pub struct DeviceSwitch {
    pub read: fn(bool, u64, usize) -> KernelResult<usize>,
    pub write: fn(bool, u64, usize) -> KernelResult<usize>,
}

static DEVICES: SpinLock<[Option<DeviceSwitch>; N_DEV]> =
    SpinLock::new("devsw", [None; N_DEV]);

/// Install a device driver under `major`.
pub fn register_device(major: usize, sw: DeviceSwitch) {
    let mut devices = DEVICES.lock();
    devices[major] = Some(sw);
}

fn device(major: u16) -> Option<DeviceSwitch> {
    if major as usize >= N_DEV {
        return None;
    }
    *DEVICES.lock().get(major as usize)?
}

/// What a file object refers to.
pub enum FileKind {
    None,
    Inode { ip: Iref },
    Device { ip: Iref, major: u16 },
    Pipe { pipe: &'static Pipe },
}

/// One slot of the global file table.
pub struct File {
    /// Payload; written only while the slot is unshared.
    kind: UnsafeCell<FileKind>,
    readable: UnsafeCell<bool>,
    writable: UnsafeCell<bool>,
    /// Current offset, for inode files. Offset updates are serialized by
    /// the inode sleep lock, which every inode read/write holds.
    off: AtomicU32,
}

// SAFETY: payload fields are only mutated while the slot is provably
// unshared (see FileKind docs); concurrent access is read-only.
unsafe impl Sync for File {}
unsafe impl Send for File {}

impl File {
    const fn new() -> Self {
        Self {
            kind: UnsafeCell::new(FileKind::None),
            readable: UnsafeCell::new(false),
            writable: UnsafeCell::new(false),
            off: AtomicU32::new(0),
        }
    }

    fn kind(&self) -> &FileKind {
        // SAFETY: shared read; mutation only happens unshared.
        unsafe { &*self.kind.get() }
    }

    pub fn readable(&self) -> bool {
        // SAFETY: as kind().
        unsafe { *self.readable.get() }
    }

    pub fn writable(&self) -> bool {
        // SAFETY: as kind().
        unsafe { *self.writable.get() }
    }
}

struct FTable {
    refs: SpinLock<[u32; N_FILE]>,
    files: [File; N_FILE],
}

static FTABLE: FTable = FTable {
    refs: SpinLock::new("ftable", [0; N_FILE]),
    files: [const { File::new() }; N_FILE],
};

fn slot_of(f: &'static File) -> usize {
    let base = FTABLE.files.as_ptr() as usize;
    (f as *const File as usize - base) / core::mem::size_of::<File>()
}

/// Allocate a file object with the given payload and access mode.
pub fn alloc(kind: FileKind, readable: bool, writable: bool) -> KernelResult<&'static File> {
    let mut refs = FTABLE.refs.lock();
    for i in 0..N_FILE {
        if refs[i] == 0 {
            refs[i] = 1;
            let f = &FTABLE.files[i];
            // SAFETY: the slot was unreferenced and we hold the table
            // lock, so no one else can observe it mid-write.
            unsafe {
                *f.kind.get() = kind;
                *f.readable.get() = readable;
                *f.writable.get() = writable;
            }
            f.off.store(0, Ordering::Relaxed);
            return Ok(f);
        }
    }
    Err(KernelError::ResourceExhausted { resource: "files" })
}

/// Take another reference.
pub fn dup(f: &'static File) -> &'static File {
    let mut refs = FTABLE.refs.lock();
    let i = slot_of(f);
    if refs[i] < 1 {
        panic!("file: dup of a closed file");
    }
    refs[i] += 1;
    f
}

/// Drop one reference; the last close releases the payload (half-closing
/// a pipe or putting the inode inside a transaction).
pub fn close(f: &'static File) {
    let payload = {
        let mut refs = FTABLE.refs.lock();
        let i = slot_of(f);
        if refs[i] < 1 {
            panic!("file: close of a closed file");
        }
        refs[i] -= 1;
        if refs[i] > 0 {
            return;
        }
        // SAFETY: refcount just hit zero under the table lock; we are the
        // only path touching the payload.
        unsafe { core::mem::replace(&mut *f.kind.get(), FileKind::None) }
    };

    match payload {
        FileKind::None => {}
        FileKind::Pipe { pipe } => pipe.close(f.writable()),
        FileKind::Inode { ip } | FileKind::Device { ip, .. } => {
            // iput may need to truncate a freshly-unlinked inode.
            log::begin_op();
            drop(ip);
            log::end_op();
        }
    }
}

/// Read up to `n` bytes into user address `dst`.
pub fn read(f: &'static File, dst: u64, n: usize) -> KernelResult<usize> {
    if !f.readable() {
        return Err(KernelError::InvalidOperation);
    }

    match f.kind() {
        FileKind::Device { major, .. } => {
            let dev = device(*major).ok_or(KernelError::InvalidOperation)?;
            (dev.read)(true, dst, n)
        }
        FileKind::Inode { ip } => {
            let mut g = ip.lock();
            let off = f.off.load(Ordering::Relaxed);
            let read = g.readi(true, dst, off, n)?;
            f.off.store(off + read as u32, Ordering::Relaxed);
            Ok(read)
        }
        FileKind::Pipe { pipe } => pipe.read(dst, n),
        FileKind::None => panic!("file: read of an empty slot"),
    }
}

/// Write up to `n` bytes from user address `src`.
pub fn write(f: &'static File, src: u64, n: usize) -> KernelResult<usize> {
    if !f.writable() {
        return Err(KernelError::InvalidOperation);
    }

    match f.kind() {
        FileKind::Device { major, .. } => {
            let dev = device(*major).ok_or(KernelError::InvalidOperation)?;
            (dev.write)(true, src, n)
        }
        FileKind::Inode { ip } => {
            // Split the write so each chunk's worst case (data blocks,
            // indirect block, inode, bitmap, and slop for unaligned ends)
            // fits one log transaction.
            let max = ((MAX_OP_BLKS - 1 - 1 - 2) / 2) * BLOCK_SIZE;
            let mut done = 0;
            while done < n {
                let len = (n - done).min(max);
                log::begin_op();
                let mut g = ip.lock();
                let off = f.off.load(Ordering::Relaxed);
                let wrote = g.writei(true, src + done as u64, off, len);
                if let Ok(w) = wrote {
                    f.off.store(off + w as u32, Ordering::Relaxed);
                }
                drop(g);
                log::end_op();

                match wrote {
                    Ok(w) if w == len => done += w,
                    _ => return Err(KernelError::BadAddress { addr: src + done as u64 }),
                }
            }
            Ok(n)
        }
        FileKind::Pipe { pipe } => pipe.write(src, n),
        FileKind::None => panic!("file: write of an empty slot"),
    }
}

/// Set the offset directly (open with O_APPEND).
pub fn set_off(f: &'static File, off: u32) {
    f.off.store(off, Ordering::Relaxed);
}

/// Reposition an inode file's offset. The result must stay inside
/// `[0, size]`; no blocks are allocated.
pub fn lseek(f: &'static File, offset: i64, whence: i32) -> KernelResult<u32> {
    let FileKind::Inode { ip } = f.kind() else {
        return Err(KernelError::InvalidOperation);
    };

    let g = ip.lock();
    if g.type_() != InodeType::File {
        return Err(KernelError::InvalidOperation);
    }
    let size = g.size() as i64;
    let base = match whence {
        SEEK_SET => 0,
        SEEK_CUR => f.off.load(Ordering::Relaxed) as i64,
        SEEK_END => size,
        _ => return Err(KernelError::InvalidArgument { name: "whence" }),
    };
    let new = base + offset;
    if new < 0 || new > size {
        return Err(KernelError::InvalidArgument { name: "offset" });
    }
    f.off.store(new as u32, Ordering::Relaxed);
    Ok(new as u32)
}

/// Copy the file's stat record out to user address `dst`.
pub fn stat(f: &'static File, dst: u64) -> KernelResult<()> {
    match f.kind() {
        FileKind::Inode { ip } | FileKind::Device { ip, .. } => {
            let st = {
                let g = ip.lock();
                g.stat()
            };
            let p = crate::cpu::current_proc();
            // SAFETY: only the current process walks its own page table.
            unsafe { p.page_table() }.copy_out(dst, &st.encode())
        }
        _ => Err(KernelError::InvalidOperation),
    }
}
