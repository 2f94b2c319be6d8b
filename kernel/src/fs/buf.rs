//! Buffer cache.
//!
//! A fixed pool of block buffers fronting the virtio disk. The cache
//! spinlock protects the identity/refcount table and the LRU order; each
//! buffer's payload is guarded by its own sleep lock, so at most one
//! process mutates a given block at a time while others may sleep waiting
//! for it.
//!
//! `bread` returns a `BufRef`, a locked, reference-counted handle whose
//! drop is `brelse`: release the sleep lock, then retire the buffer to
//! the MRU end once unreferenced. The log additionally pins buffers
//! (refcount without holding) to keep dirty blocks cached until commit.

use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    dev::virtio,
    fs::{lru::LruList, BLOCK_SIZE},
    param::N_BUF,
    sync::{SleepLock, SleepLockGuard, SpinLock},
};

/// Sleep-locked payload of one buffer.
pub struct BufData {
    pub dev: u32,
    pub bno: u32,
    pub bytes: [u8; BLOCK_SIZE],
}

/// One pooled buffer.
pub struct Buf {
    /// Set while the disk owns the payload (request in flight); written
    /// under the virtio lock, watched by the submitting process.
    owned_by_disk: AtomicBool,
    /// Has the payload been read from disk since last reassignment?
    valid: AtomicBool,
    lock: SleepLock<BufData>,
}

impl Buf {
    const fn new() -> Self {
        Self {
            owned_by_disk: AtomicBool::new(false),
            valid: AtomicBool::new(false),
            lock: SleepLock::new("buf", BufData {
                dev: 0,
                bno: 0,
                bytes: [0; BLOCK_SIZE],
            }),
        }
    }

    pub fn owned_by_disk(&self) -> bool {
        self.owned_by_disk.load(Ordering::Acquire)
    }

    pub fn set_owned_by_disk(&self, owned: bool) {
        self.owned_by_disk.store(owned, Ordering::Release);
    }
}

/// Identity and reference count of a pool slot; cache-lock protected.
#[derive(Clone, Copy)]
struct BufMeta {
    dev: u32,
    bno: u32,
    refcnt: u32,
}

struct CacheInner {
    meta: [BufMeta; N_BUF],
    lru: LruList<{ N_BUF + 1 }>,
}

struct Cache {
    inner: SpinLock<CacheInner>,
    bufs: [Buf; N_BUF],
}

static BCACHE: Cache = Cache {
    inner: SpinLock::new("bcache", CacheInner {
        meta: [BufMeta {
            dev: 0,
            bno: 0,
            refcnt: 0,
        }; N_BUF],
        lru: LruList::new(),
    }),
    bufs: [const { Buf::new() }; N_BUF],
};

/// Thread every buffer onto the recency list. Boot hart only.
pub fn init() {
    let mut inner = BCACHE.inner.lock();
    for i in 0..N_BUF {
        inner.lru.push_front(i);
    }
}

/// A locked reference to a cached block. Dropping it is `brelse`.
pub struct BufRef {
    idx: usize,
    buf: &'static Buf,
    guard: ManuallyDrop<SleepLockGuard<'static, BufData>>,
}

impl BufRef {
    /// The underlying pool entry (wait-channel identity for disk I/O).
    pub fn buf(&self) -> &'static Buf {
        self.buf
    }

    /// Split into the pool entry and its locked payload, for the disk
    /// driver's (entry, data) interface.
    fn parts(&mut self) -> (&'static Buf, &mut BufData) {
        (self.buf, &mut self.guard)
    }
}

impl Deref for BufRef {
    type Target = BufData;

    fn deref(&self) -> &BufData {
        &self.guard
    }
}

impl DerefMut for BufRef {
    fn deref_mut(&mut self) -> &mut BufData {
        &mut self.guard
    }
}

impl Drop for BufRef {
    fn drop(&mut self) {
        // Release the sleep lock first; the cache lock must not be held
        // across a (possibly sleeping) lock handoff.
        // SAFETY: the guard is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.guard) };

        let mut inner = BCACHE.inner.lock();
        let m = &mut inner.meta[self.idx];
        m.refcnt -= 1;
        if m.refcnt == 0 {
            // Nobody is waiting for it; it is the freshest recyclable
            // buffer.
            inner.lru.move_to_front(self.idx);
        }
    }
}

/// Return a locked buffer holding the contents of block `bno` on `dev`.
pub fn bread(dev: u32, bno: u32) -> BufRef {
    let idx = {
        let mut inner = BCACHE.inner.lock();

        // Already cached? Every buffer stays on the recency list, so one
        // scan covers both referenced and retired-but-identified entries.
        let mut found = None;
        let mut cur = inner.lru.head();
        while let Some(i) = cur {
            if inner.meta[i].dev == dev && inner.meta[i].bno == bno {
                found = Some(i);
                break;
            }
            cur = inner.lru.after(i);
        }

        match found {
            Some(i) => {
                inner.meta[i].refcnt += 1;
                i
            }
            None => {
                // Recycle the least-recently-used unreferenced buffer.
                let mut victim = None;
                let mut cur = inner.lru.tail();
                while let Some(i) = cur {
                    if inner.meta[i].refcnt == 0 {
                        victim = Some(i);
                        break;
                    }
                    cur = inner.lru.before(i);
                }
                let Some(i) = victim else {
                    panic!("bcache: no free buffers");
                };
                inner.meta[i] = BufMeta {
                    dev,
                    bno,
                    refcnt: 1,
                };
                BCACHE.bufs[i].valid.store(false, Ordering::Relaxed);
                i
            }
        }
    };

    let buf = &BCACHE.bufs[idx];
    let guard = buf.lock.lock();
    let mut r = BufRef {
        idx,
        buf,
        guard: ManuallyDrop::new(guard),
    };

    if !buf.valid.load(Ordering::Relaxed) {
        r.dev = dev;
        r.bno = bno;
        let (entry, data) = r.parts();
        virtio::read(entry, data);
        buf.valid.store(true, Ordering::Relaxed);
    }

    r
}

/// Write a locked buffer's contents to disk synchronously.
pub fn bwrite(b: &mut BufRef) {
    let (entry, data) = b.parts();
    virtio::write(entry, data);
}

/// Take an extra reference so the buffer survives `brelse` until commit.
pub fn pin(b: &BufRef) {
    let mut inner = BCACHE.inner.lock();
    let m = &mut inner.meta[b.idx];
    if m.refcnt < 1 {
        panic!("bcache: pinning an unreferenced buffer");
    }
    m.refcnt += 1;
}

/// Drop a pin taken with `pin`.
pub fn unpin(b: &BufRef) {
    let mut inner = BCACHE.inner.lock();
    let m = &mut inner.meta[b.idx];
    if m.refcnt < 1 {
        panic!("bcache: unpinning an unreferenced buffer");
    }
    m.refcnt -= 1;
}
