//! Write-ahead log.
//!
//! Every filesystem mutation happens inside a transaction bracketed by
//! `begin_op`/`end_op`; each dirtied block is announced with `log_write`.
//! Commit copies the dirty blocks into the on-disk log ring, writes the
//! header (the commit point), installs the blocks at their home
//! locations, then clears the header. Recovery at mount replays whatever
//! a non-empty header describes, which makes a half-finished commit
//! either fully visible or invisible after a crash.
//!
//! Several transactions may be outstanding at once as long as their
//! worst-case combined footprint fits the ring; `end_op` of the last one
//! commits for all.

use crate::{
    fs::{
        buf::{self, BufRef},
        SuperBlock, BLOCK_SIZE,
    },
    param::{LOG_SIZE, MAX_OP_BLKS},
    proc::{self, chan},
    sync::SpinLock,
};

struct LogHeader {
    n: u32,
    blocks: [u32; LOG_SIZE],
}

struct Log {
    /// First block of the log region (the header block).
    start: u32,
    dev: u32,
    outstanding: u32,
    committing: bool,
    header: LogHeader,
}

static LOG: SpinLock<Log> = SpinLock::new("log", Log {
    start: 0,
    dev: 0,
    outstanding: 0,
    committing: false,
    header: LogHeader {
        n: 0,
        blocks: [0; LOG_SIZE],
    },
});

fn log_chan() -> usize {
    chan(&LOG)
}

/// Initialize from the superblock and run crash recovery. Process
/// context (performs disk I/O).
pub fn init(dev: u32, sb: &SuperBlock) {
    if core::mem::size_of::<LogHeader>() > BLOCK_SIZE {
        panic!("log: header larger than a block");
    }
    if sb.n_log_blks as usize != LOG_SIZE {
        panic!("log: ring size does not match the kernel's LOG_SIZE");
    }

    let mut log = LOG.lock();
    log.start = sb.log_start;
    log.dev = dev;
    drop(log);

    recover();
}

pub fn info_banner(sb: &SuperBlock) {
    ::log::info!(target: "fs",
        "mounted: {} log blocks, {} inode blocks, {} data blocks",
        sb.n_log_blks, sb.n_inode_blks, sb.n_data_blks
    );
}

/// Copy the staged log-ring blocks to their home locations. With
/// `recovering` the buffers were never pinned, so there is nothing to
/// unpin.
fn install_trans(dev: u32, start: u32, header: &LogHeader, recovering: bool) {
    for i in 0..header.n as usize {
        let from = buf::bread(dev, start + 1 + i as u32);
        let mut to = buf::bread(dev, header.blocks[i]);
        let data = from.bytes;
        to.bytes.copy_from_slice(&data);
        buf::bwrite(&mut to);
        if !recovering {
            buf::unpin(&to);
        }
        drop(from);
        drop(to);
    }
}

fn read_header(dev: u32, start: u32) -> LogHeader {
    let b = buf::bread(dev, start);
    let n = u32::from_le_bytes(b.bytes[0..4].try_into().unwrap());
    let mut header = LogHeader {
        n,
        blocks: [0; LOG_SIZE],
    };
    for i in 0..(n as usize).min(LOG_SIZE) {
        let off = 4 + i * 4;
        header.blocks[i] = u32::from_le_bytes(b.bytes[off..off + 4].try_into().unwrap());
    }
    header
}

/// Write the in-memory header to disk. This is the commit point: a
/// non-zero `n` on disk means the transaction will be replayed.
fn write_header(dev: u32, start: u32, header: &LogHeader) {
    let mut b = buf::bread(dev, start);
    b.bytes[0..4].copy_from_slice(&header.n.to_le_bytes());
    for i in 0..header.n as usize {
        let off = 4 + i * 4;
        b.bytes[off..off + 4].copy_from_slice(&header.blocks[i].to_le_bytes());
    }
    buf::bwrite(&mut b);
}

fn recover() {
    let (dev, start) = {
        let log = LOG.lock();
        (log.dev, log.start)
    };
    let mut header = read_header(dev, start);
    if header.n > 0 {
        ::log::warn!(target: "fs", "log: recovering {} blocks", header.n);
    }
    install_trans(dev, start, &header, true);
    header.n = 0;
    write_header(dev, start, &header);
}

/// Open a transaction: waits until the log is neither committing nor too
/// full to absorb this operation's worst case.
pub fn begin_op() {
    let mut log = LOG.lock();
    loop {
        if log.committing {
            log = proc::sleep_on(log_chan(), log);
        } else if log.header.n as usize + (log.outstanding as usize + 1) * MAX_OP_BLKS > LOG_SIZE {
            log = proc::sleep_on(log_chan(), log);
        } else {
            log.outstanding += 1;
            break;
        }
    }
}

/// Close a transaction; the last one out commits everything staged.
pub fn end_op() {
    let mut log = LOG.lock();
    log.outstanding -= 1;
    if log.committing {
        panic!("log: end_op during commit");
    }

    let do_commit = log.outstanding == 0;
    if do_commit {
        log.committing = true;
    } else {
        // Dropping outstanding may have opened space for a waiter.
        proc::wake_up(log_chan());
    }
    drop(log);

    if do_commit {
        commit();
        let mut log = LOG.lock();
        log.committing = false;
        proc::wake_up(log_chan());
    }
}

fn commit() {
    // Snapshot under the lock; the committing flag keeps the header
    // frozen while the disk work below runs unlocked.
    let (dev, start, header) = {
        let log = LOG.lock();
        (log.dev, log.start, LogHeader {
            n: log.header.n,
            blocks: log.header.blocks,
        })
    };
    if header.n == 0 {
        return;
    }

    // (a) Stage each dirty block into its log-ring slot.
    for i in 0..header.n as usize {
        let from = buf::bread(dev, header.blocks[i]);
        let mut to = buf::bread(dev, start + 1 + i as u32);
        let data = from.bytes;
        to.bytes.copy_from_slice(&data);
        buf::bwrite(&mut to);
    }
    // (b) Commit point.
    write_header(dev, start, &header);
    // (c) Install at home locations, unpinning as we go.
    install_trans(dev, start, &header, false);
    // (d)+(e) Empty the header on disk.
    let empty = LogHeader {
        n: 0,
        blocks: [0; LOG_SIZE],
    };
    write_header(dev, start, &empty);

    let mut log = LOG.lock();
    log.header.n = 0;
}

/// Record `b` as modified by the current transaction. The buffer is
/// pinned in the cache until the commit installs it; duplicate writes of
/// the same block coalesce.
pub fn log_write(b: &BufRef) {
    let mut log = LOG.lock();
    if log.header.n as usize >= LOG_SIZE {
        panic!("log: transaction exceeds log capacity");
    }
    if log.outstanding < 1 {
        panic!("log: log_write outside of a transaction");
    }

    let n = log.header.n as usize;
    let bno = b.bno;
    let mut slot = n;
    for i in 0..n {
        if log.header.blocks[i] == bno {
            slot = i;
            break;
        }
    }
    log.header.blocks[slot] = bno;
    if slot == n {
        buf::pin(b);
        log.header.n += 1;
    }
}
