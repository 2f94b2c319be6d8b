//! Pipes.
//!
//! A pipe is a 1024-byte ring with two half-closable ends, living in one
//! frame borrowed from the page allocator for its lifetime. Readers and
//! writers sleep on separate channels; every transfer step wakes the
//! other side, and a killed process abandons the transfer with an error.

use crate::{
    cpu,
    error::{KernelError, KernelResult},
    fs::file::{self, File, FileKind},
    mm::{self, frame},
    proc,
    sync::SpinLock,
};

const PIPE_SIZE: usize = 1024;

struct PipeInner {
    data: [u8; PIPE_SIZE],
    /// Bytes read; free-running, reduced mod PIPE_SIZE at access.
    r: u32,
    /// Bytes written.
    w: u32,
    read_open: bool,
    write_open: bool,
}

pub struct Pipe {
    inner: SpinLock<PipeInner>,
}

impl Pipe {
    /// Wait channel for blocked readers.
    fn read_chan(&self) -> usize {
        self as *const Self as usize
    }

    /// Wait channel for blocked writers (distinct token, same object).
    fn write_chan(&self) -> usize {
        self as *const Self as usize + 1
    }

    /// Close one end. The peer is woken so it can observe EOF or broken
    /// pipe; when both ends are gone the backing frame is released.
    pub fn close(&'static self, write_end: bool) {
        let both_closed = {
            let mut pi = self.inner.lock();
            if write_end {
                pi.write_open = false;
                proc::wake_up(self.read_chan());
            } else {
                pi.read_open = false;
                proc::wake_up(self.write_chan());
            }
            !pi.read_open && !pi.write_open
        };

        if both_closed {
            let pa = self as *const Self as u64;
            // SAFETY: the pipe was placement-built in a leaked frame by
            // `alloc`; with both ends closed no reference can remain.
            unsafe { frame::free_raw(pa) };
        }
    }

    /// Read up to `n` bytes to user address `dst`. Blocks while the pipe
    /// is empty and a writer exists; returns 0 at EOF.
    pub fn read(&self, dst: u64, n: usize) -> KernelResult<usize> {
        let p = cpu::current_proc();
        let mut pi = self.inner.lock();

        while pi.r == pi.w && pi.write_open {
            if p.is_killed() {
                return Err(KernelError::Killed);
            }
            pi = proc::sleep_on(self.read_chan(), pi);
        }

        let mut read = 0;
        while read < n {
            if pi.r == pi.w {
                break;
            }
            let c = pi.data[pi.r as usize % PIPE_SIZE];
            pi.r = pi.r.wrapping_add(1);
            if mm::either_copy_out(true, dst + read as u64, &[c]).is_err() {
                break;
            }
            read += 1;
        }
        proc::wake_up(self.write_chan());
        Ok(read)
    }

    /// Write `n` bytes from user address `src`. Blocks while full;
    /// fails once the read end disappears or the writer is killed.
    pub fn write(&self, src: u64, n: usize) -> KernelResult<usize> {
        let p = cpu::current_proc();
        let mut pi = self.inner.lock();

        let mut written = 0;
        while written < n {
            if !pi.read_open {
                return Err(KernelError::BrokenPipe);
            }
            if p.is_killed() {
                return Err(KernelError::Killed);
            }
            if pi.w.wrapping_sub(pi.r) as usize == PIPE_SIZE {
                proc::wake_up(self.read_chan());
                pi = proc::sleep_on(self.write_chan(), pi);
            } else {
                let mut byte = [0u8; 1];
                if mm::either_copy_in(true, &mut byte, src + written as u64).is_err() {
                    break;
                }
                let w = pi.w;
                pi.data[w as usize % PIPE_SIZE] = byte[0];
                pi.w = w.wrapping_add(1);
                written += 1;
            }
        }
        proc::wake_up(self.read_chan());
        Ok(written)
    }
}

/// Create a pipe and its two file objects: `(read end, write end)`.
pub fn alloc() -> KernelResult<(&'static File, &'static File)> {
    let mem = frame::alloc().ok_or(KernelError::ResourceExhausted { resource: "frames" })?;
    let ptr = mem.as_ptr() as *mut Pipe;
    // SAFETY: a frame is 4096 bytes and page aligned, more than enough
    // room and alignment for a Pipe; write initializes it fully.
    unsafe {
        ptr.write(Pipe {
            inner: SpinLock::new("pipe", PipeInner {
                data: [0; PIPE_SIZE],
                r: 0,
                w: 0,
                read_open: true,
                write_open: true,
            }),
        });
    }
    // SAFETY: just initialized; lives until close() frees the frame.
    let pipe: &'static Pipe = unsafe { &*ptr };
    let pa = mem.leak();

    let rfile = match file::alloc(FileKind::Pipe { pipe }, true, false) {
        Ok(f) => f,
        Err(e) => {
            // SAFETY: the pipe never escaped; reclaim its frame.
            unsafe { frame::free_raw(pa) };
            return Err(e);
        }
    };
    let wfile = match file::alloc(FileKind::Pipe { pipe }, false, true) {
        Ok(f) => f,
        Err(e) => {
            // Closing the read end with the write side already marked
            // closed releases the frame.
            {
                let mut pi = pipe.inner.lock();
                pi.write_open = false;
            }
            file::close(rfile);
            return Err(e);
        }
    };

    Ok((rfile, wfile))
}
