//! Console line discipline.
//!
//! Input arrives byte-at-a-time from the UART interrupt and accumulates
//! in an edit ring; a line becomes readable when the user hits newline
//! (or ^D, or the ring fills). Readers of the console device sleep until
//! then. Output is pass-through to the UART, buffered for user writes and
//! synchronous for kernel messages.
//!
//! Control keys: backspace/delete edits the pending line, ^D ends a read,
//! ^P dumps the process table.

use crate::{
    cpu,
    error::{KernelError, KernelResult},
    fs::file::{self, DeviceSwitch, CONSOLE},
    mm,
    proc::{self, chan},
    sync::SpinLock,
};

use super::uart;

/// Rendered as destructive backspace on the wire.
const BACKSPACE: i32 = 0x100;

const fn ctrl(c: u8) -> i32 {
    (c - b'@') as i32
}

const INPUT_SIZE: usize = 128;

struct Input {
    buf: [u8; INPUT_SIZE],
    /// Read index (first byte not yet consumed by `read`).
    r: u32,
    /// Write index (end of the last completed line).
    w: u32,
    /// Edit index (end of the line being typed).
    e: u32,
}

static CONS: SpinLock<Input> = SpinLock::new("console", Input {
    buf: [0; INPUT_SIZE],
    r: 0,
    w: 0,
    e: 0,
});

fn cons_chan() -> usize {
    chan(&CONS)
}

/// Register the console device and bring up the UART. Boot hart only.
pub fn init() {
    uart::init();
    file::register_device(CONSOLE, DeviceSwitch {
        read,
        write,
    });
}

/// Output one character on behalf of the kernel (synchronous path).
pub fn putc(c: i32) {
    if c == BACKSPACE {
        uart::putc_sync(0x08);
        uart::putc_sync(b' ');
        uart::putc_sync(0x08);
    } else {
        uart::putc_sync(c as u8);
    }
}

/// Feed one input byte from the UART interrupt through the line
/// discipline.
pub fn handle_input(c: i32) {
    let mut cons = CONS.lock();
    match c {
        c if c == ctrl(b'P') => {
            proc::dump();
        }
        0x7f => {
            // Delete: back out one byte of the pending line.
            if cons.e != cons.w {
                cons.e = cons.e.wrapping_sub(1);
                putc(BACKSPACE);
            }
        }
        _ => {
            if c != 0 && cons.e.wrapping_sub(cons.r) < INPUT_SIZE as u32 {
                let c = if c == b'\r' as i32 { b'\n' as i32 } else { c };
                putc(c);
                let e = cons.e;
                cons.buf[e as usize % INPUT_SIZE] = c as u8;
                cons.e = e.wrapping_add(1);
                if c == b'\n' as i32
                    || c == ctrl(b'D')
                    || cons.e.wrapping_sub(cons.r) == INPUT_SIZE as u32
                {
                    // Commit the line and wake readers.
                    cons.w = cons.e;
                    proc::wake_up(cons_chan());
                }
            }
        }
    }
}

/// Console device read: up to `n` bytes of committed input, stopping at
/// end-of-line. ^D terminates the read; a ^D seen after some bytes were
/// already delivered is pushed back so the *next* read returns 0.
fn read(to_user: bool, mut dst: u64, n: usize) -> KernelResult<usize> {
    let target = n;
    let mut n = n;

    let mut cons = CONS.lock();
    while n > 0 {
        while cons.r == cons.w {
            if cpu::current_proc().is_killed() {
                return Err(KernelError::Killed);
            }
            cons = proc::sleep_on(cons_chan(), cons);
        }

        let r = cons.r;
        let c = cons.buf[r as usize % INPUT_SIZE];
        cons.r = r.wrapping_add(1);

        if c as i32 == ctrl(b'D') {
            if n < target {
                // Leave the EOF for the next read. Wrapping indices make
                // this well-defined even at position zero.
                cons.r = cons.r.wrapping_sub(1);
            }
            break;
        }

        if mm::either_copy_out(to_user, dst, &[c]).is_err() {
            break;
        }

        dst += 1;
        n -= 1;

        if c == b'\n' {
            break;
        }
    }

    Ok(target - n)
}

/// Console device write: copy bytes in and hand them to the buffered
/// UART path.
fn write(from_user: bool, src: u64, n: usize) -> KernelResult<usize> {
    let mut written = 0;
    while written < n {
        let mut byte = [0u8; 1];
        if mm::either_copy_in(from_user, &mut byte, src + written as u64).is_err() {
            break;
        }
        uart::putc(byte[0]);
        written += 1;
    }
    Ok(written)
}
