//! 16550 UART driver.
//!
//! Two output paths: a small interrupt-driven transmit ring for normal
//! console writes (writers sleep when it fills), and a polled synchronous
//! path for kernel messages and panics. Input bytes are drained in the
//! interrupt handler and fed to the console line discipline.

use crate::{
    cpu,
    mm::layout::UART0,
    print,
    proc::{self, chan},
    sync::SpinLock,
};

// Register offsets (some share an address depending on access mode).
const RHR: usize = 0; // receive holding
const THR: usize = 0; // transmit holding
const DLL: usize = 0; // divisor latch low
const IER: usize = 1; // interrupt enable
const DLM: usize = 1; // divisor latch high
const FCR: usize = 2; // FIFO control
const LCR: usize = 3; // line control
const LSR: usize = 5; // line status

const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1;
const LCR_EIGHT_BITS: u8 = 3 << 0;
const LCR_BAUD_LATCH: u8 = 1 << 7;
const LSR_RX_READY: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

#[inline]
fn read_reg(reg: usize) -> u8 {
    // SAFETY: the UART MMIO page is mapped R|W in the kernel table;
    // volatile is required for device registers.
    unsafe { core::ptr::read_volatile((UART0 as usize + reg) as *const u8) }
}

#[inline]
fn write_reg(reg: usize, value: u8) {
    // SAFETY: as above.
    unsafe { core::ptr::write_volatile((UART0 as usize + reg) as *mut u8, value) }
}

const TX_BUF_SIZE: usize = 32;

struct TxRing {
    buf: [u8; TX_BUF_SIZE],
    /// Read index; free-running, reduced mod TX_BUF_SIZE at access.
    r: u32,
    /// Write index.
    w: u32,
}

static TX: SpinLock<TxRing> = SpinLock::new("uart", TxRing {
    buf: [0; TX_BUF_SIZE],
    r: 0,
    w: 0,
});

/// Program the device: 38.4K baud, 8N1, FIFOs on, rx+tx interrupts.
pub fn init() {
    write_reg(IER, 0x00);
    write_reg(LCR, LCR_BAUD_LATCH);
    write_reg(DLL, 0x03);
    write_reg(DLM, 0x00);
    write_reg(LCR, LCR_EIGHT_BITS);
    write_reg(FCR, FCR_FIFO_CLEAR | FCR_FIFO_ENABLE);
    write_reg(IER, IER_RX_ENABLE | IER_TX_ENABLE);
}

/// Push buffered bytes into the transmit holding register until the ring
/// empties or the device stalls. Called with the tx lock held, from both
/// writers and the interrupt handler.
fn start(tx: &mut TxRing) {
    loop {
        if tx.w == tx.r {
            break;
        }
        if read_reg(LSR) & LSR_TX_IDLE == 0 {
            // Device busy; it will interrupt when ready for more.
            break;
        }
        let c = tx.buf[tx.r as usize % TX_BUF_SIZE];
        tx.r = tx.r.wrapping_add(1);
        // A writer may be waiting for ring space.
        proc::wake_up(tx_chan());
        write_reg(THR, c);
    }
}

fn tx_chan() -> usize {
    chan(&TX)
}

/// Buffered output byte; sleeps while the ring is full. Process context
/// only; the sync path below is for interrupt and panic use.
pub fn putc(c: u8) {
    let mut tx = TX.lock();

    if print::panicked() {
        loop {
            core::hint::spin_loop();
        }
    }

    while tx.w.wrapping_sub(tx.r) as usize == TX_BUF_SIZE {
        tx = proc::sleep_on(tx_chan(), tx);
    }
    let w = tx.w;
    tx.buf[w as usize % TX_BUF_SIZE] = c;
    tx.w = w.wrapping_add(1);
    start(&mut tx);
}

/// Synchronous output byte: poll the device directly. Used by kernel
/// printing and the panic path; spins forever on a panicked machine that
/// is not this hart's problem to unwedge.
pub fn putc_sync(c: u8) {
    cpu::push_off();

    if print::panicked() {
        loop {
            core::hint::spin_loop();
        }
    }

    while read_reg(LSR) & LSR_TX_IDLE == 0 {
        core::hint::spin_loop();
    }
    write_reg(THR, c);

    cpu::pop_off();
}

/// One input byte, or `None` if the receive FIFO is empty.
fn getc() -> Option<u8> {
    if read_reg(LSR) & LSR_RX_READY != 0 {
        Some(read_reg(RHR))
    } else {
        None
    }
}

/// UART interrupt: drain input into the console, then restart transmit.
pub fn handle_intr() {
    while let Some(c) = getc() {
        crate::dev::console::handle_input(c as i32);
    }

    let mut tx = TX.lock();
    start(&mut tx);
}
