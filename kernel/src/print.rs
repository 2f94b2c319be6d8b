//! Kernel print macros.
//!
//! `print!`/`println!` render through the console's synchronous output
//! path, serialized by a spinlock so multi-hart boot messages do not
//! interleave. A hart that panics while already holding the print lock
//! writes lock-free, so the dying message always gets out.

use core::{
    fmt::{self, Write},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::sync::SpinLock;

/// Sticky panic flag. Once set, buffered UART output freezes and the
/// synchronous path is the only way bytes leave the machine.
static PANICKED: AtomicBool = AtomicBool::new(false);

pub fn panicked() -> bool {
    PANICKED.load(Ordering::Relaxed)
}

pub fn set_panicked() {
    PANICKED.store(true, Ordering::Relaxed);
}

static PRINT_LOCK: SpinLock<()> = SpinLock::new("print", ());

struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            crate::dev::console::putc(byte as i32);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // A hart that panics while holding the print lock must still be able
    // to report; everyone else queues.
    if PRINT_LOCK.holding() {
        let _ = ConsoleWriter.write_fmt(args);
    } else {
        let _guard = PRINT_LOCK.lock();
        let _ = ConsoleWriter.write_fmt(args);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
