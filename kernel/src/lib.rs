//! CinnabarOS kernel library.
//!
//! A small multiprocessor Unix-like kernel for 64-bit RISC-V supervisor
//! mode on the QEMU `virt` machine: preemptive multitasking across three
//! harts, Sv39 paged virtual memory, a write-ahead-logged filesystem on a
//! virtio disk, pipes, a console, and a POSIX-flavored syscall surface.
//!
//! The crate doubles as a host library so the portable pieces (locking,
//! on-disk codecs, path handling, allocators) run under the standard test
//! harness; everything hardware-facing is confined to `arch` and swapped
//! for stubs off-target.

#![no_std]

// Host target: unit tests run under std.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod cpu;
pub mod dev;
pub mod elf;
pub mod error;
pub mod fs;
pub mod logger;
pub mod mm;
pub mod param;
pub mod proc;
pub mod sync;
pub mod syscall;
pub mod trap;
