//! Kernel binary: hart bring-up.
//!
//! OpenSBI starts one hart at `_entry` (arch::entry); the first one
//! through performs all global initialization, creates the init process
//! and wakes the remaining harts via SBI HSM, then everyone settles into
//! the per-hart scheduler loop.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use core::sync::atomic::{fence, AtomicBool, Ordering};

    use cinnabar_kernel::{
        arch::{self, plic, sbi},
        dev::{console, virtio},
        fs::buf,
        logger,
        mm::{frame, kvm},
        param::N_CPU,
        print, println, proc, trap,
    };

    /// Set once global initialization is complete; secondary harts spin
    /// on it before touching any shared state.
    static STARTED: AtomicBool = AtomicBool::new(false);

    /// Claimed by the first hart to arrive.
    static FIRST: AtomicBool = AtomicBool::new(true);

    #[no_mangle]
    pub extern "Rust" fn kernel_main() -> ! {
        if FIRST.swap(false, Ordering::AcqRel) {
            console::init();
            logger::init();
            println!();
            log::info!(target: "kernel", "cinnabar is booting");
            log::info!(target: "kernel", "hart {} starting", arch::hart_id());

            frame::init();
            kvm::init();
            kvm::init_hart();
            proc::init();
            trap::init_hart();
            plic::init();
            plic::init_hart();
            buf::init();
            virtio::init();
            proc::user_init();

            fence(Ordering::SeqCst);
            STARTED.store(true, Ordering::Release);
            wake_other_harts();
        } else {
            while !STARTED.load(Ordering::Acquire) {
                core::hint::spin_loop();
            }
            log::info!(target: "kernel", "hart {} starting", arch::hart_id());
            kvm::init_hart();
            trap::init_hart();
            plic::init_hart();
        }

        proc::scheduler()
    }

    /// Ask the SBI to start every other hart at the boot entry.
    fn wake_other_harts() {
        let me = arch::hart_id();
        for id in 0..N_CPU {
            if id != me {
                sbi::hart_start(id, arch::boot_entry_addr(), 0);
            }
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        println!("panic: {}", info);
        print::set_panicked();
        loop {
            core::hint::spin_loop();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
