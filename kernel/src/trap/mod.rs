//! Trap dispatch.
//!
//! Two entry paths: kernel-mode traps vector straight onto the current
//! kernel stack (`kernel_trap_handler`, reached from the kernelvec asm),
//! while user-mode traps come through the trampoline, which spills user
//! state into the process's trap-frame page and calls
//! `user_trap_handler` with the kernel page table installed.
//!
//! Timer interrupts drive preemption on both paths; external interrupts
//! are claimed from the PLIC and routed to the UART or the disk.

use crate::{
    arch::{self, plic},
    cpu,
    dev::{timer, uart, virtio},
    mm::{
        kvm,
        layout::{UART0_IRQ, VIRTIO0_IRQ},
    },
    proc,
};

/// Per-process trap frame, one page, mapped at TRAP_FRAME in user space.
///
/// The layout is shared with the trampoline assembly, which addresses
/// fields by byte offset; the assertions below keep the two in sync.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    /// Kernel page table (satp value). Staged by `user_trap_return`.
    pub kernel_satp: u64,
    /// Top of this process's kernel stack.
    pub kernel_sp: u64,
    /// Address of `user_trap_handler`.
    pub kernel_trap: u64,
    /// Saved kernel `tp` (hart id).
    pub kernel_hartid: u64,
    /// Saved user program counter.
    pub epc: u64,
    pub ra: u64,
    pub sp: u64,
    pub gp: u64,
    pub tp: u64,
    pub t0: u64,
    pub t1: u64,
    pub t2: u64,
    pub s0: u64,
    pub s1: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
    pub a6: u64,
    pub a7: u64,
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
    pub t3: u64,
    pub t4: u64,
    pub t5: u64,
    pub t6: u64,
}

// The trampoline stores registers at these offsets.
const _: () = {
    assert!(core::mem::offset_of!(TrapFrame, kernel_satp) == 0);
    assert!(core::mem::offset_of!(TrapFrame, kernel_sp) == 8);
    assert!(core::mem::offset_of!(TrapFrame, kernel_trap) == 16);
    assert!(core::mem::offset_of!(TrapFrame, kernel_hartid) == 24);
    assert!(core::mem::offset_of!(TrapFrame, epc) == 32);
    assert!(core::mem::offset_of!(TrapFrame, ra) == 40);
    assert!(core::mem::offset_of!(TrapFrame, a0) == 112);
    assert!(core::mem::offset_of!(TrapFrame, a7) == 168);
    assert!(core::mem::offset_of!(TrapFrame, t6) == 280);
    assert!(core::mem::size_of::<TrapFrame>() <= crate::mm::layout::PAGE_SIZE);
};

/// Per-hart trap setup: kernel vector, first timer shot, interrupts on.
pub fn init_hart() {
    arch::install_kernel_vector();
    timer::init_hart();
    arch::intr_on();
}

/// Claim and dispatch one external interrupt.
fn external_intr() {
    let Some(irq) = plic::claim() else {
        return;
    };
    match irq {
        UART0_IRQ => uart::handle_intr(),
        VIRTIO0_IRQ => virtio::handle_intr(),
        other => crate::println!("trap: unexpected external irq {}", other),
    }
    plic::complete(irq);
}

/// Traps taken while already in the kernel. Interrupts only; a kernel
/// exception is unrecoverable.
#[no_mangle]
extern "C" fn kernel_trap_handler() {
    let sepc = arch::trap_epc();
    let sstatus = arch::read_sstatus();
    let cause = arch::trap_cause();

    if !arch::trap_from_supervisor() {
        panic!("kernel trap not from S-mode");
    }
    if arch::intr_get() {
        panic!("kernel trap with interrupts enabled");
    }

    match cause {
        arch::SCAUSE_TIMER => {
            timer::handle_intr();
            // Preempt kernel code that was running without locks (the
            // scheduler itself has no current process).
            if cpu::running_proc().is_some() {
                proc::yield_now();
            }
        }
        arch::SCAUSE_EXTERNAL => external_intr(),
        _ => {
            crate::println!("scause={:#x} stval={:#x}", cause, arch::trap_value());
            panic!("unexpected kernel trap");
        }
    }

    // A yield may have run other processes and taken other traps; put
    // back the CSRs this trap entry saved.
    arch::set_trap_epc(sepc);
    arch::write_sstatus(sstatus);
}

/// Traps from user mode, entered via the trampoline.
#[no_mangle]
pub extern "C" fn user_trap_handler() -> ! {
    if arch::trap_from_supervisor() {
        panic!("user trap from S-mode");
    }

    // We are off the trampoline now; further traps are kernel traps.
    arch::install_kernel_vector();

    let p = cpu::current_proc();
    // SAFETY: we are the owning process; the borrow ends before anything
    // below re-derives the trap frame.
    unsafe { p.trap_frame() }.epc = arch::trap_epc();

    let cause = arch::trap_cause();
    match cause {
        arch::SCAUSE_TIMER => {
            timer::handle_intr();
            proc::yield_now();
        }
        arch::SCAUSE_EXTERNAL => external_intr(),
        arch::SCAUSE_ECALL_USER => {
            if p.is_killed() {
                proc::exit(1);
            }
            // Resume after the ecall instruction.
            // SAFETY: owning process, short-lived borrow.
            unsafe { p.trap_frame() }.epc += 4;
            arch::intr_on();
            crate::syscall::dispatch();
        }
        _ => {
            log::warn!(target: "trap",
                "pid {}: unexpected trap, scause={:#x} stval={:#x}",
                p.pid(), cause, arch::trap_value()
            );
            p.set_killed();
        }
    }

    if p.is_killed() {
        proc::exit(1);
    }

    user_trap_return();
}

/// Stage the trap frame for the next user trap and jump to user mode
/// through the trampoline.
pub fn user_trap_return() -> ! {
    let p = cpu::current_proc();

    // From here to the sret we run with the user vector installed;
    // interrupts must wait until user mode.
    arch::intr_off();
    arch::install_user_vector();

    // SAFETY: we are the owning process; the borrow ends before the
    // page-table access below.
    let epc = {
        let tf = unsafe { p.trap_frame() };
        tf.kernel_satp = kvm::kernel_satp();
        tf.kernel_sp = p.kstack_top();
        tf.kernel_trap = user_trap_handler as usize as u64;
        tf.kernel_hartid = arch::hart_id() as u64;
        tf.epc
    };

    arch::prepare_user_return();
    arch::set_trap_epc(epc);

    // SAFETY: we are the owning process.
    let satp = unsafe { p.page_table() }.satp();

    let userret = arch::trampoline::userret_va() as usize;
    // SAFETY: the trampoline's return thunk is mapped R|X at this
    // address in the kernel table and expects the user satp in a0; it
    // never returns.
    let userret: extern "C" fn(u64) -> ! = unsafe { core::mem::transmute(userret) };
    userret(satp)
}
