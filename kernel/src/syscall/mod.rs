//! System-call dispatch.
//!
//! The trap frame's `a7` carries the call number, `a0..a5` the
//! arguments; the result goes back in `a0`, with every error flattened
//! to -1. Unknown numbers are logged and fail the same way.

mod file;
mod proc;

use crate::{
    cpu,
    error::{KernelError, KernelResult},
    fs::file::File,
    param::N_OFILE,
};

// Call numbers (the user-space ABI).
pub const SYS_BRK: u64 = 1;
pub const SYS_FORK: u64 = 2;
pub const SYS_WAIT: u64 = 3;
pub const SYS_EXIT: u64 = 4;
pub const SYS_SLEEP: u64 = 5;
pub const SYS_KILL: u64 = 6;
pub const SYS_GETPID: u64 = 7;
pub const SYS_READ: u64 = 8;
pub const SYS_WRITE: u64 = 9;
pub const SYS_OPEN: u64 = 10;
pub const SYS_CLOSE: u64 = 11;
pub const SYS_MKNOD: u64 = 12;
pub const SYS_EXECVE: u64 = 13;
pub const SYS_DUP: u64 = 14;
pub const SYS_MKDIR: u64 = 15;
pub const SYS_FSTAT: u64 = 16;
pub const SYS_CHDIR: u64 = 17;
pub const SYS_GETPPID: u64 = 18;
pub const SYS_LINK: u64 = 19;
pub const SYS_UNLINK: u64 = 20;
pub const SYS_PIPE: u64 = 21;
pub const SYS_SBRK: u64 = 22;
pub const SYS_SHUTDOWN: u64 = 23;
pub const SYS_LSEEK: u64 = 24;
pub const SYS_DUP2: u64 = 25;

/// Dispatch the system call named by the current trap frame.
pub fn dispatch() {
    let p = cpu::current_proc();
    // SAFETY: we are the owning process; each trap-frame borrow here is
    // scoped so the handlers below can take their own.
    let num = unsafe { p.trap_frame() }.a7;

    let ret: KernelResult<usize> = match num {
        SYS_BRK => proc::sys_brk(),
        SYS_FORK => proc::sys_fork(),
        SYS_WAIT => proc::sys_wait(),
        SYS_EXIT => proc::sys_exit(),
        SYS_SLEEP => proc::sys_sleep(),
        SYS_KILL => proc::sys_kill(),
        SYS_GETPID => proc::sys_getpid(),
        SYS_READ => file::sys_read(),
        SYS_WRITE => file::sys_write(),
        SYS_OPEN => file::sys_open(),
        SYS_CLOSE => file::sys_close(),
        SYS_MKNOD => file::sys_mknod(),
        SYS_EXECVE => file::sys_execve(),
        SYS_DUP => file::sys_dup(),
        SYS_MKDIR => file::sys_mkdir(),
        SYS_FSTAT => file::sys_fstat(),
        SYS_CHDIR => file::sys_chdir(),
        SYS_GETPPID => proc::sys_getppid(),
        SYS_LINK => file::sys_link(),
        SYS_UNLINK => file::sys_unlink(),
        SYS_PIPE => file::sys_pipe(),
        SYS_SBRK => proc::sys_sbrk(),
        SYS_SHUTDOWN => proc::sys_shutdown(),
        SYS_LSEEK => file::sys_lseek(),
        SYS_DUP2 => file::sys_dup2(),
        _ => {
            log::warn!(target: "syscall", "pid {}: unknown system call {}", p.pid(), num);
            Err(KernelError::InvalidArgument { name: "syscall" })
        }
    };

    // SAFETY: owning process, fresh short-lived borrow.
    unsafe { p.trap_frame() }.a0 = match ret {
        Ok(v) => v as u64,
        Err(_) => u64::MAX,
    };
}

/// Raw argument register `n` (0..=5).
fn arg_raw(n: usize) -> u64 {
    let p = cpu::current_proc();
    // SAFETY: we are the owning process.
    let tf = unsafe { p.trap_frame() };
    match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("syscall: argument index out of range"),
    }
}

fn arg_i32(n: usize) -> i32 {
    arg_raw(n) as i32
}

fn arg_i64(n: usize) -> i64 {
    arg_raw(n) as i64
}

fn arg_usize(n: usize) -> usize {
    arg_raw(n) as usize
}

/// Argument `n` as an open file descriptor of the current process.
fn arg_fd(n: usize) -> KernelResult<(usize, &'static File)> {
    let fd = arg_raw(n) as usize;
    if fd >= N_OFILE {
        return Err(KernelError::BadFileDescriptor);
    }
    let p = cpu::current_proc();
    // SAFETY: we are the owning process.
    let data = unsafe { p.data() };
    match data.ofile[fd] {
        Some(f) => Ok((fd, f)),
        None => Err(KernelError::BadFileDescriptor),
    }
}

/// Copy a NUL-terminated string argument from user space; returns its
/// length.
fn fetch_str(addr: u64, buf: &mut [u8]) -> KernelResult<usize> {
    let p = cpu::current_proc();
    // SAFETY: we are the owning process.
    unsafe { p.page_table() }.copy_str_in(buf, addr)
}

/// Read one user-space u64 (pointer-array element).
fn fetch_u64(addr: u64) -> KernelResult<u64> {
    let p = cpu::current_proc();
    let mut raw = [0u8; 8];
    // SAFETY: we are the owning process.
    unsafe { p.page_table() }.copy_in(&mut raw, addr)?;
    Ok(u64::from_le_bytes(raw))
}
