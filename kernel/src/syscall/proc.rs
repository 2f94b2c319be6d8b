//! Process-family system calls.

use crate::{
    arch::sbi,
    cpu,
    dev::timer,
    error::KernelResult,
    proc,
};

use super::{arg_i32, arg_i64, arg_raw};

/// brk(size): set the process break to an absolute size.
pub fn sys_brk() -> KernelResult<usize> {
    proc::grow(arg_raw(0))?;
    Ok(0)
}

pub fn sys_fork() -> KernelResult<usize> {
    Ok(proc::fork()? as usize)
}

/// wait(status*): harvest a zombie child.
pub fn sys_wait() -> KernelResult<usize> {
    Ok(proc::wait(arg_raw(0))? as usize)
}

pub fn sys_exit() -> KernelResult<usize> {
    proc::exit(arg_i32(0));
}

/// sleep(ticks): interruptible timer sleep.
pub fn sys_sleep() -> KernelResult<usize> {
    timer::sleep(arg_raw(0))?;
    Ok(0)
}

pub fn sys_kill() -> KernelResult<usize> {
    proc::kill(arg_i32(0))?;
    Ok(0)
}

pub fn sys_getpid() -> KernelResult<usize> {
    Ok(cpu::current_proc().pid() as usize)
}

pub fn sys_getppid() -> KernelResult<usize> {
    Ok(proc::parent_pid(cpu::current_proc()) as usize)
}

/// sbrk(delta): adjust the break by a signed amount, returning the old
/// break.
pub fn sys_sbrk() -> KernelResult<usize> {
    let delta = arg_i64(0);
    let p = cpu::current_proc();
    // SAFETY: we are the owning process.
    let old = unsafe { p.data() }.size;
    if delta == 0 {
        return Ok(old as usize);
    }
    let new = if delta < 0 {
        old.checked_sub((-delta) as u64)
            .ok_or(crate::error::KernelError::InvalidArgument { name: "increment" })?
    } else {
        old + delta as u64
    };
    proc::grow(new)?;
    Ok(old as usize)
}

pub fn sys_shutdown() -> KernelResult<usize> {
    log::info!(target: "kernel", "shutdown requested");
    sbi::shutdown();
}
