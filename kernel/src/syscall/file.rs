//! File-family system calls.

use crate::{
    cpu,
    error::{KernelError, KernelResult},
    fs::{
        file::{self, File, FileKind},
        inode::{ialloc, namei, namei_parent, InodeType, Iref},
        log, path, pipe, DIR_NAME_SIZE,
    },
    mm::{frame, layout::PAGE_SIZE},
    param::{MAX_ARGS, MAX_ENVS, MAX_PATH, N_DEV, N_OFILE},
    proc::exec::{self, ArgBlock},
};

use super::{arg_fd, arg_i32, arg_i64, arg_raw, arg_usize, fetch_str, fetch_u64};

// open(2) mode flags.
const O_RDONLY: i32 = 0x000;
const O_WRONLY: i32 = 0x001;
const O_RDWR: i32 = 0x002;
const O_CREAT: i32 = 0x200;
const O_TRUNC: i32 = 0x400;
const O_APPEND: i32 = 0x800;

/// Install `f` in the first free descriptor slot of the current process.
fn fd_alloc(f: &'static File) -> KernelResult<usize> {
    let p = cpu::current_proc();
    // SAFETY: we are the owning process.
    let data = unsafe { p.data() };
    for (fd, slot) in data.ofile.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(f);
            return Ok(fd);
        }
    }
    Err(KernelError::ResourceExhausted { resource: "file descriptors" })
}

fn fetch_path(n: usize) -> KernelResult<([u8; MAX_PATH], usize)> {
    let mut path = [0u8; MAX_PATH];
    let len = fetch_str(arg_raw(n), &mut path)?;
    Ok((path, len))
}

pub fn sys_read() -> KernelResult<usize> {
    let (_, f) = arg_fd(0)?;
    file::read(f, arg_raw(1), arg_usize(2))
}

pub fn sys_write() -> KernelResult<usize> {
    let (_, f) = arg_fd(0)?;
    file::write(f, arg_raw(1), arg_usize(2))
}

/// Create an inode at `path`. For an existing final component: reopening
/// a file (or device) as a file is allowed, anything else fails.
/// Transaction context required. The returned inode is unlocked.
fn create(path: &[u8], type_: InodeType, major: u16, minor: u16) -> KernelResult<Iref> {
    let mut name = [0u8; DIR_NAME_SIZE];
    let parent = namei_parent(path, &mut name).ok_or(KernelError::NotFound)?;

    let mut pg = parent.lock();

    if let Some((child, _)) = pg.dir_lookup(&name) {
        drop(pg);
        let cg = child.lock();
        let ok = type_ == InodeType::File
            && matches!(cg.type_(), InodeType::File | InodeType::Device);
        drop(cg);
        if ok {
            return Ok(child);
        }
        return Err(KernelError::AlreadyExists);
    }

    let child = ialloc(parent.dev(), type_)?;
    let mut cg = child.lock();
    {
        let d = cg.disk_mut();
        d.major = major;
        d.minor = minor;
        d.nlink = 1;
    }
    cg.update();

    // Creation failed after allocation: zero the link count so the
    // final put reclaims the inode.
    fn undo(mut cg: crate::fs::inode::InodeGuard<'_>) {
        cg.disk_mut().nlink = 0;
        cg.update();
    }

    if type_ == InodeType::Dir {
        // "." and "..". The parent gains a link from "..".
        let dot = path::name_from_bytes(b".");
        let dotdot = path::name_from_bytes(b"..");
        if cg.dir_link(&dot, child.ino()).is_err()
            || cg.dir_link(&dotdot, parent.ino()).is_err()
        {
            undo(cg);
            return Err(KernelError::Corrupted { what: "new directory" });
        }
    }

    if pg.dir_link(&name, child.ino()).is_err() {
        undo(cg);
        return Err(KernelError::Corrupted { what: "directory" });
    }

    if type_ == InodeType::Dir {
        pg.disk_mut().nlink += 1; // ".."
        pg.update();
    }

    drop(cg);
    drop(pg);
    Ok(child)
}

pub fn sys_open() -> KernelResult<usize> {
    let (pathbuf, len) = fetch_path(0)?;
    let path = &pathbuf[..len];
    let omode = arg_i32(1);

    log::begin_op();

    let result = (|| {
        let ip = if omode & O_CREAT != 0 {
            create(path, InodeType::File, 0, 0)?
        } else {
            namei(path).ok_or(KernelError::NotFound)?
        };

        let mut g = ip.lock();
        if g.type_() == InodeType::Dir && omode != O_RDONLY {
            return Err(KernelError::InvalidOperation);
        }
        if g.type_() == InodeType::Device && g.major() as usize >= N_DEV {
            return Err(KernelError::InvalidOperation);
        }

        if omode & O_TRUNC != 0 && g.type_() == InodeType::File {
            g.trunc();
        }

        let type_ = g.type_();
        let size = g.size();
        let major = g.major();
        drop(g);

        let readable = omode & O_WRONLY == 0;
        let writable = (omode & O_WRONLY != 0) || (omode & O_RDWR != 0);
        let kind = match type_ {
            InodeType::Device => FileKind::Device { ip, major },
            _ => FileKind::Inode { ip },
        };

        // On failure the kind (and with it the inode reference) is
        // dropped, undoing everything.
        let f = file::alloc(kind, readable, writable)?;
        let fd = match fd_alloc(f) {
            Ok(fd) => fd,
            Err(e) => {
                file::close(f);
                return Err(e);
            }
        };

        if omode & O_APPEND != 0 && type_ == InodeType::File {
            file::set_off(f, size);
        }

        Ok(fd)
    })();

    log::end_op();
    result
}

pub fn sys_close() -> KernelResult<usize> {
    let (fd, f) = arg_fd(0)?;
    let p = cpu::current_proc();
    // SAFETY: we are the owning process.
    unsafe { p.data() }.ofile[fd] = None;
    file::close(f);
    Ok(0)
}

pub fn sys_mkdir() -> KernelResult<usize> {
    let (pathbuf, len) = fetch_path(0)?;
    log::begin_op();
    let result = create(&pathbuf[..len], InodeType::Dir, 0, 0).map(|ip| {
        drop(ip);
        0
    });
    log::end_op();
    result
}

pub fn sys_mknod() -> KernelResult<usize> {
    let (pathbuf, len) = fetch_path(0)?;
    let major = arg_raw(1) as u16;
    let minor = arg_raw(2) as u16;
    log::begin_op();
    let result = create(&pathbuf[..len], InodeType::Device, major, minor).map(|ip| {
        drop(ip);
        0
    });
    log::end_op();
    result
}

pub fn sys_fstat() -> KernelResult<usize> {
    let (_, f) = arg_fd(0)?;
    file::stat(f, arg_raw(1))?;
    Ok(0)
}

pub fn sys_chdir() -> KernelResult<usize> {
    let (pathbuf, len) = fetch_path(0)?;
    let p = cpu::current_proc();

    log::begin_op();
    let result = (|| {
        let ip = namei(&pathbuf[..len]).ok_or(KernelError::NotFound)?;
        let g = ip.lock();
        if g.type_() != InodeType::Dir {
            return Err(KernelError::InvalidOperation);
        }
        drop(g);
        // SAFETY: we are the owning process. The old cwd is put inside
        // this transaction.
        let old = unsafe { p.data() }.cwd.replace(ip);
        drop(old);
        Ok(0)
    })();
    log::end_op();
    result
}

pub fn sys_dup() -> KernelResult<usize> {
    let (_, f) = arg_fd(0)?;
    let fd = fd_alloc(f)?;
    file::dup(f);
    Ok(fd)
}

/// POSIX dup2: duplicate oldfd onto newfd, closing whatever newfd held.
pub fn sys_dup2() -> KernelResult<usize> {
    let (oldfd, f) = arg_fd(0)?;
    let newfd = arg_i32(1);
    if newfd < 0 || newfd as usize >= N_OFILE {
        return Err(KernelError::BadFileDescriptor);
    }
    let newfd = newfd as usize;
    if newfd == oldfd {
        return Ok(newfd);
    }

    let p = cpu::current_proc();
    // SAFETY: we are the owning process.
    let data = unsafe { p.data() };
    if let Some(old) = data.ofile[newfd].take() {
        file::close(old);
    }
    data.ofile[newfd] = Some(file::dup(f));
    Ok(newfd)
}

pub fn sys_link() -> KernelResult<usize> {
    let (oldbuf, oldlen) = fetch_path(0)?;
    let (newbuf, newlen) = fetch_path(1)?;

    log::begin_op();
    let result = (|| {
        let ip = namei(&oldbuf[..oldlen]).ok_or(KernelError::NotFound)?;

        let mut g = ip.lock();
        if g.type_() == InodeType::Dir {
            return Err(KernelError::InvalidOperation);
        }
        g.disk_mut().nlink += 1;
        g.update();
        drop(g);

        let mut name = [0u8; DIR_NAME_SIZE];
        let linked = (|| {
            let parent = namei_parent(&newbuf[..newlen], &mut name)
                .ok_or(KernelError::NotFound)?;
            let mut pg = parent.lock();
            pg.dir_link(&name, ip.ino())?;
            drop(pg);
            Ok(())
        })();

        if let Err(e) = linked {
            let mut g = ip.lock();
            g.disk_mut().nlink -= 1;
            g.update();
            drop(g);
            return Err(e);
        }
        Ok(0)
    })();
    log::end_op();
    result
}

pub fn sys_unlink() -> KernelResult<usize> {
    let (pathbuf, len) = fetch_path(0)?;

    log::begin_op();
    let result = (|| {
        let mut name = [0u8; DIR_NAME_SIZE];
        let parent = namei_parent(&pathbuf[..len], &mut name).ok_or(KernelError::NotFound)?;

        // "." and ".." cannot be unlinked.
        if name == path::name_from_bytes(b".") || name == path::name_from_bytes(b"..") {
            return Err(KernelError::InvalidOperation);
        }

        let mut pg = parent.lock();
        let Some((ip, off)) = pg.dir_lookup(&name) else {
            return Err(KernelError::NotFound);
        };

        let mut g = ip.lock();
        if g.disk_mut().nlink < 1 {
            panic!("unlink: inode with no links");
        }
        if g.type_() == InodeType::Dir && !g.dir_is_empty() {
            return Err(KernelError::InvalidOperation);
        }

        pg.dir_erase(off)?;
        if g.type_() == InodeType::Dir {
            // The child's ".." no longer references the parent.
            pg.disk_mut().nlink -= 1;
            pg.update();
        }
        drop(pg);

        g.disk_mut().nlink -= 1;
        g.update();
        drop(g);

        Ok(0)
    })();
    log::end_op();
    result
}

pub fn sys_pipe() -> KernelResult<usize> {
    let fd_array = arg_raw(0);
    let p = cpu::current_proc();

    let (rfile, wfile) = pipe::alloc()?;

    let undo = |fd0: Option<usize>, fd1: Option<usize>| {
        // SAFETY: we are the owning process.
        let data = unsafe { p.data() };
        if let Some(fd) = fd0 {
            data.ofile[fd] = None;
        }
        if let Some(fd) = fd1 {
            data.ofile[fd] = None;
        }
        file::close(rfile);
        file::close(wfile);
    };

    let fd0 = match fd_alloc(rfile) {
        Ok(fd) => fd,
        Err(e) => {
            undo(None, None);
            return Err(e);
        }
    };
    let fd1 = match fd_alloc(wfile) {
        Ok(fd) => fd,
        Err(e) => {
            undo(Some(fd0), None);
            return Err(e);
        }
    };

    let mut raw = [0u8; 8];
    raw[0..4].copy_from_slice(&(fd0 as i32).to_le_bytes());
    raw[4..8].copy_from_slice(&(fd1 as i32).to_le_bytes());
    // SAFETY: we are the owning process.
    if unsafe { p.page_table() }.copy_out(fd_array, &raw).is_err() {
        undo(Some(fd0), Some(fd1));
        return Err(KernelError::BadAddress { addr: fd_array });
    }

    Ok(0)
}

pub fn sys_lseek() -> KernelResult<usize> {
    let (_, f) = arg_fd(0)?;
    let offset = arg_i64(1);
    let whence = arg_i32(2);
    Ok(file::lseek(f, offset, whence)? as usize)
}

/// Stage one NUL-terminated pointer array's strings into kernel pages.
fn fetch_arg_block(uaddr: u64, limit: usize) -> KernelResult<ArgBlock> {
    let mut block = ArgBlock::new();
    for i in 0..=limit {
        let str_addr = fetch_u64(uaddr + (i * 8) as u64)?;
        if str_addr == 0 {
            return Ok(block);
        }
        if i == limit {
            break;
        }
        let page = frame::alloc()
            .ok_or(KernelError::ResourceExhausted { resource: "frames" })?;
        {
            // SAFETY: the frame is exclusively ours and page-sized.
            let buf = unsafe { core::slice::from_raw_parts_mut(page.as_ptr(), PAGE_SIZE) };
            fetch_str(str_addr, buf)?;
        }
        block.push(page)?;
    }
    Err(KernelError::InvalidArgument { name: "argument list" })
}

pub fn sys_execve() -> KernelResult<usize> {
    let (pathbuf, len) = fetch_path(0)?;
    // Both blocks free their staged pages on drop, success or failure.
    let argv = fetch_arg_block(arg_raw(1), MAX_ARGS)?;
    let env = fetch_arg_block(arg_raw(2), MAX_ENVS)?;
    exec::execve(&pathbuf[..len], &argv, &env)
}
