//! `execve`: replace the current process image.
//!
//! The new image is built into a fresh page table while the old one
//! keeps running; only after the ELF is fully loaded and the argument
//! stack built does the process commit to it. Any failure on the way
//! leaves the caller exactly as it was.

use crate::{
    cpu,
    elf::{ElfHeader, ProgHeader, SegFlags, ELF_HEADER_SIZE, PROG_HEADER_SIZE, PT_LOAD},
    error::{KernelError, KernelResult},
    fs::{
        inode::{namei, InodeGuard},
        log,
    },
    mm::{
        self, frame,
        layout::{PAGE_SIZE, USER_STACK_BASE, USER_STACK_TOP},
        page_table::{PageTable, PteFlags},
    },
    param::MAX_ARGS,
};

/// Staged argument strings: one borrowed frame per string, freed on drop
/// whichever way the exec goes.
pub struct ArgBlock {
    pages: [Option<frame::Frame>; MAX_ARGS],
    count: usize,
}

impl ArgBlock {
    pub const fn new() -> Self {
        Self {
            pages: [const { None }; MAX_ARGS],
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Append one string (NUL-terminated inside a fresh frame).
    pub fn push(&mut self, page: frame::Frame) -> KernelResult<()> {
        if self.count >= MAX_ARGS {
            return Err(KernelError::InvalidArgument { name: "argv" });
        }
        self.pages[self.count] = Some(page);
        self.count += 1;
        Ok(())
    }

    /// The `i`-th string including its NUL terminator.
    fn str_bytes(&self, i: usize) -> &[u8] {
        let page = match self.pages[i].as_ref() {
            Some(p) => p,
            None => panic!("exec: argument index out of range"),
        };
        // SAFETY: the frame holds a NUL-terminated string written by
        // copy_str_in, which bounds it to the page.
        let bytes = unsafe { core::slice::from_raw_parts(page.as_ptr(), PAGE_SIZE) };
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(PAGE_SIZE - 1);
        &bytes[..len + 1]
    }
}

impl Default for ArgBlock {
    fn default() -> Self {
        Self::new()
    }
}

fn seg_perm(flags: SegFlags) -> PteFlags {
    let mut perm = PteFlags::empty();
    if flags.contains(SegFlags::EXEC) {
        perm |= PteFlags::X;
    }
    if flags.contains(SegFlags::WRITE) {
        perm |= PteFlags::W;
    }
    perm
}

/// Copy `filesz` bytes of a segment from the file into the pages just
/// mapped at `va`; the tail up to `memsz` stays zero because the frames
/// came zeroed.
fn load_segment(
    pt: &PageTable,
    va: u64,
    ip: &mut InodeGuard,
    off: u64,
    filesz: u64,
) -> KernelResult<()> {
    let mut i = 0;
    while i < filesz {
        let pa = match pt.walk_addr(va + i) {
            Some(pa) => pa,
            None => panic!("exec: loading into an unmapped page"),
        };
        let n = (filesz - i).min(PAGE_SIZE as u64) as usize;
        let read = ip.readi(false, pa, (off + i) as u32, n)?;
        if read != n {
            return Err(KernelError::Corrupted { what: "elf segment" });
        }
        i += PAGE_SIZE as u64;
    }
    Ok(())
}

/// Resolve the binary and build its image in a fresh page table.
/// Returns (table, image size, entry point).
fn load_image(path: &[u8], trap_frame_pa: u64) -> KernelResult<(PageTable, u64, u64)> {
    log::begin_op();

    let Some(ip) = namei(path) else {
        log::end_op();
        return Err(KernelError::NotFound);
    };

    let result = (|| {
        let mut g = ip.lock();

        let mut hdr = [0u8; ELF_HEADER_SIZE];
        if g.readi(false, hdr.as_mut_ptr() as u64, 0, ELF_HEADER_SIZE)? != ELF_HEADER_SIZE {
            return Err(KernelError::Corrupted { what: "elf header" });
        }
        let elf = ElfHeader::decode(&hdr)?;

        let mut pt = mm::new_user_table(trap_frame_pa)?;
        let mut size = 0u64;

        for i in 0..elf.phnum as u64 {
            let mut raw = [0u8; PROG_HEADER_SIZE];
            let off = elf.phoff + i * PROG_HEADER_SIZE as u64;
            let got = g.readi(false, raw.as_mut_ptr() as u64, off as u32, PROG_HEADER_SIZE);
            match got {
                Ok(n) if n == PROG_HEADER_SIZE => {}
                _ => {
                    mm::free_user_table(pt, size);
                    return Err(KernelError::Corrupted { what: "program header" });
                }
            }
            let ph = ProgHeader::decode(&raw);
            if ph.type_ != PT_LOAD {
                continue;
            }
            if let Err(e) = ph.validate_load() {
                mm::free_user_table(pt, size);
                return Err(e);
            }
            match pt.uvm_alloc(size, ph.vaddr + ph.memsz, seg_perm(ph.flags)) {
                Ok(new) => size = new,
                Err(e) => {
                    mm::free_user_table(pt, size);
                    return Err(e);
                }
            }
            if let Err(e) = load_segment(&pt, ph.vaddr, &mut g, ph.off, ph.filesz) {
                mm::free_user_table(pt, size);
                return Err(e);
            }
        }

        Ok((pt, size, elf.entry))
    })();

    drop(ip);
    log::end_op();
    result
}

/// Push the strings of `args` below `sp`, then the NUL-terminated
/// pointer array. Returns the new stack pointer, which is also the
/// address of the array.
fn push_args(pt: &PageTable, mut sp: u64, args: &ArgBlock) -> KernelResult<u64> {
    let mut addrs = [0u64; MAX_ARGS + 1];

    for i in 0..args.count() {
        let bytes = args.str_bytes(i);
        sp -= bytes.len() as u64;
        sp -= sp % 16;
        if sp < USER_STACK_BASE {
            return Err(KernelError::InvalidArgument { name: "argv" });
        }
        pt.copy_out(sp, bytes)?;
        addrs[i] = sp;
    }
    addrs[args.count()] = 0;

    let table_bytes = (args.count() + 1) * core::mem::size_of::<u64>();
    sp -= table_bytes as u64;
    sp -= sp % 16;
    if sp < USER_STACK_BASE {
        return Err(KernelError::InvalidArgument { name: "argv" });
    }
    let mut raw = [0u8; (MAX_ARGS + 1) * 8];
    for (i, a) in addrs[..=args.count()].iter().enumerate() {
        raw[i * 8..i * 8 + 8].copy_from_slice(&a.to_le_bytes());
    }
    pt.copy_out(sp, &raw[..table_bytes])?;

    Ok(sp)
}

/// Replace the current image with `path`, passing `argv` and `env`.
/// Returns argc (delivered to the user in a0 by the syscall return).
pub fn execve(path: &[u8], argv: &ArgBlock, env: &ArgBlock) -> KernelResult<usize> {
    let p = cpu::current_proc();
    // SAFETY: we are the owning process; this borrow ends before
    // load_image, whose path resolution may re-derive our data.
    let tf_pa = {
        let data = unsafe { p.data() };
        match data.trap_frame.as_ref() {
            Some(f) => f.addr(),
            None => panic!("exec: process has no trap frame"),
        }
    };

    let (new_pt, new_size, entry) = load_image(path, tf_pa)?;

    // Build the user stack in the new image: argv strings and array
    // first, then the environment, each 16-byte aligned.
    let built = (|| {
        let uargv = push_args(&new_pt, USER_STACK_TOP, argv)?;
        let uenv = push_args(&new_pt, uargv, env)?;
        Ok((uargv, uenv))
    })();
    let (uargv, uenv) = match built {
        Ok(v) => v,
        Err(e) => {
            mm::free_user_table(new_pt, new_size);
            return Err(e);
        }
    };

    // Name the process after the binary.
    let base = path
        .rsplit(|&b| b == b'/')
        .find(|part| !part.is_empty())
        .unwrap_or(path);
    // SAFETY: owning process; no other data borrow is live.
    let data = unsafe { p.data() };
    data.name = [0; 16];
    let n = base.len().min(data.name.len());
    data.name[..n].copy_from_slice(&base[..n]);

    // Commit: swap in the new image and free the old one. The stack
    // pointer lands on the environment array, with argv's just above.
    let old_size = data.size;
    let old_pt = data.page_table.replace(new_pt);
    data.size = new_size;

    // SAFETY: owning process; the previous data borrow is finished.
    {
        let tf = unsafe { p.trap_frame() };
        tf.a1 = uargv;
        tf.a2 = uenv;
        tf.epc = entry;
        tf.sp = uenv;
    }

    if let Some(old) = old_pt {
        mm::free_user_table(old, old_size);
    }

    Ok(argv.count())
}
