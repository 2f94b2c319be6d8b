//! Processes and scheduling.
//!
//! A fixed table of process slots, a per-hart scheduler loop, and the
//! sleep/wake rendezvous everything else blocks on.
//!
//! Locking: each slot's `inner` spinlock protects its state machine
//! (state, wait channel, killed flag, exit status); the global wait lock
//! protects every parent link; `data` is the process-private half
//! (page table, trap frame, saved context, open files), touched only by
//! the owning process, or during allocation/teardown while the slot is
//! provably unshared.
//!
//! The scheduler handshake: whoever holds a process's `inner` lock at a
//! `context_switch` hands it, still locked, to the code that resumes on
//! the other stack, which releases it. Guard objects cross kernel stacks
//! parked in suspended frames; `fork_return` releases by hand the one
//! acquisition that has no guard on its (brand new) stack.

pub mod exec;
pub mod pid;

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering},
};

use crate::{
    arch::{self, Context},
    cpu,
    error::{KernelError, KernelResult},
    fs::{
        self,
        file::{self, File},
        inode::Iref,
    },
    mm::{
        self, frame,
        layout::{kernel_stack, PAGE_SIZE, USER_STACK_TOP},
        page_table::{PageTable, PteFlags},
    },
    param::{N_OFILE, N_PROC, ROOT_DEV},
    sync::{SpinLock, SpinLockGuard},
    trap::{self, TrapFrame},
};

/// Address-token wait channel for a pinned (static or frame-resident)
/// object. Identity is the object's address, so `chan(x) == chan(x)`
/// holds across processes for the object's whole lifetime.
pub fn chan<T: ?Sized>(x: &T) -> usize {
    x as *const T as *const () as usize
}

/// Process states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Used,
    Runnable,
    Running,
    Sleeping,
    Zombie,
}

/// Spinlock-protected half of a process slot.
pub struct ProcInner {
    pub state: ProcState,
    /// Wait channel while Sleeping; 0 otherwise.
    pub chan: usize,
    pub killed: bool,
    /// Exit status reported to `wait`.
    pub xstate: i32,
}

/// Process-private half of a slot.
pub struct ProcData {
    /// User memory size in bytes (page-aligned upper bound).
    pub size: u64,
    pub page_table: Option<PageTable>,
    /// Frame backing the trap-frame page.
    pub trap_frame: Option<frame::Frame>,
    /// Saved kernel context for `context_switch`.
    pub context: Context,
    pub ofile: [Option<&'static File>; N_OFILE],
    pub cwd: Option<Iref>,
    pub name: [u8; 16],
}

impl ProcData {
    const fn new() -> Self {
        Self {
            size: 0,
            page_table: None,
            trap_frame: None,
            context: Context::zeroed(),
            ofile: [None; N_OFILE],
            cwd: None,
            name: [0; 16],
        }
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        match self.page_table.as_mut() {
            Some(pt) => pt,
            None => panic!("process has no page table"),
        }
    }
}

/// One process slot.
pub struct Proc {
    pub inner: SpinLock<ProcInner>,
    /// Pid; written while the slot lock is held, readable lock-free
    /// (sleep-lock ownership checks, dumps).
    pid: AtomicI32,
    /// Parent link; wait-lock protected.
    parent: AtomicPtr<Proc>,
    data: UnsafeCell<ProcData>,
}

// SAFETY: `data` is only referenced by the owning process, or with the
// slot lock held while the slot is not Running (alloc, free, scheduler
// dispatch); `inner`, `pid` and `parent` carry their own synchronization.
unsafe impl Sync for Proc {}

impl Proc {
    const fn new() -> Self {
        Self {
            inner: SpinLock::new("process", ProcInner {
                state: ProcState::Unused,
                chan: 0,
                killed: false,
                xstate: 0,
            }),
            pid: AtomicI32::new(-1),
            parent: AtomicPtr::new(core::ptr::null_mut()),
            data: UnsafeCell::new(ProcData::new()),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Relaxed)
    }

    pub fn is_killed(&self) -> bool {
        self.inner.lock().killed
    }

    pub fn set_killed(&self) {
        self.inner.lock().killed = true;
    }

    /// The process-private data.
    ///
    /// # Safety
    ///
    /// Caller must be the owning process, or must otherwise exclude
    /// concurrent access (slot lock held while the slot is not Running).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data(&self) -> &mut ProcData {
        // SAFETY: per the caller's contract.
        unsafe { &mut *self.data.get() }
    }

    /// The process's user page table.
    ///
    /// # Safety
    ///
    /// Same contract as `data`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn page_table(&self) -> &mut PageTable {
        // SAFETY: per the caller's contract.
        unsafe { self.data() }.page_table_mut()
    }

    /// The process's trap frame.
    ///
    /// # Safety
    ///
    /// Same contract as `data`; additionally the trap frame must be
    /// allocated (always true between proc_alloc and proc_free).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn trap_frame(&self) -> &mut TrapFrame {
        // SAFETY: per the caller's contract; the frame is a full page,
        // large enough for a TrapFrame, and exclusively owned.
        unsafe {
            let data = self.data();
            match data.trap_frame.as_ref() {
                Some(f) => &mut *(f.addr() as *mut TrapFrame),
                None => panic!("process has no trap frame"),
            }
        }
    }

    /// A second reference to the current working directory. Owning
    /// process only.
    pub fn cwd_dup(&self) -> Iref {
        // SAFETY: called by the owning process; cwd is always Some while
        // the process runs user code.
        let data = unsafe { self.data() };
        match data.cwd.as_ref() {
            Some(cwd) => cwd.dup(),
            None => panic!("process has no working directory"),
        }
    }

    /// Top of this slot's kernel stack page.
    pub fn kstack_top(&self) -> u64 {
        kernel_stack(index_of(self)) + PAGE_SIZE as u64
    }
}

struct ProcTable {
    procs: [Proc; N_PROC],
}

static PROCS: ProcTable = ProcTable {
    procs: [const { Proc::new() }; N_PROC],
};

fn index_of(p: &Proc) -> usize {
    let base = PROCS.procs.as_ptr() as usize;
    (p as *const Proc as usize - base) / core::mem::size_of::<Proc>()
}

fn procs() -> impl Iterator<Item = &'static Proc> {
    PROCS.procs.iter()
}

/// Serializes parent-link updates and the wait/exit handshake.
static WAIT_LOCK: SpinLock<()> = SpinLock::new("wait_lock", ());

/// The init process, target of orphan reparenting.
static INIT_PROC: AtomicPtr<Proc> = AtomicPtr::new(core::ptr::null_mut());

fn init_proc() -> &'static Proc {
    let p = INIT_PROC.load(Ordering::Acquire);
    if p.is_null() {
        panic!("init process not created yet");
    }
    // SAFETY: points into the static process table.
    unsafe { &*p }
}

pub fn init() {
    log::info!(target: "proc", "{} process slots, kernel stacks mapped", N_PROC);
}

// ---------------------------------------------------------------------------
// Slot allocation
// ---------------------------------------------------------------------------

/// Fresh processes land here on their first dispatch: the scheduler's
/// lock handoff is released by hand (no guard exists on this stack), the
/// very first process mounts the filesystem, and control falls through
/// to the user-return path.
extern "C" fn fork_return() -> ! {
    static FIRST: AtomicBool = AtomicBool::new(true);

    let p = cpu::current_proc();
    // SAFETY: the scheduler acquired our slot lock before switching here;
    // this is the cross-stack release half of that handshake.
    unsafe { p.inner.force_unlock() };

    if FIRST.swap(false, Ordering::AcqRel) {
        // Disk I/O needs a process context to sleep in, so mounting
        // happens here rather than in kernel_main.
        fs::init(ROOT_DEV);
    }

    trap::user_trap_return();
}

/// Find an Unused slot and stock it: pid, trap-frame page, a user page
/// table with the fixed furniture, and a context that "returns" into
/// `fork_return` on the slot's kernel stack. Returns the slot with its
/// lock held, in state Used.
fn proc_alloc() -> Option<(&'static Proc, SpinLockGuard<'static, ProcInner>)> {
    for p in procs() {
        let mut g = p.inner.lock();
        if g.state != ProcState::Unused {
            continue;
        }

        g.state = ProcState::Used;
        p.pid.store(pid::alloc(), Ordering::Relaxed);

        // SAFETY: the slot was Unused and we hold its lock; nobody else
        // references data.
        let data = unsafe { p.data() };

        let Some(tf) = frame::alloc_zeroed() else {
            proc_free(p, data);
            g.state = ProcState::Unused;
            return None;
        };
        let tf_pa = tf.addr();
        data.trap_frame = Some(tf);

        match mm::new_user_table(tf_pa) {
            Ok(pt) => data.page_table = Some(pt),
            Err(_) => {
                proc_free(p, data);
                g.state = ProcState::Unused;
                return None;
            }
        }

        data.context = Context::zeroed();
        data.context.ra = fork_return as usize as u64;
        data.context.sp = p.kstack_top();

        return Some((p, g));
    }
    None
}

/// Return a slot to Unused, releasing everything it owns. Caller holds
/// the slot lock (and sets the state afterwards as appropriate).
fn proc_free(p: &Proc, data: &mut ProcData) {
    data.trap_frame = None;
    if let Some(pt) = data.page_table.take() {
        mm::free_user_table(pt, data.size);
    }
    data.size = 0;
    data.name = [0; 16];
    if p.pid() >= 0 {
        pid::free(p.pid());
    }
    p.pid.store(-1, Ordering::Relaxed);
    p.parent.store(core::ptr::null_mut(), Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Scheduler core
// ---------------------------------------------------------------------------

/// Per-hart scheduler loop: find a Runnable process, run it until it
/// switches back, repeat; idle in `wfi` when the table has nothing.
pub fn scheduler() -> ! {
    // SAFETY: the scheduler is pinned to this hart for good; the loop
    // never migrates, so holding the Cpu reference across intr_on is
    // sound.
    let c = unsafe { cpu::current() };
    c.set_proc(None);
    loop {
        // The last process may have left interrupts off; without this a
        // fully-idle system would deadlock waiting for a wakeup that can
        // never be delivered.
        arch::intr_on();

        let mut found = false;
        for p in procs() {
            let mut g = p.inner.lock();
            if g.state == ProcState::Runnable {
                found = true;
                g.state = ProcState::Running;
                c.set_proc(Some(p));
                // SAFETY: the process's saved context is valid (built by
                // proc_alloc or a previous sched); we hold its lock, the
                // other half of the handshake releases it.
                unsafe {
                    arch::context_switch(c.context_ptr(), &p.data().context);
                }
                // The process is done for now; it changed its own state
                // before switching back.
                c.set_proc(None);
            }
            drop(g);
        }
        if !found {
            arch::intr_on();
            arch::wait_for_interrupt();
        }
    }
}

/// Switch back to this hart's scheduler. The caller must hold exactly
/// the current process's slot lock (passed as `guard`), with the state
/// already moved off Running. Returns when the scheduler next dispatches
/// this process, with the lock held again.
pub fn sched(guard: SpinLockGuard<'_, ProcInner>) -> SpinLockGuard<'_, ProcInner> {
    let p = cpu::current_proc();
    if !core::ptr::eq(guard.spinlock(), &p.inner) {
        panic!("sched: guard is not the current process's lock");
    }
    if guard.state == ProcState::Running {
        panic!("sched: process still Running");
    }
    if arch::intr_get() {
        panic!("sched: interrupts enabled");
    }
    // SAFETY: interrupts are off (asserted above).
    let c = unsafe { cpu::current() };
    if c.n_off() != 1 {
        panic!("sched: holding locks other than the process lock");
    }

    let intr_ena = c.intr_ena();
    // SAFETY: both contexts are valid; the handshake contract holds (we
    // hold our own slot lock; the scheduler releases it after the
    // switch, and re-establishes it before switching back here).
    unsafe {
        arch::context_switch(&mut p.data().context, c.context_ptr());
    }
    // Possibly a different hart now; re-derive the Cpu before restoring
    // the saved interrupt-enable snapshot.
    // SAFETY: interrupts are still off across a context switch.
    unsafe { cpu::current() }.set_intr_ena(intr_ena);

    guard
}

/// Voluntarily give up the CPU.
pub fn yield_now() {
    let p = cpu::current_proc();
    let mut g = p.inner.lock();
    g.state = ProcState::Runnable;
    let g = sched(g);
    drop(g);
}

/// Atomically release `guard`'s lock and sleep on `chan_`; reacquires
/// the lock before returning. Callers loop on their predicate: wakeups
/// may be spurious.
pub fn sleep_on<'a, T: ?Sized>(
    chan_: usize,
    guard: SpinLockGuard<'a, T>,
) -> SpinLockGuard<'a, T> {
    let p = cpu::current_proc();

    // Taking our own slot lock first makes the release of the condition
    // lock safe: a wake_up between the release and the sleep must take
    // the slot lock too, so it cannot be lost.
    let mut inner = p.inner.lock();
    let lk = guard.unlock();

    inner.chan = chan_;
    inner.state = ProcState::Sleeping;

    let mut inner = sched(inner);

    inner.chan = 0;
    drop(inner);

    lk.lock()
}

/// Make every process sleeping on `chan_` Runnable.
pub fn wake_up(chan_: usize) {
    let me = cpu::running_proc();
    for p in procs() {
        if let Some(me) = me {
            if core::ptr::eq(p, me) {
                continue;
            }
        }
        let mut g = p.inner.lock();
        if g.state == ProcState::Sleeping && g.chan == chan_ {
            g.state = ProcState::Runnable;
        }
    }
}

// ---------------------------------------------------------------------------
// Process lifecycle
// ---------------------------------------------------------------------------

/// Create a child: copy of the user space, trap frame (with a0 = 0 so
/// the child observes return value 0), open files, cwd and name. The
/// child becomes Runnable; the parent gets the child's pid.
pub fn fork() -> KernelResult<i32> {
    let parent = cpu::current_proc();
    let Some((child, guard)) = proc_alloc() else {
        return Err(KernelError::ResourceExhausted { resource: "processes" });
    };

    // SAFETY: parent data is ours (we are the parent); child data is
    // unshared (freshly allocated, lock held, not yet Runnable).
    let pdata = unsafe { parent.data() };
    let cdata = unsafe { child.data() };

    let psize = pdata.size;
    if pdata
        .page_table_mut()
        .uvm_copy(cdata.page_table_mut(), psize)
        .is_err()
    {
        let mut guard = guard;
        proc_free(child, cdata);
        guard.state = ProcState::Unused;
        return Err(KernelError::ResourceExhausted { resource: "frames" });
    }
    cdata.size = pdata.size;

    // Duplicate the trap frame, then make the child's syscall return
    // value 0.
    let ptf = match pdata.trap_frame.as_ref() {
        Some(f) => f.addr() as *const TrapFrame,
        None => panic!("fork: parent has no trap frame"),
    };
    let ctf = match cdata.trap_frame.as_ref() {
        Some(f) => f.addr() as *mut TrapFrame,
        None => panic!("fork: child has no trap frame"),
    };
    // SAFETY: distinct, exclusively-owned trap-frame pages.
    unsafe {
        *ctf = *ptf;
        (*ctf).a0 = 0;
    }

    for fd in 0..N_OFILE {
        if let Some(f) = pdata.ofile[fd] {
            cdata.ofile[fd] = Some(file::dup(f));
        }
    }
    cdata.cwd = Some(match pdata.cwd.as_ref() {
        Some(cwd) => cwd.dup(),
        None => panic!("fork: parent has no working directory"),
    });
    cdata.name = pdata.name;

    let pid = child.pid();
    drop(guard);

    {
        let _wl = WAIT_LOCK.lock();
        child
            .parent
            .store(parent as *const Proc as *mut Proc, Ordering::Relaxed);
    }

    child.inner.lock().state = ProcState::Runnable;

    Ok(pid)
}

/// Harvest a zombie child: copy its exit status to `status_addr` (if
/// non-null), free its slot, return its pid. Blocks until a child dies;
/// errors if there are no children or the caller is killed.
pub fn wait(status_addr: u64) -> KernelResult<i32> {
    let parent = cpu::current_proc();
    let mut wl = WAIT_LOCK.lock();

    loop {
        let mut have_kids = false;
        for child in procs() {
            if !core::ptr::eq(child.parent.load(Ordering::Relaxed), parent) {
                continue;
            }
            have_kids = true;

            let mut g = child.inner.lock();
            if g.state == ProcState::Zombie {
                let pid = child.pid();
                if status_addr != 0 {
                    let xstate = g.xstate;
                    // SAFETY: we are the running process; this is our own
                    // page table.
                    if unsafe { parent.page_table() }
                        .copy_out(status_addr, &xstate.to_le_bytes())
                        .is_err()
                    {
                        return Err(KernelError::BadAddress { addr: status_addr });
                    }
                }
                // SAFETY: the child is a zombie and we hold its lock; no
                // other path touches its data.
                proc_free(child, unsafe { child.data() });
                g.state = ProcState::Unused;
                return Ok(pid);
            }
            drop(g);
        }

        if !have_kids || parent.is_killed() {
            return Err(KernelError::NotFound);
        }
        wl = sleep_on(chan(parent), wl);
    }
}

/// Terminate the current process: close files, drop the cwd, hand any
/// children to init, record the exit status, become a Zombie and never
/// return. Forbidden for init itself.
pub fn exit(status: i32) -> ! {
    let p = cpu::current_proc();
    if core::ptr::eq(p, init_proc()) {
        panic!("init exiting");
    }

    // SAFETY: we are the owning process.
    let data = unsafe { p.data() };
    for fd in 0..N_OFILE {
        if let Some(f) = data.ofile[fd].take() {
            file::close(f);
        }
    }

    fs::log::begin_op();
    data.cwd = None;
    fs::log::end_op();

    let wl = WAIT_LOCK.lock();

    // Orphans go to init, which must then be told to reap.
    let me = p as *const Proc as *mut Proc;
    for other in procs() {
        if core::ptr::eq(other.parent.load(Ordering::Relaxed), me) {
            other
                .parent
                .store(init_proc() as *const Proc as *mut Proc, Ordering::Relaxed);
        }
    }
    wake_up(chan(init_proc()));

    let mut g = p.inner.lock();
    let parent_ptr = p.parent.load(Ordering::Relaxed);
    if !parent_ptr.is_null() {
        // SAFETY: parent links point into the static table.
        wake_up(chan(unsafe { &*parent_ptr }));
    }
    g.xstate = status;
    g.state = ProcState::Zombie;

    // Enter the scheduler holding only our slot lock.
    drop(wl);
    let _ = sched(g);
    panic!("zombie process resumed");
}

/// Mark the process with `target` pid killed; a Sleeping target is made
/// Runnable so it can observe the flag and exit.
pub fn kill(target: i32) -> KernelResult<()> {
    for p in procs() {
        let mut g = p.inner.lock();
        if p.pid() == target && g.state != ProcState::Unused {
            g.killed = true;
            if g.state == ProcState::Sleeping {
                g.state = ProcState::Runnable;
            }
            return Ok(());
        }
    }
    Err(KernelError::NotFound)
}

/// Set the process break to `new_size` bytes, growing or shrinking the
/// user address space.
pub fn grow(new_size: u64) -> KernelResult<()> {
    let p = cpu::current_proc();
    // SAFETY: owning process.
    let data = unsafe { p.data() };
    let old_size = data.size;
    if new_size > old_size {
        data.size = data
            .page_table_mut()
            .uvm_alloc(old_size, new_size, PteFlags::W)?;
    } else {
        data.size = data.page_table_mut().uvm_dealloc(old_size, new_size);
    }
    Ok(())
}

/// Pid of the parent, for getppid.
pub fn parent_pid(p: &Proc) -> i32 {
    let _wl = WAIT_LOCK.lock();
    let parent = p.parent.load(Ordering::Relaxed);
    if parent.is_null() {
        -1
    } else {
        // SAFETY: parent links point into the static table.
        unsafe { &*parent }.pid()
    }
}

// ---------------------------------------------------------------------------
// First process
// ---------------------------------------------------------------------------

/// Machine code of the first user program: execve("/init", ["/init"],
/// ["SHELL=/sh"]), exit-looping if that fails. Assembled once and kept
/// as bytes because it predates the filesystem.
static INITCODE: [u8; 96] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0xc5, 0x02, 0x97, 0x05, 0x00, 0x00,
    0x93, 0x85, 0x65, 0x03, 0x17, 0x06, 0x00, 0x00, 0x13, 0x06, 0xe6, 0x03,
    0x93, 0x08, 0xd0, 0x00, 0x73, 0x00, 0x00, 0x00, 0x93, 0x08, 0x40, 0x00,
    0x73, 0x00, 0x00, 0x00, 0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69,
    0x74, 0x00, 0x00, 0x53, 0x48, 0x45, 0x4c, 0x4c, 0x3d, 0x2f, 0x73, 0x68,
    0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
];

/// Create the first process: one page of user memory holding INITCODE,
/// entry at VA 0, cwd at the filesystem root. Boot hart only.
pub fn user_init() {
    let Some((p, mut guard)) = proc_alloc() else {
        panic!("user_init: no free process slot");
    };

    // SAFETY: freshly allocated slot, lock held.
    let data = unsafe { p.data() };

    let Some(mem) = frame::alloc_zeroed() else {
        panic!("user_init: out of frames");
    };
    // SAFETY: the frame is fresh, page-sized, and INITCODE fits.
    unsafe {
        core::ptr::copy_nonoverlapping(INITCODE.as_ptr(), mem.as_ptr(), INITCODE.len());
    }
    if data
        .page_table_mut()
        .map_pages(
            0,
            mem.leak(),
            PAGE_SIZE,
            PteFlags::U | PteFlags::R | PteFlags::W | PteFlags::X,
        )
        .is_err()
    {
        panic!("user_init: cannot map initcode");
    }
    data.size = PAGE_SIZE as u64;

    // SAFETY: trap frame allocated by proc_alloc; slot lock held.
    let tf = unsafe { p.trap_frame() };
    tf.epc = 0;
    tf.sp = USER_STACK_TOP;

    data.cwd = fs::inode::namei(b"/");
    data.name[..4].copy_from_slice(b"init");

    INIT_PROC.store(p as *const Proc as *mut Proc, Ordering::Release);

    guard.state = ProcState::Runnable;
    drop(guard);

    log::info!(target: "proc", "init process created (pid {})", p.pid());
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Console ^P: one line per used slot. Reads state unlocked; this is a
/// debugging aid, not a synchronized view.
pub fn dump() {
    crate::println!();
    for p in procs() {
        // SAFETY: racy snapshot by design.
        let state = unsafe { (*p.inner.data_ptr()).state };
        if state == ProcState::Unused {
            continue;
        }
        let label = match state {
            ProcState::Unused => "unused",
            ProcState::Used => "used",
            ProcState::Runnable => "runnable",
            ProcState::Running => "running",
            ProcState::Sleeping => "sleeping",
            ProcState::Zombie => "zombie",
        };
        // SAFETY: name races with renames at worst.
        let data = unsafe { &*p.data.get() };
        let len = data.name.iter().position(|&b| b == 0).unwrap_or(16);
        let name = core::str::from_utf8(&data.name[..len]).unwrap_or("?");
        crate::println!("{:<8} {} {}", label, p.pid(), name);
    }
}
