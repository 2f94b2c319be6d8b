//! Kernel error types.
//!
//! Internal operations report failure through `KernelResult`; the syscall
//! dispatcher flattens any error into the single `-1` user-visible code.
//! Errors carry no owned data, so callers never need to free one.

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A fixed pool (frames, files, inodes, descriptors, pids) is exhausted.
    ResourceExhausted { resource: &'static str },
    /// A user-supplied virtual address did not translate, or lacked the
    /// required permissions.
    BadAddress { addr: u64 },
    /// A path did not resolve, or a directory entry was missing.
    NotFound,
    /// The operation does not apply to the object (e.g. seek on a pipe,
    /// link of a directory, write through a read-only descriptor).
    InvalidOperation,
    /// A numeric argument was out of range.
    InvalidArgument { name: &'static str },
    /// File descriptor out of range or not open.
    BadFileDescriptor,
    /// The peer endpoint is gone (write on a reader-less pipe).
    BrokenPipe,
    /// The calling process has been killed; the operation was abandoned.
    Killed,
    /// Object already exists (e.g. `create` over a conflicting entry).
    AlreadyExists,
    /// Malformed on-disk or in-file structure (bad ELF, bad directory).
    Corrupted { what: &'static str },
}

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;
