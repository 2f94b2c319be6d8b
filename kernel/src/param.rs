//! System-wide capacities.
//!
//! Every table in the kernel is a fixed static pool; these constants size
//! them. The buffer pool and the log are dimensioned together so that a
//! full complement of concurrent transactions can always pin its blocks
//! (see `fs::log`).

/// Number of harts the kernel drives.
pub const N_CPU: usize = 3;

/// Process-table capacity.
pub const N_PROC: usize = 64;

/// Device number of the root filesystem disk.
pub const ROOT_DEV: u32 = 1;

/// Per-process open-file table capacity.
pub const N_OFILE: usize = 16;

/// Global open-file table capacity.
pub const N_FILE: usize = 100;

/// Device switch table capacity.
pub const N_DEV: usize = 10;

/// In-memory inode table capacity.
pub const N_INODE: usize = 50;

/// Maximum number of blocks a single transaction may dirty.
pub const MAX_OP_BLKS: usize = 10;

/// Buffer-cache pool size.
pub const N_BUF: usize = MAX_OP_BLKS * 3;

/// Log-ring capacity in blocks (excluding the header block).
pub const LOG_SIZE: usize = MAX_OP_BLKS * 3;

/// Maximum path length accepted from user space.
pub const MAX_PATH: usize = 128;

/// Maximum argv entries for `execve`.
pub const MAX_ARGS: usize = 32;

/// Maximum envp entries for `execve`.
pub const MAX_ENVS: usize = 16;

/// PID space: one bit per pid in a 4096-byte bitmap.
pub const PID_SPACE: usize = 4096 * 8;
