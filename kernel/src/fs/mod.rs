//! Filesystem.
//!
//! On-disk layout, in 1024-byte blocks, all integers little-endian:
//!
//! ```text
//! [ boot | superblock | log header + log ring | inode bitmap |
//!   inode blocks | data bitmap | data blocks ]
//! ```
//!
//! The stack, bottom up: buffer cache (`buf`) over the virtio disk, the
//! write-ahead log (`log`) giving crash consistency, the inode layer
//! (`inode`) with path resolution, and the file objects (`file`) tying
//! inodes, devices and pipes to descriptors.

pub mod buf;
pub mod file;
pub mod inode;
pub mod log;
pub mod lru;
pub mod path;
pub mod pipe;

use spin::Once;

/// Filesystem block size in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Inode number of the filesystem root directory.
pub const ROOT_INO: u16 = 1;

/// Direct block pointers per inode.
pub const N_DIRECT: usize = 10;

/// Singly-indirect block pointers per inode.
pub const N_INDIRECT: usize = 3;

/// Total block-pointer slots per inode.
pub const N_ADDRS: usize = N_DIRECT + N_INDIRECT;

/// Block-pointer entries held by one indirect block.
pub const ADDRS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Bytes of one on-disk inode: four u16 fields padded to 16 bytes, a u32
/// size, and N_ADDRS u32 block pointers.
pub const DINODE_SIZE: usize = 16 + 4 + N_ADDRS * 4;

/// On-disk inodes per block (the 16-byte remainder per block is unused).
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / DINODE_SIZE;

/// Bytes in a directory entry name.
pub const DIR_NAME_SIZE: usize = 30;

/// Bytes of one directory entry: u16 inode number + name.
pub const DIR_ENTRY_SIZE: usize = 2 + DIR_NAME_SIZE;

/// Superblock, block 1 on disk: nine little-endian u32 fields locating
/// every region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub block_size: u32,
    pub n_log_blks: u32,
    pub n_inode_blks: u32,
    pub n_data_blks: u32,
    pub log_start: u32,
    pub inode_bitmap_start: u32,
    pub inode_start: u32,
    pub data_bitmap_start: u32,
    pub data_start: u32,
}

impl SuperBlock {
    /// Decode from the raw superblock block.
    pub fn decode(raw: &[u8]) -> Self {
        let f = |i: usize| u32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap());
        Self {
            block_size: f(0),
            n_log_blks: f(1),
            n_inode_blks: f(2),
            n_data_blks: f(3),
            log_start: f(4),
            inode_bitmap_start: f(5),
            inode_start: f(6),
            data_bitmap_start: f(7),
            data_start: f(8),
        }
    }

    /// Disk block holding inode `ino`.
    pub fn inode_block(&self, ino: u16) -> u32 {
        self.inode_start + ino as u32 / INODES_PER_BLOCK as u32
    }
}

static SB: Once<SuperBlock> = Once::new();

/// Mount the filesystem on `dev`: read the superblock and run log
/// recovery. Called once, from the first process (it performs disk I/O,
/// so it must run in process context).
pub fn init(dev: u32) {
    let sb = {
        let b = buf::bread(dev, 1);
        SuperBlock::decode(&b.bytes)
    };
    if sb.block_size != BLOCK_SIZE as u32 {
        panic!("fs: superblock block size mismatch");
    }
    SB.call_once(|| sb);
    log::init(dev, &sb);
    log::info_banner(&sb);
}

/// The mounted superblock.
pub fn superblock() -> &'static SuperBlock {
    SB.get().expect("fs not mounted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dinode_geometry() {
        assert_eq!(DINODE_SIZE, 72);
        assert_eq!(INODES_PER_BLOCK, 14);
        assert_eq!(DIR_ENTRY_SIZE, 32);
        assert_eq!(ADDRS_PER_BLOCK, 256);
    }

    #[test]
    fn superblock_round_trip() {
        let mut raw = [0u8; BLOCK_SIZE];
        let fields: [u32; 9] = [1024, 30, 57, 8192, 2, 33, 34, 91, 92];
        for (i, v) in fields.iter().enumerate() {
            raw[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        let sb = SuperBlock::decode(&raw);
        assert_eq!(sb.block_size, 1024);
        assert_eq!(sb.log_start, 2);
        assert_eq!(sb.inode_bitmap_start, 33);
        assert_eq!(sb.data_start, 92);
    }

    #[test]
    fn inode_block_mapping() {
        let sb = SuperBlock {
            block_size: 1024,
            n_log_blks: 30,
            n_inode_blks: 57,
            n_data_blks: 8192,
            log_start: 2,
            inode_bitmap_start: 33,
            inode_start: 34,
            data_bitmap_start: 91,
            data_start: 92,
        };
        assert_eq!(sb.inode_block(0), 34);
        assert_eq!(sb.inode_block(13), 34);
        assert_eq!(sb.inode_block(14), 35);
    }
}
