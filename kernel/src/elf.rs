//! ELF64 executable parsing.
//!
//! Just enough of the format for `execve`: the file header (machine
//! checks are left to the loader's magic test, as the filesystem only
//! ever carries images built for this kernel) and the program headers
//! describing LOAD segments.

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};

/// "\x7FELF" in little-endian.
pub const ELF_MAGIC: u32 = 0x464C_457F;

/// Program header type for loadable segments.
pub const PT_LOAD: u32 = 1;

/// Size of the ELF64 file header.
pub const ELF_HEADER_SIZE: usize = 64;

/// Size of one ELF64 program header.
pub const PROG_HEADER_SIZE: usize = 56;

bitflags! {
    /// Program-header permission flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegFlags: u32 {
        const EXEC = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
    }
}

/// Decoded ELF64 file header (the fields the loader uses).
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    pub magic: u32,
    pub entry: u64,
    pub phoff: u64,
    pub phnum: u16,
}

impl ElfHeader {
    /// Decode and validate the magic number.
    pub fn decode(raw: &[u8; ELF_HEADER_SIZE]) -> KernelResult<Self> {
        let magic = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        if magic != ELF_MAGIC {
            return Err(KernelError::Corrupted { what: "elf magic" });
        }
        Ok(Self {
            magic,
            entry: u64::from_le_bytes(raw[24..32].try_into().unwrap()),
            phoff: u64::from_le_bytes(raw[32..40].try_into().unwrap()),
            phnum: u16::from_le_bytes(raw[56..58].try_into().unwrap()),
        })
    }
}

/// Decoded ELF64 program header.
#[derive(Debug, Clone, Copy)]
pub struct ProgHeader {
    pub type_: u32,
    pub flags: SegFlags,
    pub off: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl ProgHeader {
    pub fn decode(raw: &[u8; PROG_HEADER_SIZE]) -> Self {
        let u32_at = |i: usize| u32::from_le_bytes(raw[i..i + 4].try_into().unwrap());
        let u64_at = |i: usize| u64::from_le_bytes(raw[i..i + 8].try_into().unwrap());
        Self {
            type_: u32_at(0),
            flags: SegFlags::from_bits_truncate(u32_at(4)),
            off: u64_at(8),
            vaddr: u64_at(16),
            filesz: u64_at(32),
            memsz: u64_at(40),
        }
    }

    /// Sanity rules for a loadable segment: memory image at least as
    /// large as the file image, no address-space wraparound, page-aligned
    /// base.
    pub fn validate_load(&self) -> KernelResult<()> {
        if self.memsz < self.filesz {
            return Err(KernelError::Corrupted { what: "segment sizes" });
        }
        if self.vaddr.checked_add(self.memsz).is_none() {
            return Err(KernelError::Corrupted { what: "segment range" });
        }
        if self.vaddr as usize % crate::mm::layout::PAGE_SIZE != 0 {
            return Err(KernelError::Corrupted { what: "segment alignment" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(magic: u32, entry: u64, phoff: u64, phnum: u16) -> [u8; ELF_HEADER_SIZE] {
        let mut raw = [0u8; ELF_HEADER_SIZE];
        raw[0..4].copy_from_slice(&magic.to_le_bytes());
        raw[24..32].copy_from_slice(&entry.to_le_bytes());
        raw[32..40].copy_from_slice(&phoff.to_le_bytes());
        raw[56..58].copy_from_slice(&phnum.to_le_bytes());
        raw
    }

    #[test]
    fn accepts_elf_magic() {
        let h = ElfHeader::decode(&header_bytes(ELF_MAGIC, 0x1000, 64, 2)).unwrap();
        assert_eq!(h.entry, 0x1000);
        assert_eq!(h.phoff, 64);
        assert_eq!(h.phnum, 2);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(ElfHeader::decode(&header_bytes(0xDEAD_BEEF, 0, 64, 1)).is_err());
    }

    #[test]
    fn program_header_decodes_and_validates() {
        let mut raw = [0u8; PROG_HEADER_SIZE];
        raw[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        raw[4..8].copy_from_slice(&(SegFlags::READ | SegFlags::EXEC).bits().to_le_bytes());
        raw[8..16].copy_from_slice(&0x1000u64.to_le_bytes()); // off
        raw[16..24].copy_from_slice(&0x0u64.to_le_bytes()); // vaddr
        raw[32..40].copy_from_slice(&0x500u64.to_le_bytes()); // filesz
        raw[40..48].copy_from_slice(&0x800u64.to_le_bytes()); // memsz

        let ph = ProgHeader::decode(&raw);
        assert_eq!(ph.type_, PT_LOAD);
        assert!(ph.flags.contains(SegFlags::EXEC));
        assert!(ph.validate_load().is_ok());
    }

    #[test]
    fn validate_rejects_shrunk_or_wrapping_segments() {
        let mut ph = ProgHeader {
            type_: PT_LOAD,
            flags: SegFlags::READ,
            off: 0,
            vaddr: 0,
            filesz: 0x1000,
            memsz: 0x800,
        };
        assert!(ph.validate_load().is_err()); // memsz < filesz

        ph.filesz = 0x100;
        ph.vaddr = u64::MAX - 0x100;
        assert!(ph.validate_load().is_err()); // wraps

        ph.vaddr = 0x123;
        ph.memsz = 0x1000;
        assert!(ph.validate_load().is_err()); // unaligned
    }
}
