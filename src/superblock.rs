//! The fixed header at offset 0 of the image.

use deku::prelude::*;

use crate::compressor::Compressor;
use crate::error::Error;

/// `"hsqs"` little-endian.
pub const MAGIC: u32 = 0x7371_7368;

/// Sentinel used by any table start field that is absent.
pub const INVALID_BLK: u64 = 0xffff_ffff_ffff_ffff;

/// Sentinel used by a file's `fragment` field when the file has no fragment.
pub const INVALID_FRAG: u32 = 0xffff_ffff;

/// Maximum decompressed size of a metadata block.
pub const METADATA_SIZE: usize = 8192;

/// Bit in a metadata block's 16-bit length prefix. Clear means compressed.
pub const COMPRESSED_BIT_METADATA: u16 = 1 << 15;

/// Bit in a data block length. Clear means compressed.
pub const COMPRESSED_BIT_BLOCK: u32 = 1 << 24;

pub const MIN_BLOCK_SIZE: u32 = 0x1000;
pub const MAX_BLOCK_SIZE: u32 = 0x10_0000;

bitflags::bitflags! {
    /// Bitwise-OR'd flags from the superblock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        const INODES_STORED_UNCOMPRESSED     = 0b0000_0000_0000_0001;
        const DATA_BLOCK_STORED_UNCOMPRESSED = 0b0000_0000_0000_0010;
        const FRAGMENTS_STORED_UNCOMPRESSED  = 0b0000_0000_0000_1000;
        const FRAGMENTS_ARE_NOT_USED         = 0b0000_0000_0001_0000;
        const FRAGMENTS_ALWAYS_GENERATED     = 0b0000_0000_0010_0000;
        const DATA_HAS_BEEN_DEDUPLICATED     = 0b0000_0000_0100_0000;
        const NFS_EXPORT_TABLE_EXISTS        = 0b0000_0000_1000_0000;
        const XATTRS_ARE_STORED_UNCOMPRESSED = 0b0000_0001_0000_0000;
        const NO_XATTRS_IN_ARCHIVE           = 0b0000_0010_0000_0000;
        const COMPRESSOR_OPTIONS_ARE_PRESENT = 0b0000_0100_0000_0000;
    }
}

/// Contains important information about the archive, including the locations of other sections.
#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct SuperBlock {
    /// Must be set to `0x73717368` ("hsqs" on disk).
    #[deku(assert_eq = "MAGIC")]
    pub magic: u32,
    /// The number of inodes stored in the archive.
    pub inode_count: u32,
    /// Last modification time of the archive, unix seconds.
    pub mod_time: u32,
    /// The size of a data block in bytes. Must be a power of two between 4096 and 1048576.
    pub block_size: u32,
    /// The number of entries in the fragment table.
    pub frag_count: u32,
    /// Compressor used for data and metadata.
    pub compressor: Compressor,
    /// `2.pow(block_log) == block_size`.
    pub block_log: u16,
    /// Bitwise OR of [`Flags`].
    pub flags: u16,
    /// The number of entries in the ID lookup table.
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    /// A packed reference `(block << 16) | offset` to the root directory inode.
    pub root_inode: u64,
    /// The number of bytes used by the archive.
    pub bytes_used: u64,
    pub id_table_start: u64,
    pub xattr_id_table_start: u64,
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub fragment_table_start: u64,
    pub lookup_table_start: u64,
}

impl SuperBlock {
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags)
    }

    pub fn compressor_options_are_present(&self) -> bool {
        self.flags().contains(Flags::COMPRESSOR_OPTIONS_ARE_PRESENT)
    }

    /// Splits the packed root inode reference into `(block, offset)`.
    pub fn root_inode_addr(&self) -> (u64, u16) {
        unpack_inode_addr(self.root_inode)
    }

    /// Validates invariants beyond what deku's `assert_eq` already checks.
    pub fn validate(&self) -> Result<(), Error> {
        if self.version_major != 4 {
            return Err(Error::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }

        let power_of_two = self.block_size != 0 && (self.block_size & (self.block_size - 1)) == 0;
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) || !power_of_two {
            return Err(Error::InvalidImage(format!(
                "block_size {:#x} is not a power of two in [{:#x}, {:#x}]",
                self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }

        if !(12..=20).contains(&self.block_log) || 1u32 << self.block_log != self.block_size {
            return Err(Error::InvalidImage(format!(
                "block_log {} does not agree with block_size {:#x}",
                self.block_log, self.block_size
            )));
        }

        for (name, start) in [
            ("id_table_start", self.id_table_start),
            ("xattr_id_table_start", self.xattr_id_table_start),
            ("inode_table_start", self.inode_table_start),
            ("directory_table_start", self.directory_table_start),
            ("fragment_table_start", self.fragment_table_start),
            ("lookup_table_start", self.lookup_table_start),
        ] {
            if start != INVALID_BLK && start >= self.bytes_used {
                return Err(Error::InvalidImage(format!(
                    "{name} {start:#x} is outside of the image (bytes_used={:#x})",
                    self.bytes_used
                )));
            }
        }

        Ok(())
    }
}

/// Splits a packed `(block << 16) | offset` inode reference.
pub fn unpack_inode_addr(packed: u64) -> (u64, u16) {
    (packed >> 16, (packed & 0xffff) as u16)
}

/// Packs an inode reference into `(block << 16) | offset`.
pub fn pack_inode_addr(block: u64, offset: u16) -> u64 {
    (block << 16) | offset as u64
}
