//! Per-inode on-disk layouts and the tagged sum that represents a decoded inode.
//!
//! Inodes are decoded in stages (base header, then the type's fixed tail, then any
//! variable-length trailer such as a symlink target or block list) because each stage's length
//! depends on a field read in the previous one; see [`crate::reader::Reader`] for the
//! orchestration across those stages.

use deku::prelude::*;

use crate::cursor::ByteCursor;
use crate::error::Error;

pub const S_IFSOCK: u16 = 0o140000;
pub const S_IFLNK: u16 = 0o120000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFIFO: u16 = 0o010000;

/// The `inode_type` tag. Extended variants share the basic variant's POSIX type.
#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq, Hash)]
#[deku(endian = "little", id_type = "u16")]
#[rustfmt::skip]
pub enum InodeId {
    BasicDirectory       = 1,
    BasicFile            = 2,
    BasicSymlink         = 3,
    BasicBlockDevice     = 4,
    BasicCharacterDevice = 5,
    BasicNamedPipe       = 6,
    BasicSocket          = 7,
    ExtendedDirectory       = 8,
    ExtendedFile            = 9,
    ExtendedSymlink         = 10,
    ExtendedBlockDevice     = 11,
    ExtendedCharacterDevice = 12,
    ExtendedNamedPipe       = 13,
    ExtendedSocket          = 14,
}

impl InodeId {
    /// POSIX type bits contributed by this variant, independent of basic/extended encoding.
    pub fn type_bits(self) -> u16 {
        use InodeId::*;
        match self {
            BasicDirectory | ExtendedDirectory => S_IFDIR,
            BasicFile | ExtendedFile => S_IFREG,
            BasicSymlink | ExtendedSymlink => S_IFLNK,
            BasicBlockDevice | ExtendedBlockDevice => S_IFBLK,
            BasicCharacterDevice | ExtendedCharacterDevice => S_IFCHR,
            BasicNamedPipe | ExtendedNamedPipe => S_IFIFO,
            BasicSocket | ExtendedSocket => S_IFSOCK,
        }
    }

    pub fn is_extended(self) -> bool {
        (self as u16) >= 8
    }
}

/// The 16-byte header shared by every inode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InodeHeader {
    pub inode_type: InodeId,
    pub permissions: u16,
    pub uid_idx: u16,
    pub gid_idx: u16,
    pub mtime: u32,
    pub inode_number: u32,
}

pub const HEADER_LEN: usize = 16;

impl InodeHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let mut c = ByteCursor::new(buf);
        let raw_type = c.u16()?;
        let inode_type = decode_inode_id(raw_type)?;
        Ok(Self {
            inode_type,
            permissions: c.u16()?,
            uid_idx: c.u16()?,
            gid_idx: c.u16()?,
            mtime: c.u32()?,
            inode_number: c.u32()?,
        })
    }
}

fn decode_inode_id(raw: u16) -> Result<InodeId, Error> {
    use InodeId::*;
    Ok(match raw {
        1 => BasicDirectory,
        2 => BasicFile,
        3 => BasicSymlink,
        4 => BasicBlockDevice,
        5 => BasicCharacterDevice,
        6 => BasicNamedPipe,
        7 => BasicSocket,
        8 => ExtendedDirectory,
        9 => ExtendedFile,
        10 => ExtendedSymlink,
        11 => ExtendedBlockDevice,
        12 => ExtendedCharacterDevice,
        13 => ExtendedNamedPipe,
        14 => ExtendedSocket,
        other => return Err(Error::InvalidImage(format!("unknown inode_type {other}"))),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicDirectory {
    pub start_block: u32,
    pub link_count: u32,
    pub file_size: u16,
    pub offset: u16,
    pub parent_inode: u32,
}
pub const BASIC_DIRECTORY_LEN: usize = 16;

pub fn parse_basic_directory(buf: &[u8]) -> Result<BasicDirectory, Error> {
    let mut c = ByteCursor::new(buf);
    Ok(BasicDirectory {
        start_block: c.u32()?,
        link_count: c.u32()?,
        file_size: c.u16()?,
        offset: c.u16()?,
        parent_inode: c.u32()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedDirectory {
    pub link_count: u32,
    pub file_size: u32,
    pub start_block: u32,
    pub parent_inode: u32,
    pub index_count: u16,
    pub offset: u16,
    pub xattr_index: u32,
}
pub const EXTENDED_DIRECTORY_LEN: usize = 24;

pub fn parse_extended_directory(buf: &[u8]) -> Result<ExtendedDirectory, Error> {
    let mut c = ByteCursor::new(buf);
    Ok(ExtendedDirectory {
        link_count: c.u32()?,
        file_size: c.u32()?,
        start_block: c.u32()?,
        parent_inode: c.u32()?,
        index_count: c.u16()?,
        offset: c.u16()?,
        xattr_index: c.u32()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFile {
    pub blocks_start: u32,
    pub fragment: u32,
    pub offset: u32,
    pub file_size: u32,
    pub block_sizes: Vec<u32>,
}
pub const BASIC_FILE_LEN: usize = 16;

pub fn parse_basic_file(buf: &[u8]) -> Result<(BasicFile, usize), Error> {
    let mut c = ByteCursor::new(buf);
    let blocks_start = c.u32()?;
    let fragment = c.u32()?;
    let offset = c.u32()?;
    let file_size = c.u32()?;
    Ok((
        BasicFile { blocks_start, fragment, offset, file_size, block_sizes: Vec::new() },
        BASIC_FILE_LEN,
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedFile {
    pub blocks_start: u64,
    pub file_size: u64,
    pub sparse: u64,
    pub link_count: u32,
    pub fragment: u32,
    pub offset: u32,
    pub xattr_index: u32,
    pub block_sizes: Vec<u32>,
}
pub const EXTENDED_FILE_LEN: usize = 40;

pub fn parse_extended_file(buf: &[u8]) -> Result<ExtendedFile, Error> {
    let mut c = ByteCursor::new(buf);
    Ok(ExtendedFile {
        blocks_start: c.u64()?,
        file_size: c.u64()?,
        sparse: c.u64()?,
        link_count: c.u32()?,
        fragment: c.u32()?,
        offset: c.u32()?,
        xattr_index: c.u32()?,
        block_sizes: Vec::new(),
    })
}

/// Number of block-list entries a file inode has: `ceil(file_size / block_size)` with no
/// fragment, else `file_size / block_size` with the remainder becoming the tail fragment.
pub fn block_count(file_size: u64, fragment: u32, block_size: u32) -> u32 {
    if fragment == crate::superblock::INVALID_FRAG {
        file_size.div_ceil(block_size as u64) as u32
    } else {
        (file_size / block_size as u64) as u32
    }
}

/// Parses the trailing inline array of per-block lengths.
pub fn parse_block_sizes(buf: &[u8], count: u32) -> Result<Vec<u32>, Error> {
    let mut c = ByteCursor::new(buf);
    (0..count).map(|_| c.u32()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicSymlink {
    pub link_count: u32,
    pub target_size: u32,
}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedSymlink {
    pub link_count: u32,
    pub target_size: u32,
}
pub const SYMLINK_FIXED_LEN: usize = 8;

pub fn parse_symlink_fixed(buf: &[u8]) -> Result<(u32, u32), Error> {
    let mut c = ByteCursor::new(buf);
    Ok((c.u32()?, c.u32()?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicDevice {
    pub link_count: u32,
    pub device_number: u32,
}
pub const BASIC_DEVICE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedDevice {
    pub link_count: u32,
    pub device_number: u32,
    pub xattr_index: u32,
}
pub const EXTENDED_DEVICE_LEN: usize = 12;

pub fn parse_basic_device(buf: &[u8]) -> Result<BasicDevice, Error> {
    let mut c = ByteCursor::new(buf);
    Ok(BasicDevice { link_count: c.u32()?, device_number: c.u32()? })
}

pub fn parse_extended_device(buf: &[u8]) -> Result<ExtendedDevice, Error> {
    let mut c = ByteCursor::new(buf);
    Ok(ExtendedDevice { link_count: c.u32()?, device_number: c.u32()?, xattr_index: c.u32()? })
}

impl BasicDevice {
    /// `(major, minor)`, unpacked the way the kernel's `MKDEV`/`MAJOR`/`MINOR` macros do.
    pub fn major_minor(&self) -> (u32, u32) {
        unpack_device_number(self.device_number)
    }
}

impl ExtendedDevice {
    pub fn major_minor(&self) -> (u32, u32) {
        unpack_device_number(self.device_number)
    }
}

fn unpack_device_number(dev: u32) -> (u32, u32) {
    let major = (dev & 0xfff00) >> 8;
    let minor = (dev & 0xff) | ((dev >> 12) & 0xfff00);
    (major, minor)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicIpc {
    pub link_count: u32,
}
pub const BASIC_IPC_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedIpc {
    pub link_count: u32,
    pub xattr_index: u32,
}
pub const EXTENDED_IPC_LEN: usize = 8;

pub fn parse_basic_ipc(buf: &[u8]) -> Result<BasicIpc, Error> {
    let mut c = ByteCursor::new(buf);
    Ok(BasicIpc { link_count: c.u32()? })
}

pub fn parse_extended_ipc(buf: &[u8]) -> Result<ExtendedIpc, Error> {
    let mut c = ByteCursor::new(buf);
    Ok(ExtendedIpc { link_count: c.u32()?, xattr_index: c.u32()? })
}

/// The decoded, type-specific body of an inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeInner {
    Directory(BasicDirectory),
    ExtendedDirectory(ExtendedDirectory),
    File(BasicFile),
    ExtendedFile(ExtendedFile),
    Symlink { link_count: u32, target: Vec<u8> },
    ExtendedSymlink { link_count: u32, target: Vec<u8> },
    BlockDevice(BasicDevice),
    ExtendedBlockDevice(ExtendedDevice),
    CharacterDevice(BasicDevice),
    ExtendedCharacterDevice(ExtendedDevice),
    NamedPipe(BasicIpc),
    ExtendedNamedPipe(ExtendedIpc),
    Socket(BasicIpc),
    ExtendedSocket(ExtendedIpc),
}

/// The fixed-size portion of each variant's layout (excludes any trailing block list / symlink
/// target, which is read in a second pass once its length is known).
pub fn fixed_body_len(id: InodeId) -> usize {
    use InodeId::*;
    match id {
        BasicDirectory => BASIC_DIRECTORY_LEN,
        ExtendedDirectory => EXTENDED_DIRECTORY_LEN,
        BasicFile => BASIC_FILE_LEN,
        ExtendedFile => EXTENDED_FILE_LEN,
        BasicSymlink | ExtendedSymlink => SYMLINK_FIXED_LEN,
        BasicBlockDevice | BasicCharacterDevice => BASIC_DEVICE_LEN,
        ExtendedBlockDevice | ExtendedCharacterDevice => EXTENDED_DEVICE_LEN,
        BasicNamedPipe | BasicSocket => BASIC_IPC_LEN,
        ExtendedNamedPipe | ExtendedSocket => EXTENDED_IPC_LEN,
    }
}

/// A fully materialized inode: its header, decoded body, and the `(block, offset)` address it
/// was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeData {
    pub header: InodeHeader,
    pub inner: InodeInner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_and_extended_share_type_bits() {
        assert_eq!(InodeId::BasicFile.type_bits(), InodeId::ExtendedFile.type_bits());
        assert_eq!(InodeId::BasicFile.type_bits(), S_IFREG);
        assert!(!InodeId::BasicFile.is_extended());
        assert!(InodeId::ExtendedFile.is_extended());
    }

    #[test]
    fn header_parse_round_trip() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u16.to_le_bytes()); // BasicFile
        buf.extend_from_slice(&0o644u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&99u32.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());

        let header = InodeHeader::parse(&buf).unwrap();
        assert_eq!(header.inode_type, InodeId::BasicFile);
        assert_eq!(header.permissions, 0o644);
        assert_eq!(header.uid_idx, 1);
        assert_eq!(header.gid_idx, 2);
        assert_eq!(header.mtime, 99);
        assert_eq!(header.inode_number, 7);
    }

    #[test]
    fn header_parse_rejects_unknown_type() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&99u16.to_le_bytes());
        assert!(InodeHeader::parse(&buf).is_err());
    }

    #[test]
    fn block_count_without_fragment_rounds_up() {
        assert_eq!(block_count(4096, crate::superblock::INVALID_FRAG, 4096), 1);
        assert_eq!(block_count(4097, crate::superblock::INVALID_FRAG, 4096), 2);
        assert_eq!(block_count(0, crate::superblock::INVALID_FRAG, 4096), 0);
    }

    #[test]
    fn block_count_with_fragment_excludes_tail() {
        // 9000 bytes over a 4096 block size leaves a tail fragment after two full blocks.
        assert_eq!(block_count(9000, 0, 4096), 2);
    }

    #[test]
    fn parse_block_sizes_reads_n_entries() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(2u32 | (1 << 24)).to_le_bytes());
        let sizes = parse_block_sizes(&buf, 2).unwrap();
        assert_eq!(sizes, vec![1, 2 | (1 << 24)]);
    }

    #[test]
    fn device_number_unpacks_major_minor() {
        // major=8, minor=1 packed the way MKDEV does: (major<<8)|minor for the low bits.
        let dev = BasicDevice { link_count: 1, device_number: (8 << 8) | 1 };
        assert_eq!(dev.major_minor(), (8, 1));
    }
}

impl InodeData {
    pub fn mode(&self) -> u16 {
        self.header.permissions | self.header.inode_type.type_bits()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.inner, InodeInner::Directory(_) | InodeInner::ExtendedDirectory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.inner, InodeInner::File(_) | InodeInner::ExtendedFile(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.inner, InodeInner::Symlink { .. } | InodeInner::ExtendedSymlink { .. })
    }

    pub fn is_block_device(&self) -> bool {
        matches!(self.inner, InodeInner::BlockDevice(_) | InodeInner::ExtendedBlockDevice(_))
    }

    pub fn is_character_device(&self) -> bool {
        matches!(self.inner, InodeInner::CharacterDevice(_) | InodeInner::ExtendedCharacterDevice(_))
    }

    pub fn is_fifo(&self) -> bool {
        matches!(self.inner, InodeInner::NamedPipe(_) | InodeInner::ExtendedNamedPipe(_))
    }

    pub fn is_socket(&self) -> bool {
        matches!(self.inner, InodeInner::Socket(_) | InodeInner::ExtendedSocket(_))
    }

    /// `file_size` for directories/files, `symlink_size` for symlinks, `None` otherwise.
    pub fn size(&self) -> Option<u64> {
        match &self.inner {
            InodeInner::Directory(d) => Some(d.file_size as u64),
            InodeInner::ExtendedDirectory(d) => Some(d.file_size as u64),
            InodeInner::File(f) => Some(f.file_size as u64),
            InodeInner::ExtendedFile(f) => Some(f.file_size),
            InodeInner::Symlink { target, .. } => Some(target.len() as u64),
            InodeInner::ExtendedSymlink { target, .. } => Some(target.len() as u64),
            _ => None,
        }
    }
}
