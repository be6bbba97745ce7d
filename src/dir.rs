//! Decoding of the directory table: a sequence of directory headers, each followed by the
//! entries that share its `start_block`/base inode number.

use std::ffi::OsStr;
use std::path::{Component, Path};

use deku::prelude::*;

use crate::error::Error;
use crate::inode::InodeId;
use crate::os_str::OsStrExt;

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct DirHeader {
    /// One less than the number of entries following this header.
    pub count: u32,
    /// Inode-table-relative block (relative to `inode_table_start`) where the entries' own
    /// inodes live.
    pub start_block: u32,
    /// Base inode number; entries store their inode number as a signed delta from this.
    pub inode_number: u32,
}

#[derive(Debug, DekuRead, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct DirEntryHeader {
    /// Offset into the uncompressed inode metadata block named by the enclosing header.
    pub offset: u16,
    /// Signed delta from the header's base inode number.
    pub inode_number: i16,
    /// Basic inode type (extended inodes still record their basic type here).
    pub inode_type: InodeId,
    /// One less than the length of the entry's name.
    pub name_size: u16,
}

/// A fully decoded directory entry: header plus name and resolved addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub start_block: u32,
    pub offset: u16,
    pub inode_number: u32,
    pub inode_type: InodeId,
    pub name: Vec<u8>,
}

impl DirEntry {
    pub fn name(&self) -> Result<&Path, Error> {
        if self.name == Component::RootDir.as_os_str().as_bytes() {
            return Ok(Path::new(Component::RootDir.as_os_str()));
        }
        let path = Path::new(OsStr::from_bytes(&self.name));
        let filename = path.file_name().map(OsStrExt::as_bytes);
        if filename != Some(&self.name) {
            return Err(Error::InvalidImage("directory entry name is not a plain filename".into()));
        }
        Ok(path)
    }
}
