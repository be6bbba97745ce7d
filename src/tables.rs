//! Indirection tables: id table, inode-lookup table, fragment table. Each is an array of
//! absolute 64-bit block offsets loaded eagerly at open; individual entries are resolved lazily
//! through the metadata stream and cached by the caller.

use std::io::{Read, Seek, SeekFrom};

use crate::error::Error;
use crate::superblock::{INVALID_BLK, METADATA_SIZE};

/// The array of metadata-block pointers backing one indirection table.
#[derive(Debug, Clone, Default)]
pub(crate) struct PointerTable {
    pointers: Vec<u64>,
}

impl PointerTable {
    /// Loads the pointer array for a table of `count` entries of `entry_size` bytes, anchored
    /// at absolute offset `start`. An absent table (`start == INVALID_BLK` or `count == 0`)
    /// loads as empty.
    pub fn load<R: Read + Seek>(source: &mut R, start: u64, count: u64, entry_size: u64) -> Result<Self, Error> {
        if start == INVALID_BLK || count == 0 {
            return Ok(Self::default());
        }

        let num_blocks = (count * entry_size).div_ceil(METADATA_SIZE as u64);
        source.seek(SeekFrom::Start(start))?;
        let mut pointers = Vec::with_capacity(num_blocks as usize);
        let mut buf = [0u8; 8];
        for _ in 0..num_blocks {
            source.read_exact(&mut buf).map_err(|_| Error::ShortRead {
                at: start,
                requested: 8,
                got: 0,
            })?;
            pointers.push(u64::from_le_bytes(buf));
        }
        Ok(Self { pointers })
    }

    /// `(metadata-block-pointer, offset-within-that-block)` for `index` in a table whose
    /// entries are `entry_size` bytes.
    pub fn entry_addr(&self, index: u64, entry_size: u64) -> Result<(u64, usize), Error> {
        let byte_offset = index * entry_size;
        let bucket = (byte_offset / METADATA_SIZE as u64) as usize;
        let within = (byte_offset % METADATA_SIZE as u64) as usize;
        let block = *self.pointers.get(bucket).ok_or(Error::InvalidImage(format!(
            "table index {index} falls outside of the loaded pointer array"
        )))?;
        Ok((block, within))
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}
