//! Reads and decompresses a single metadata or data block, with an LRU cache keyed by the
//! block's absolute starting offset.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use lru::LruCache;
use solana_nohash_hasher::BuildNoHashHasher;
use tracing::trace;

use crate::compressor::{self, Compressor};
use crate::error::Error;
use crate::superblock::{COMPRESSED_BIT_BLOCK, COMPRESSED_BIT_METADATA, METADATA_SIZE};

/// Anything the reader can read and seek within. `!Send`/`!Sync` by design: see §5 of the
/// design notes — a reader is exclusively owned by its caller, not shared across threads.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Block offsets are already well-distributed small integers; hashing them is wasted work.
type OffsetCache<V> = LruCache<u64, V, BuildNoHashHasher<u64>>;

pub(crate) struct BlockIo<R> {
    source: RefCell<R>,
    compressor: Compressor,
    block_size: u32,
    cache: RefCell<OffsetCache<(u64, Vec<u8>)>>,
}

impl<R: ReadSeek> BlockIo<R> {
    pub fn new(source: R, compressor: Compressor, block_size: u32, cache_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(cache_capacity.max(1)).unwrap();
        Self {
            source: RefCell::new(source),
            compressor,
            block_size,
            cache: RefCell::new(LruCache::with_hasher(cap, BuildNoHashHasher::default())),
        }
    }

    /// Reads a block at `block_offset`. `length_hint` selects data-block mode (caller supplies
    /// the framed length from a block-list or fragment entry) vs. metadata-block mode (a 16-bit
    /// length prefix is read from the stream).
    ///
    /// Returns `(next_offset, decompressed payload)`.
    pub fn read_block(&self, block_offset: u64, length_hint: Option<u32>) -> Result<(u64, Vec<u8>), Error> {
        if let Some(cached) = self.cache.borrow_mut().get(&block_offset) {
            return Ok(cached.clone());
        }

        let result = match length_hint {
            Some(hint) => self.read_data_block(block_offset, hint)?,
            None => self.read_metadata_block(block_offset)?,
        };

        self.cache.borrow_mut().put(block_offset, result.clone());
        Ok(result)
    }

    fn read_data_block(&self, block_offset: u64, hint: u32) -> Result<(u64, Vec<u8>), Error> {
        let compressed = hint & COMPRESSED_BIT_BLOCK == 0;
        let len = (hint & !COMPRESSED_BIT_BLOCK) as usize;
        let raw = self.read_exact_at(block_offset, len)?;
        let next_offset = block_offset + len as u64;

        let payload = if compressed {
            trace!(block_offset, len, "decompressing data block");
            compressor::decompress(self.compressor, &raw, self.block_size as usize)?
        } else {
            raw
        };
        Ok((next_offset, payload))
    }

    fn read_metadata_block(&self, block_offset: u64) -> Result<(u64, Vec<u8>), Error> {
        let prefix = self.read_exact_at(block_offset, 2)?;
        let raw_len = u16::from_le_bytes([prefix[0], prefix[1]]);
        let compressed = raw_len & COMPRESSED_BIT_METADATA == 0;
        let len = (raw_len & !COMPRESSED_BIT_METADATA) as usize;

        let raw = self.read_exact_at(block_offset + 2, len)?;
        let next_offset = block_offset + 2 + len as u64;

        let payload = if compressed {
            trace!(block_offset, len, "decompressing metadata block");
            compressor::decompress(self.compressor, &raw, METADATA_SIZE)?
        } else {
            raw
        };
        Ok((next_offset, payload))
    }

    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let mut source = self.source.borrow_mut();
        source.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let got = read_as_much_as_possible(&mut *source, &mut buf)?;
        if got != len {
            return Err(Error::ShortRead { at: offset, requested: len, got });
        }
        Ok(buf)
    }
}

fn read_as_much_as_possible<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
