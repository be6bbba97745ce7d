//! A read-only, lazily-decoding reader for SquashFS 4.x filesystem images.
//!
//! Opening an image parses the superblock and loads the three small indirection tables (id,
//! inode-lookup, fragment); everything else — inode bodies, directory entries, file content — is
//! decoded on demand and cached behind bounded LRU caches. See [`SquashfsReader`] for the entry
//! point.

mod block;
mod compressor;
mod cursor;
mod dir;
mod filestream;
mod fragment;
mod id;
mod inode;
mod metadata;
mod os_str;
mod reader;
mod tables;

pub mod error;
pub mod superblock;

pub use block::ReadSeek;
pub use compressor::{CompressionOptions, Compressor, Gzip, Lz4, Lzo, Xz, Zstd};
pub use error::Error;
pub use filestream::FileStream;
pub use fragment::Fragment;
pub use inode::InodeId;
pub use reader::{Inode, SquashfsReader, DEFAULT_CACHE_CAPACITY};
pub use superblock::SuperBlock;

/// Opens a SquashFS image from any [`ReadSeek`] byte source.
pub fn open<R: ReadSeek>(source: R) -> Result<SquashfsReader<R>, Error> {
    SquashfsReader::open(source)
}
