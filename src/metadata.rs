//! Walks metadata blocks, concatenating payload bytes until a requested length is satisfied.

use crate::block::{BlockIo, ReadSeek};
use crate::error::Error;

/// Reads `length` bytes starting `offset` bytes into the metadata block at `block`, crossing
/// block boundaries as needed. Returns the concatenated bytes plus the `(block, offset)` cursor
/// to resume from.
pub(crate) fn read_metadata<R: ReadSeek>(
    io: &BlockIo<R>,
    mut block: u64,
    mut offset: usize,
    mut length: usize,
) -> Result<(u64, usize, Vec<u8>), Error> {
    let mut out = Vec::with_capacity(length);
    while length > 0 {
        let (next_block, data) = io.read_block(block, None)?;
        if offset > data.len() {
            return Err(Error::ShortRead { at: block, requested: offset, got: data.len() });
        }
        let remaining = data.len() - offset;
        if remaining <= length {
            out.extend_from_slice(&data[offset..]);
            length -= remaining;
            block = next_block;
            offset = 0;
        } else {
            out.extend_from_slice(&data[offset..offset + length]);
            offset += length;
            length = 0;
        }
    }
    Ok((block, offset, out))
}
