//! A seekable, lazily-decoded stream over a regular file's content: full blocks, sparse
//! (all-zero) blocks, and a trailing fragment, addressed through a precomputed run table.

use std::io::{self, Read, Seek, SeekFrom};

use crate::block::ReadSeek;
use crate::error::Error;
use crate::inode::InodeData;
use crate::reader::SquashfsReader;
use crate::superblock::INVALID_FRAG;

#[derive(Debug, Clone, Copy)]
struct Run {
    /// Framed on-disk length (0 means sparse), with the compressed-bit already masked off.
    raw_len: u32,
    /// Decompressed length this run contributes to the file's logical content.
    logical_len: u32,
    is_fragment: bool,
}

/// A seekable view over one file inode's content.
pub struct FileStream<'r, R> {
    reader: &'r SquashfsReader<R>,
    runs: Vec<Run>,
    /// Cumulative logical offset at the start of each run; `logical_offset.len() == runs.len()`.
    logical_offset: Vec<u64>,
    /// Absolute on-disk offset at the start of each non-fragment run.
    physical_start: Vec<u64>,
    size: u64,
    fragment_index: u32,
    fragment_offset: u32,
    pos: u64,
}

impl<'r, R: ReadSeek> FileStream<'r, R> {
    pub(crate) fn new(reader: &'r SquashfsReader<R>, data: &InodeData) -> Result<Self, Error> {
        let (blocks_start, fragment, frag_offset, file_size, block_sizes): (u64, u32, u32, u64, &[u32]) =
            match &data.inner {
                crate::inode::InodeInner::File(f) => {
                    (f.blocks_start as u64, f.fragment, f.offset, f.file_size as u64, &f.block_sizes)
                }
                crate::inode::InodeInner::ExtendedFile(f) => {
                    (f.blocks_start, f.fragment, f.offset, f.file_size, &f.block_sizes)
                }
                _ => return Err(Error::NotAFile),
            };

        let block_size = reader.superblock().block_size;
        let n = block_sizes.len();
        let mut runs = Vec::with_capacity(n + 1);
        let mut logical_offset = Vec::with_capacity(n + 1);
        let mut physical_start = Vec::with_capacity(n + 1);

        let mut logical_cursor: u64 = 0;
        let mut physical_cursor: u64 = blocks_start;

        for (i, &raw) in block_sizes.iter().enumerate() {
            let masked = raw & !crate::superblock::COMPRESSED_BIT_BLOCK;
            let logical = if i + 1 == n && fragment == INVALID_FRAG {
                file_size - logical_cursor
            } else {
                block_size as u64
            };

            logical_offset.push(logical_cursor);
            physical_start.push(physical_cursor);
            runs.push(Run { raw_len: raw, logical_len: logical as u32, is_fragment: false });

            logical_cursor += logical;
            physical_cursor += masked as u64;
        }

        if fragment != INVALID_FRAG {
            let tail = file_size - logical_cursor;
            logical_offset.push(logical_cursor);
            physical_start.push(0);
            runs.push(Run { raw_len: 0, logical_len: tail as u32, is_fragment: true });
        }

        Ok(Self {
            reader,
            runs,
            logical_offset,
            physical_start,
            size: file_size,
            fragment_index: fragment,
            fragment_offset: frag_offset,
            pos: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    fn run_index_for(&self, offset: u64) -> usize {
        match self.logical_offset.binary_search(&offset) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    /// Reads up to `length` bytes starting at `offset`, stopping early at end-of-file. Never
    /// reads past the file's logical size even if `offset + length` would overrun it.
    pub fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(length);
        if offset >= self.size || length == 0 {
            return Ok(out);
        }

        let mut offset = offset;
        let mut remaining = length.min((self.size - offset) as usize);
        let mut run_idx = self.run_index_for(offset);

        while remaining > 0 && run_idx < self.runs.len() {
            let run = self.runs[run_idx];
            let run_start = self.logical_offset[run_idx];
            let in_run = (offset - run_start) as usize;
            let run_remaining = run.logical_len as usize - in_run;
            let want = remaining.min(run_remaining);
            if want == 0 {
                break;
            }

            if run.is_fragment {
                out.extend_from_slice(&self.read_fragment_range(in_run as u32, want as u32)?);
            } else if run.raw_len == 0 {
                out.extend(std::iter::repeat(0u8).take(want));
            } else {
                let (_, payload) = self.reader.io().read_block(self.physical_start[run_idx], Some(run.raw_len))?;
                out.extend_from_slice(&payload[in_run..in_run + want]);
            }

            offset += want as u64;
            remaining -= want;
            run_idx += 1;
        }

        Ok(out)
    }

    fn read_fragment_range(&self, extra_offset: u32, want: u32) -> Result<Vec<u8>, Error> {
        let frag = self.reader.lookup_fragment(self.fragment_index)?;
        let (_, payload) = self.reader.io().read_block(frag.start, Some(frag.size))?;
        let start = (self.fragment_offset + extra_offset) as usize;
        let end = start + want as usize;
        if end > payload.len() {
            return Err(Error::ShortRead { at: frag.start, requested: end, got: payload.len() });
        }
        Ok(payload[start..end].to_vec())
    }
}

impl<'r, R: ReadSeek> Read for FileStream<'r, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.read_at(self.pos, buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }
}

impl<'r, R: ReadSeek> Seek for FileStream<'r, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.size as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}
