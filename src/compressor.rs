//! Decompressor façade: a capability `decompress(bytes, out_capacity) -> bytes` keyed by the
//! superblock's compression id, plus the on-disk layout of the optional compression-options
//! payload that may follow the superblock.

use deku::prelude::*;
use tracing::trace;

use crate::error::Error;

/// Compression algorithm id stored in the superblock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, Default)]
#[deku(endian = "little", id_type = "u16")]
#[rustfmt::skip]
pub enum Compressor {
    None = 0,
    Gzip = 1,
    Lzma = 2,
    Lzo  = 3,
    #[default]
    Xz   = 4,
    Lz4  = 5,
    Zstd = 6,
}

/// Codec-specific options payload, present only when
/// [`crate::superblock::Flags::COMPRESSOR_OPTIONS_ARE_PRESENT`] is set.
#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little", ctx = "compressor: Compressor")]
#[deku(id = "compressor")]
pub enum CompressionOptions {
    #[deku(id = "Compressor::Gzip")]
    Gzip(Gzip),
    #[deku(id = "Compressor::Lzo")]
    Lzo(Lzo),
    #[deku(id = "Compressor::Xz")]
    Xz(Xz),
    #[deku(id = "Compressor::Lz4")]
    Lz4(Lz4),
    #[deku(id = "Compressor::Zstd")]
    Zstd(Zstd),
    #[deku(id = "Compressor::Lzma")]
    Lzma,
    #[deku(id = "Compressor::None")]
    None,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Gzip {
    pub compression_level: u32,
    pub window_size: u16,
    pub strategies: u16,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Lzo {
    pub algorithm: u32,
    pub compression_level: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Xz {
    pub dictionary_size: u32,
    pub filters: u32,
    #[deku(cond = "!deku::reader.end()")]
    pub bit_opts: Option<u16>,
    #[deku(cond = "!deku::reader.end()")]
    pub fb: Option<u16>,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Lz4 {
    pub version: u32,
    pub flags: u32,
}

#[derive(Debug, DekuRead, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "little")]
pub struct Zstd {
    pub compression_level: u32,
}

/// Decompresses `bytes` (produced by one codec, selected by the superblock) into a buffer no
/// larger than `out_capacity`.
///
/// A codec that is unknown, or was compiled out via Cargo features, reports
/// [`Error::UnsupportedCompression`] rather than failing the whole build.
pub fn decompress(compressor: Compressor, bytes: &[u8], out_capacity: usize) -> Result<Vec<u8>, Error> {
    trace!(?compressor, len = bytes.len(), out_capacity, "decompress");
    let mut out = Vec::with_capacity(out_capacity.min(1 << 20));
    match compressor {
        Compressor::None => out.extend_from_slice(bytes),
        #[cfg(feature = "any-gzip")]
        Compressor::Gzip => {
            use std::io::Read;
            let mut decoder = flate2::read::ZlibDecoder::new(bytes);
            decoder.read_to_end(&mut out).map_err(|e| Error::DecompressFailed {
                compressor,
                reason: e.to_string(),
            })?;
        }
        #[cfg(feature = "xz")]
        Compressor::Xz => {
            use std::io::Read;
            let mut decoder = xz2::read::XzDecoder::new(bytes);
            decoder.read_to_end(&mut out).map_err(|e| Error::DecompressFailed {
                compressor,
                reason: e.to_string(),
            })?;
        }
        #[cfg(feature = "lzo")]
        Compressor::Lzo => {
            out.resize(out_capacity, 0);
            let (written, error) = rust_lzo::LZOContext::decompress_to_slice(bytes, &mut out);
            let written = written.len();
            out.truncate(written);
            if error != rust_lzo::LZOError::OK {
                return Err(Error::DecompressFailed {
                    compressor,
                    reason: format!("{error:?}"),
                });
            }
        }
        #[cfg(feature = "zstd")]
        Compressor::Zstd => {
            let mut decoder = zstd::bulk::Decompressor::new().map_err(|e| Error::DecompressFailed {
                compressor,
                reason: e.to_string(),
            })?;
            decoder.decompress_to_buffer(bytes, &mut out).map_err(|e| Error::DecompressFailed {
                compressor,
                reason: e.to_string(),
            })?;
        }
        #[cfg(feature = "lz4")]
        Compressor::Lz4 => {
            out.resize(out_capacity, 0);
            let written = lz4_flex::decompress_into(bytes, &mut out).map_err(|e| Error::DecompressFailed {
                compressor,
                reason: e.to_string(),
            })?;
            out.truncate(written);
        }
        _ => return Err(Error::UnsupportedCompression(compressor)),
    }
    Ok(out)
}
