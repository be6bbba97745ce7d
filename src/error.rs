//! Errors

use std::io;

use thiserror::Error;

use crate::compressor::Compressor;

/// Errors produced while opening or reading a SquashFS image.
#[derive(Error, Debug)]
pub enum Error {
    #[error("std io error: {0}")]
    Io(#[from] io::Error),

    #[error("deku error: {0:?}")]
    Deku(#[from] deku::DekuError),

    #[error("invalid squashfs image: {0}")]
    InvalidImage(String),

    #[error("unsupported squashfs version {major}.{minor}, only 4.x is supported")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(Compressor),

    #[error("failed to decompress block with {compressor:?}: {reason}")]
    DecompressFailed { compressor: Compressor, reason: String },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not a directory")]
    NotADirectory,

    #[error("not a file")]
    NotAFile,

    #[error("not a symlink")]
    NotASymlink,

    #[error("index {index} out of range [1, {max}]")]
    IndexOutOfRange { index: u64, max: u64 },

    #[error("short read at offset {at}: requested {requested} bytes, got {got}")]
    ShortRead { at: u64, requested: usize, got: usize },
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
