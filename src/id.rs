//! The id lookup table resolves inode `uid`/`gid` indices to real numeric ids.

use deku::prelude::*;

/// A single 32-bit user or group id, as stored in the id table.
#[derive(Debug, Copy, Clone, DekuRead, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct Id {
    pub num: u32,
}

impl Id {
    pub const SIZE: usize = 4;
}
