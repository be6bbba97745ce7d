//! The reader: opens an image, loads the indirection tables, and materializes inodes on demand.
//! Inode handles are cheap values that borrow back into the reader; nothing beyond the three
//! indirection tables is loaded eagerly.

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use deku::prelude::*;
use lru::LruCache;
use solana_nohash_hasher::BuildNoHashHasher;
use tracing::{debug, error, info};

use crate::block::{BlockIo, ReadSeek};
use crate::compressor::CompressionOptions;
use crate::dir::{DirEntry, DirEntryHeader, DirHeader};
use crate::error::Error;
use crate::fragment::Fragment;
use crate::id::Id;
use crate::inode::{self, InodeData, InodeHeader, InodeId, InodeInner};
use crate::metadata;
use crate::superblock::{self, SuperBlock};
use crate::tables::PointerTable;

/// Default capacity for each of the reader's bounded LRU caches.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

const SUPERBLOCK_LEN: usize = 96;

/// An opened SquashFS image. Owns the byte source exclusively; see the crate-level design notes
/// on why caches use `RefCell` rather than a mutex.
pub struct SquashfsReader<R> {
    superblock: SuperBlock,
    compression_options: Option<CompressionOptions>,
    io: BlockIo<R>,
    id_table: PointerTable,
    inode_lookup_table: PointerTable,
    fragment_table: PointerTable,
    id_cache: RefCell<LruCache<u16, u32, BuildNoHashHasher<u16>>>,
    fragment_cache: RefCell<LruCache<u32, Fragment, BuildNoHashHasher<u32>>>,
    inode_cache: RefCell<LruCache<u32, ((u64, u16), InodeData), BuildNoHashHasher<u32>>>,
    root_addr: (u64, u16),
    root_data: InodeData,
}

impl<R: ReadSeek> SquashfsReader<R> {
    /// Opens an image, parsing the superblock and loading the three indirection tables.
    pub fn open(source: R) -> Result<Self, Error> {
        Self::open_with_cache_capacity(source, DEFAULT_CACHE_CAPACITY)
    }

    /// Like [`Self::open`] but with an explicit LRU capacity for every bounded cache
    /// (block I/O, id lookup, fragment lookup, inode lookup). A capacity of `0` behaves as `1`
    /// for implementation reasons but the design intent — identical results regardless of
    /// cache size — holds at any capacity.
    pub fn open_with_cache_capacity(mut source: R, cache_capacity: usize) -> Result<Self, Error> {
        source.seek(SeekFrom::Start(0))?;
        let mut sb_buf = [0u8; SUPERBLOCK_LEN];
        source.read_exact(&mut sb_buf).map_err(|_| Error::ShortRead {
            at: 0,
            requested: SUPERBLOCK_LEN,
            got: 0,
        })?;
        let (_, superblock) = SuperBlock::from_bytes((&sb_buf, 0))?;
        if let Err(e) = superblock.validate() {
            error!("superblock failed validation: {e}");
            return Err(e);
        }
        debug!(
            block_size = superblock.block_size,
            compressor = ?superblock.compressor,
            inodes = superblock.inode_count,
            fragments = superblock.frag_count,
            "parsed superblock"
        );

        let id_table = PointerTable::load(&mut source, superblock.id_table_start, superblock.id_count as u64, Id::SIZE as u64)?;
        let inode_lookup_table = PointerTable::load(
            &mut source,
            superblock.lookup_table_start,
            superblock.inode_count as u64,
            8,
        )?;
        let fragment_table = PointerTable::load(
            &mut source,
            superblock.fragment_table_start,
            superblock.frag_count as u64,
            crate::fragment::SIZE as u64,
        )?;

        let io = BlockIo::new(source, superblock.compressor, superblock.block_size, cache_capacity);

        let compression_options = if superblock.compressor_options_are_present() {
            let (_, payload) = io.read_block(SUPERBLOCK_LEN as u64, None)?;
            let mut cursor = std::io::Cursor::new(payload);
            let mut deku_reader = Reader::new(&mut cursor);
            Some(CompressionOptions::from_reader_with_ctx(&mut deku_reader, superblock.compressor)?)
        } else {
            None
        };

        let cap = NonZeroUsize::new(cache_capacity.max(1)).unwrap();
        let mut reader = Self {
            superblock,
            compression_options,
            io,
            id_table,
            inode_lookup_table,
            fragment_table,
            id_cache: RefCell::new(LruCache::with_hasher(cap, BuildNoHashHasher::default())),
            fragment_cache: RefCell::new(LruCache::with_hasher(cap, BuildNoHashHasher::default())),
            inode_cache: RefCell::new(LruCache::with_hasher(cap, BuildNoHashHasher::default())),
            root_addr: (0, 0),
            root_data: dummy_inode_data(),
        };

        let root_addr = superblock::unpack_inode_addr(reader.superblock.root_inode);
        let root_data = reader.materialize(root_addr.0, root_addr.1)?;
        reader.root_addr = root_addr;
        reader.root_data = root_data;

        info!("opened squashfs image: {} inodes", reader.superblock.inode_count);
        Ok(reader)
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn compression_options(&self) -> Option<&CompressionOptions> {
        self.compression_options.as_ref()
    }

    pub(crate) fn io(&self) -> &BlockIo<R> {
        &self.io
    }

    /// The root directory inode.
    pub fn root(&self) -> Inode<'_, R> {
        Inode {
            reader: self,
            addr: self.root_addr,
            parent_addr: self.root_addr,
            name: b"/".to_vec(),
            data: self.root_data.clone(),
        }
    }

    /// Resolves a `/`-separated path starting at the root.
    pub fn get(&self, path: &str) -> Result<Inode<'_, R>, Error> {
        self.root().get(path)
    }

    /// Materializes the inode at a packed `(block << 16) | offset` address.
    pub fn get_by_packed_address(&self, packed: u64) -> Result<Inode<'_, R>, Error> {
        let (block, offset) = superblock::unpack_inode_addr(packed);
        let data = self.materialize(block, offset)?;
        Ok(Inode { reader: self, addr: (block, offset), parent_addr: (block, offset), name: Vec::new(), data })
    }

    /// Iterates every inode in the image, in ascending inode-number order.
    pub fn iter_inodes(&self) -> impl Iterator<Item = Result<Inode<'_, R>, Error>> + '_ {
        (1..=self.superblock.inode_count).map(move |n| self.lookup_inode_number(n))
    }

    fn lookup_inode_number(&self, n: u32) -> Result<Inode<'_, R>, Error> {
        if n == 0 || n as u64 > self.superblock.inode_count as u64 {
            return Err(Error::IndexOutOfRange { index: n as u64, max: self.superblock.inode_count as u64 });
        }

        if let Some((addr, data)) = self.inode_cache.borrow_mut().get(&n) {
            return Ok(Inode {
                reader: self,
                addr: *addr,
                parent_addr: *addr,
                name: Vec::new(),
                data: data.clone(),
            });
        }

        let (block, within) = self.inode_lookup_table.entry_addr((n - 1) as u64, 8)?;
        let (_, _, bytes) = metadata::read_metadata(&self.io, block, within, 8)?;
        let packed = u64::from_le_bytes(bytes.try_into().unwrap());
        let addr = superblock::unpack_inode_addr(packed);
        let data = self.materialize(addr.0, addr.1)?;

        self.inode_cache.borrow_mut().put(n, (addr, data.clone()));
        Ok(Inode { reader: self, addr, parent_addr: addr, name: Vec::new(), data })
    }

    /// Resolves a `uid`/`gid` index to the real numeric id.
    pub(crate) fn lookup_id(&self, idx: u16) -> Result<u32, Error> {
        if let Some(v) = self.id_cache.borrow_mut().get(&idx) {
            return Ok(*v);
        }
        let (block, within) = self.id_table.entry_addr(idx as u64, Id::SIZE as u64)?;
        let (_, _, bytes) = metadata::read_metadata(&self.io, block, within, Id::SIZE)?;
        let num = u32::from_le_bytes(bytes.try_into().unwrap());
        self.id_cache.borrow_mut().put(idx, num);
        Ok(num)
    }

    pub(crate) fn lookup_fragment(&self, idx: u32) -> Result<Fragment, Error> {
        if let Some(f) = self.fragment_cache.borrow_mut().get(&idx) {
            return Ok(*f);
        }
        let (block, within) = self.fragment_table.entry_addr(idx as u64, crate::fragment::SIZE as u64)?;
        let (_, _, bytes) = metadata::read_metadata(&self.io, block, within, crate::fragment::SIZE)?;
        let (_, frag) = Fragment::from_bytes((&bytes, 0))?;
        self.fragment_cache.borrow_mut().put(idx, frag);
        Ok(frag)
    }

    /// Decodes an inode at a `(block, offset)` address, where `block` is relative to
    /// `inode_table_start`.
    fn materialize(&self, block: u64, offset: u16) -> Result<InodeData, Error> {
        let abs_block = self.superblock.inode_table_start + block;

        let (nb, noff, hdr_bytes) = metadata::read_metadata(&self.io, abs_block, offset as usize, inode::HEADER_LEN)?;
        let header = InodeHeader::parse(&hdr_bytes)?;

        let fixed_len = inode::fixed_body_len(header.inode_type);
        let (nb2, noff2, fixed_bytes) = metadata::read_metadata(&self.io, nb, noff, fixed_len)?;

        let inner = self.decode_body(header.inode_type, &fixed_bytes, nb2, noff2)?;
        Ok(InodeData { header, inner })
    }

    fn decode_body(
        &self,
        id: InodeId,
        fixed_bytes: &[u8],
        tail_block: u64,
        tail_offset: usize,
    ) -> Result<InodeInner, Error> {
        use InodeId::*;
        Ok(match id {
            BasicDirectory => InodeInner::Directory(inode::parse_basic_directory(fixed_bytes)?),
            ExtendedDirectory => InodeInner::ExtendedDirectory(inode::parse_extended_directory(fixed_bytes)?),
            BasicFile => {
                let (mut f, _) = inode::parse_basic_file(fixed_bytes)?;
                let count = inode::block_count(f.file_size as u64, f.fragment, self.superblock.block_size);
                let (_, _, bs) = metadata::read_metadata(&self.io, tail_block, tail_offset, count as usize * 4)?;
                f.block_sizes = inode::parse_block_sizes(&bs, count)?;
                InodeInner::File(f)
            }
            ExtendedFile => {
                let mut f = inode::parse_extended_file(fixed_bytes)?;
                let count = inode::block_count(f.file_size, f.fragment, self.superblock.block_size);
                let (_, _, bs) = metadata::read_metadata(&self.io, tail_block, tail_offset, count as usize * 4)?;
                f.block_sizes = inode::parse_block_sizes(&bs, count)?;
                InodeInner::ExtendedFile(f)
            }
            BasicSymlink => {
                let (link_count, target_size) = inode::parse_symlink_fixed(fixed_bytes)?;
                let (_, _, target) = metadata::read_metadata(&self.io, tail_block, tail_offset, target_size as usize)?;
                InodeInner::Symlink { link_count, target }
            }
            ExtendedSymlink => {
                let (link_count, target_size) = inode::parse_symlink_fixed(fixed_bytes)?;
                let (_, _, target) = metadata::read_metadata(&self.io, tail_block, tail_offset, target_size as usize)?;
                InodeInner::ExtendedSymlink { link_count, target }
            }
            BasicBlockDevice => InodeInner::BlockDevice(inode::parse_basic_device(fixed_bytes)?),
            ExtendedBlockDevice => InodeInner::ExtendedBlockDevice(inode::parse_extended_device(fixed_bytes)?),
            BasicCharacterDevice => InodeInner::CharacterDevice(inode::parse_basic_device(fixed_bytes)?),
            ExtendedCharacterDevice => {
                InodeInner::ExtendedCharacterDevice(inode::parse_extended_device(fixed_bytes)?)
            }
            BasicNamedPipe => InodeInner::NamedPipe(inode::parse_basic_ipc(fixed_bytes)?),
            ExtendedNamedPipe => InodeInner::ExtendedNamedPipe(inode::parse_extended_ipc(fixed_bytes)?),
            BasicSocket => InodeInner::Socket(inode::parse_basic_ipc(fixed_bytes)?),
            ExtendedSocket => InodeInner::ExtendedSocket(inode::parse_extended_ipc(fixed_bytes)?),
        })
    }

    /// Decodes the directory entry stream of a directory inode.
    fn read_dir_entries(&self, start_block: u32, offset: u16, file_size: u64) -> Result<Vec<DirEntry>, Error> {
        if file_size == 3 {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut block = self.superblock.directory_table_start + start_block as u64;
        let mut off = offset as usize;
        let mut bytes_read: u64 = 0;
        let target = file_size
            .checked_sub(3)
            .ok_or_else(|| Error::InvalidImage("directory file_size must be at least 3".into()))?;

        while bytes_read < target {
            let (nb, noff, hdr_bytes) = metadata::read_metadata(&self.io, block, off, 12)?;
            let (_, header) = DirHeader::from_bytes((&hdr_bytes, 0))?;
            bytes_read += hdr_bytes.len() as u64;
            block = nb;
            off = noff;

            for _ in 0..=header.count {
                let (nb, noff, eh_bytes) = metadata::read_metadata(&self.io, block, off, 8)?;
                let (_, eh) = DirEntryHeader::from_bytes((&eh_bytes, 0))?;
                bytes_read += eh_bytes.len() as u64;
                block = nb;
                off = noff;

                // Directory entries only ever carry a *basic* type tag even for children whose
                // actual inode is stored in extended form; the inode decoder itself re-derives
                // the precise variant.
                if eh.inode_type.is_extended() {
                    return Err(Error::InvalidImage(format!(
                        "directory entry type must be a basic inode tag, got {:?}",
                        eh.inode_type
                    )));
                }

                let name_len = eh.name_size as usize + 1;
                let (nb, noff, name) = metadata::read_metadata(&self.io, block, off, name_len)?;
                bytes_read += name.len() as u64;
                block = nb;
                off = noff;

                let inode_number = (header.inode_number as i64 + eh.inode_number as i64) as u32;
                entries.push(DirEntry {
                    start_block: header.start_block,
                    offset: eh.offset,
                    inode_number,
                    inode_type: eh.inode_type,
                    name,
                });
            }
        }

        Ok(entries)
    }
}

fn dummy_inode_data() -> InodeData {
    InodeData {
        header: InodeHeader {
            inode_type: InodeId::BasicDirectory,
            permissions: 0,
            uid_idx: 0,
            gid_idx: 0,
            mtime: 0,
            inode_number: 0,
        },
        inner: InodeInner::Directory(inode::BasicDirectory {
            start_block: 0,
            link_count: 0,
            file_size: 3,
            offset: 0,
            parent_inode: 0,
        }),
    }
}

/// A cheap, value-like handle onto a decoded inode. Borrows back into the [`SquashfsReader`] it
/// came from for any operation that needs more I/O (directory iteration, symlink resolution,
/// file content).
pub struct Inode<'r, R> {
    reader: &'r SquashfsReader<R>,
    addr: (u64, u16),
    parent_addr: (u64, u16),
    name: Vec<u8>,
    data: InodeData,
}

// Not derived: `#[derive(Clone)]` would add a spurious `R: Clone` bound even though we only ever
// hold a shared reference to the reader, not an owned `R`.
impl<'r, R> Clone for Inode<'r, R> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader,
            addr: self.addr,
            parent_addr: self.parent_addr,
            name: self.name.clone(),
            data: self.data.clone(),
        }
    }
}

impl<'r, R: ReadSeek> Inode<'r, R> {
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn inode_number(&self) -> u32 {
        self.data.header.inode_number
    }

    pub fn mode(&self) -> u16 {
        self.data.mode()
    }

    /// The inode's on-disk type tag (basic or extended variant).
    pub fn kind(&self) -> InodeId {
        self.data.header.inode_type
    }

    pub fn uid(&self) -> Result<u32, Error> {
        self.reader.lookup_id(self.data.header.uid_idx)
    }

    pub fn gid(&self) -> Result<u32, Error> {
        self.reader.lookup_id(self.data.header.gid_idx)
    }

    pub fn mtime(&self) -> u32 {
        self.data.header.mtime
    }

    pub fn size(&self) -> Option<u64> {
        self.data.size()
    }

    /// The packed `(block << 16) | offset` address of this inode.
    pub fn packed_address(&self) -> u64 {
        superblock::pack_inode_addr(self.addr.0, self.addr.1)
    }

    pub fn is_dir(&self) -> bool {
        self.data.is_dir()
    }
    pub fn is_file(&self) -> bool {
        self.data.is_file()
    }
    pub fn is_symlink(&self) -> bool {
        self.data.is_symlink()
    }
    pub fn is_block_device(&self) -> bool {
        self.data.is_block_device()
    }
    pub fn is_character_device(&self) -> bool {
        self.data.is_character_device()
    }
    pub fn is_fifo(&self) -> bool {
        self.data.is_fifo()
    }
    pub fn is_socket(&self) -> bool {
        self.data.is_socket()
    }

    /// The parent directory. Root's parent is itself.
    pub fn parent(&self) -> Result<Inode<'r, R>, Error> {
        if self.parent_addr == self.addr {
            return Ok(self.clone());
        }
        self.reader.get_by_packed_address(superblock::pack_inode_addr(self.parent_addr.0, self.parent_addr.1))
    }

    /// Iterates this directory's children in on-disk order.
    pub fn iterdir(&self) -> Result<Vec<Inode<'r, R>>, Error> {
        let (start_block, offset, file_size) = match &self.data.inner {
            InodeInner::Directory(d) => (d.start_block, d.offset, d.file_size as u64),
            InodeInner::ExtendedDirectory(d) => (d.start_block, d.offset, d.file_size as u64),
            _ => return Err(Error::NotADirectory),
        };

        let entries = self.reader.read_dir_entries(start_block, offset, file_size)?;
        entries
            .into_iter()
            .map(|e| {
                let addr = (e.start_block as u64, e.offset);
                let data = self.reader.materialize_pub(addr.0, addr.1)?;
                Ok(Inode {
                    reader: self.reader,
                    addr,
                    parent_addr: self.addr,
                    name: e.name,
                    data,
                })
            })
            .collect()
    }

    /// This directory's children as a name -> inode mapping.
    pub fn listdir(&self) -> Result<std::collections::HashMap<Vec<u8>, Inode<'r, R>>, Error> {
        Ok(self.iterdir()?.into_iter().map(|i| (i.name.clone(), i)).collect())
    }

    /// The raw bytes of a symlink's target.
    pub fn link(&self) -> Result<&[u8], Error> {
        match &self.data.inner {
            InodeInner::Symlink { target, .. } | InodeInner::ExtendedSymlink { target, .. } => Ok(target),
            _ => Err(Error::NotASymlink),
        }
    }

    /// The inode a symlink points to, resolved relative to this symlink's parent (or root, for
    /// an absolute target).
    pub fn link_inode(&self) -> Result<Inode<'r, R>, Error> {
        let target = self.link()?.to_vec();
        let target = String::from_utf8_lossy(&target).into_owned();
        if let Some(rest) = target.strip_prefix('/') {
            self.reader.root().get(rest)
        } else {
            self.parent()?.get(&target)
        }
    }

    /// Opens a seekable content stream. Fails with [`Error::NotAFile`] on non-regular inodes.
    pub fn open(&self) -> Result<crate::filestream::FileStream<'r, R>, Error> {
        crate::filestream::FileStream::new(self.reader, &self.data)
    }

    /// Resolves a `/`-separated path starting at this node.
    pub fn get(&self, path: &str) -> Result<Inode<'r, R>, Error> {
        let mut node = self.clone();
        let mut visited_symlinks = HashSet::new();

        for part in path.split('/') {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                node = node.parent()?;
                continue;
            }

            node = follow_symlinks(node, &mut visited_symlinks)?;

            let child = node
                .iterdir()?
                .into_iter()
                .find(|c| c.name == part.as_bytes())
                .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
            node = child;
        }

        Ok(node)
    }
}

fn follow_symlinks<'r, R: ReadSeek>(
    mut node: Inode<'r, R>,
    visited: &mut HashSet<(u64, u16)>,
) -> Result<Inode<'r, R>, Error> {
    while node.is_symlink() {
        if !visited.insert(node.addr) {
            return Err(Error::FileNotFound("symlink cycle detected".into()));
        }
        node = node.link_inode()?;
    }
    Ok(node)
}

impl<R: ReadSeek> SquashfsReader<R> {
    fn materialize_pub(&self, block: u64, offset: u16) -> Result<InodeData, Error> {
        self.materialize(block, offset)
    }
}
