//! End-to-end tests against a small, hand-built synthetic image (no `squashfs-tools` dependency
//! at test time; see SPEC_FULL.md §10.4). The image layout is built in dependency order so no
//! address needs to be guessed or patched except the root directory's own `file_size`, which is
//! only known once its entry stream has been serialized.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use squashfs_reader::{open, Error};

const NONE_COMPRESSOR: u16 = 0;
const COMPRESSED_BIT_METADATA: u16 = 1 << 15;
const COMPRESSED_BIT_BLOCK: u32 = 1 << 24;
const INVALID_BLK: u64 = u64::MAX;
const INVALID_FRAG: u32 = u32::MAX;

fn u16b(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}
fn i16b(v: i16) -> [u8; 2] {
    v.to_le_bytes()
}
fn u32b(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}
fn u64b(v: u64) -> [u8; 8] {
    v.to_le_bytes()
}

/// Wraps `payload` (assumed uncompressed) as a metadata block: a 16-bit length prefix with the
/// "not compressed" bit set, followed by the raw bytes.
fn metadata_block(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() < (1 << 15));
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.extend_from_slice(&u16b(payload.len() as u16 | COMPRESSED_BIT_METADATA));
    out.extend_from_slice(payload);
    out
}

struct Image {
    bytes: Vec<u8>,
}

/// Builds a one-directory, one-file, one-symlink image using the `None` compressor throughout,
/// so the test doesn't depend on any codec feature being enabled.
fn build() -> Image {
    let mut buf = vec![0u8; 96]; // superblock placeholder, patched at the end

    let file_content = b"hello world";
    let blocks_start = buf.len() as u64;
    buf.extend_from_slice(file_content);

    // --- inode table -------------------------------------------------------------------
    let mut inodes = Vec::new();

    let root_offset = inodes.len();
    inodes.extend_from_slice(&u16b(1)); // inode_type: BasicDirectory
    inodes.extend_from_slice(&u16b(0o755)); // permissions
    inodes.extend_from_slice(&u16b(0)); // uid_idx
    inodes.extend_from_slice(&u16b(0)); // gid_idx
    inodes.extend_from_slice(&u32b(0)); // mtime
    inodes.extend_from_slice(&u32b(1)); // inode_number
    inodes.extend_from_slice(&u32b(0)); // start_block (directory-table relative)
    inodes.extend_from_slice(&u32b(2)); // link_count
    let file_size_patch_at = inodes.len();
    inodes.extend_from_slice(&u16b(0)); // file_size -- patched below
    inodes.extend_from_slice(&u16b(0)); // offset (directory-table byte offset)
    inodes.extend_from_slice(&u32b(1)); // parent_inode

    let file_offset = inodes.len();
    inodes.extend_from_slice(&u16b(2)); // inode_type: BasicFile
    inodes.extend_from_slice(&u16b(0o644));
    inodes.extend_from_slice(&u16b(0));
    inodes.extend_from_slice(&u16b(0));
    inodes.extend_from_slice(&u32b(0));
    inodes.extend_from_slice(&u32b(2)); // inode_number
    inodes.extend_from_slice(&u32b(blocks_start as u32)); // blocks_start
    inodes.extend_from_slice(&u32b(INVALID_FRAG)); // fragment
    inodes.extend_from_slice(&u32b(0)); // offset (in fragment, unused here)
    inodes.extend_from_slice(&u32b(file_content.len() as u32)); // file_size
    inodes.extend_from_slice(&u32b(file_content.len() as u32 | COMPRESSED_BIT_BLOCK)); // block_sizes[0]

    let symlink_offset = inodes.len();
    let target = b"hello";
    inodes.extend_from_slice(&u16b(3)); // inode_type: BasicSymlink
    inodes.extend_from_slice(&u16b(0o777));
    inodes.extend_from_slice(&u16b(0));
    inodes.extend_from_slice(&u16b(0));
    inodes.extend_from_slice(&u32b(0));
    inodes.extend_from_slice(&u32b(3)); // inode_number
    inodes.extend_from_slice(&u32b(1)); // link_count
    inodes.extend_from_slice(&u32b(target.len() as u32)); // target_size
    inodes.extend_from_slice(target);

    // --- directory table -----------------------------------------------------------------
    let mut dir = Vec::new();
    dir.extend_from_slice(&u32b(1)); // count: 2 entries - 1
    dir.extend_from_slice(&u32b(0)); // start_block: inode-table relative block of entries' inodes
    dir.extend_from_slice(&u32b(0)); // base inode_number

    let name1 = b"hello";
    dir.extend_from_slice(&u16b(file_offset as u16));
    dir.extend_from_slice(&i16b(2)); // inode_number delta -> 2
    dir.extend_from_slice(&u16b(2)); // inode_type: BasicFile
    dir.extend_from_slice(&u16b(name1.len() as u16 - 1));
    dir.extend_from_slice(name1);

    let name2 = b"link";
    dir.extend_from_slice(&u16b(symlink_offset as u16));
    dir.extend_from_slice(&i16b(3)); // inode_number delta -> 3
    dir.extend_from_slice(&u16b(3)); // inode_type: BasicSymlink
    dir.extend_from_slice(&u16b(name2.len() as u16 - 1));
    dir.extend_from_slice(name2);

    inodes[file_size_patch_at..file_size_patch_at + 2]
        .copy_from_slice(&u16b(dir.len() as u16 + 3));

    let inode_table_start = buf.len() as u64;
    buf.extend_from_slice(&metadata_block(&inodes));

    let directory_table_start = buf.len() as u64;
    buf.extend_from_slice(&metadata_block(&dir));

    // --- id table --------------------------------------------------------------------------
    let mut id_payload = Vec::new();
    id_payload.extend_from_slice(&u32b(1000)); // uid/gid index 0 -> numeric id 1000
    let id_block_offset = buf.len() as u64;
    buf.extend_from_slice(&metadata_block(&id_payload));
    let id_table_start = buf.len() as u64;
    buf.extend_from_slice(&u64b(id_block_offset));

    // --- inode lookup table ------------------------------------------------------------------
    let mut lookup_payload = Vec::new();
    lookup_payload.extend_from_slice(&u64b(0)); // inode 1 (root): (block 0, offset 0)
    lookup_payload.extend_from_slice(&u64b(file_offset as u64)); // inode 2
    lookup_payload.extend_from_slice(&u64b(symlink_offset as u64)); // inode 3
    let lookup_block_offset = buf.len() as u64;
    buf.extend_from_slice(&metadata_block(&lookup_payload));
    let lookup_table_start = buf.len() as u64;
    buf.extend_from_slice(&u64b(lookup_block_offset));

    let bytes_used = buf.len() as u64;

    // --- superblock --------------------------------------------------------------------------
    let mut sb = Vec::with_capacity(96);
    sb.extend_from_slice(&u32b(0x7371_7368)); // magic
    sb.extend_from_slice(&u32b(3)); // inode_count
    sb.extend_from_slice(&u32b(0)); // mod_time
    sb.extend_from_slice(&u32b(4096)); // block_size
    sb.extend_from_slice(&u32b(0)); // frag_count
    sb.extend_from_slice(&u16b(NONE_COMPRESSOR));
    sb.extend_from_slice(&u16b(12)); // block_log
    sb.extend_from_slice(&u16b(0)); // flags
    sb.extend_from_slice(&u16b(1)); // id_count
    sb.extend_from_slice(&u16b(4)); // version_major
    sb.extend_from_slice(&u16b(0)); // version_minor
    sb.extend_from_slice(&u64b(0)); // root_inode: (block 0, offset 0)
    sb.extend_from_slice(&u64b(bytes_used));
    sb.extend_from_slice(&u64b(id_table_start));
    sb.extend_from_slice(&u64b(INVALID_BLK)); // xattr_id_table_start
    sb.extend_from_slice(&u64b(inode_table_start));
    sb.extend_from_slice(&u64b(directory_table_start));
    sb.extend_from_slice(&u64b(INVALID_BLK)); // fragment_table_start
    sb.extend_from_slice(&u64b(lookup_table_start));
    assert_eq!(sb.len(), 96);
    buf[..96].copy_from_slice(&sb);

    Image { bytes: buf }
}

#[test_log::test]
fn root_listing_and_metadata() {
    let img = build();
    let reader = open(Cursor::new(img.bytes)).expect("image should open");

    let root = reader.root();
    assert!(root.is_dir());
    assert_eq!(root.size(), Some(40));

    let mut names: Vec<String> =
        root.iterdir().unwrap().iter().map(|i| String::from_utf8_lossy(i.name()).into_owned()).collect();
    names.sort();
    assert_eq!(names, vec!["hello".to_string(), "link".to_string()]);
}

#[test]
fn file_content_whole_and_chunked() {
    let img = build();
    let reader = open(Cursor::new(img.bytes)).unwrap();

    let file = reader.get("hello").unwrap();
    assert!(file.is_file());
    assert_eq!(file.size(), Some(11));

    let mut stream = file.open().unwrap();
    let mut all = Vec::new();
    stream.read_to_end(&mut all).unwrap();
    assert_eq!(all, b"hello world");

    // Reading via seek/read in small chunks must yield identical bytes.
    let mut stream2 = reader.get("hello").unwrap().open().unwrap();
    let mut chunked = Vec::new();
    let mut buf = [0u8; 3];
    loop {
        let n = stream2.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        chunked.extend_from_slice(&buf[..n]);
    }
    assert_eq!(chunked, all);

    stream2.seek(SeekFrom::Start(6)).unwrap();
    let mut tail = Vec::new();
    stream2.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, b"world");
}

#[test]
fn symlink_target_and_resolution() {
    let img = build();
    let reader = open(Cursor::new(img.bytes)).unwrap();

    let link = reader.get("link").unwrap();
    assert!(link.is_symlink());
    assert_eq!(link.link().unwrap(), b"hello");

    let target = link.link_inode().unwrap();
    assert!(target.is_file());
    assert_eq!(target.inode_number(), reader.get("hello").unwrap().inode_number());

    // Transparent symlink following during path resolution.
    let via_link = reader.get("link").unwrap();
    assert_eq!(via_link.size(), Some(11));
}

#[test]
fn type_errors() {
    let img = build();
    let reader = open(Cursor::new(img.bytes)).unwrap();

    let dir_err = reader.root().open().unwrap_err();
    assert!(matches!(dir_err, Error::NotAFile));

    let file_err = reader.get("hello").unwrap().listdir().unwrap_err();
    assert!(matches!(file_err, Error::NotADirectory));

    let link_err = reader.get("hello").unwrap().link().unwrap_err();
    assert!(matches!(link_err, Error::NotASymlink));
}

#[test]
fn uid_gid_resolve_through_id_table() {
    let img = build();
    let reader = open(Cursor::new(img.bytes)).unwrap();

    assert_eq!(reader.root().uid().unwrap(), 1000);
    assert_eq!(reader.get("hello").unwrap().gid().unwrap(), 1000);
}

#[test]
fn iter_inodes_matches_inode_lookup() {
    let img = build();
    let reader = open(Cursor::new(img.bytes)).unwrap();

    let numbers: Vec<u32> = reader.iter_inodes().map(|i| i.unwrap().inode_number()).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn opens_from_a_real_file_on_disk() {
    let img = build();
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&img.bytes).unwrap();
    tmp.flush().unwrap();

    let file = std::fs::File::open(tmp.path()).unwrap();
    let reader = open(file).unwrap();
    let content = {
        let mut s = reader.get("hello").unwrap().open().unwrap();
        let mut buf = Vec::new();
        s.read_to_end(&mut buf).unwrap();
        buf
    };
    assert_eq!(content, b"hello world");
}

#[test]
fn zero_capacity_style_cache_matches_default() {
    let img = build();
    let small = squashfs_reader::SquashfsReader::open_with_cache_capacity(Cursor::new(img.bytes.clone()), 1).unwrap();
    let default = open(Cursor::new(img.bytes)).unwrap();

    let a = small.get("hello").unwrap().open().unwrap().bytes().collect::<Result<Vec<u8>, _>>().unwrap();
    let b = default.get("hello").unwrap().open().unwrap().bytes().collect::<Result<Vec<u8>, _>>().unwrap();
    assert_eq!(a, b);
}
