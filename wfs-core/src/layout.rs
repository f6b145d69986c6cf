//! Fixed on-disk byte layout: superblock, inode record, directory entry.
//!
//! All multi-byte integers use the host's native endianness — the format is
//! not portable across machines of different endianness, by design (a
//! `mkfs` and a `wfs` daemon must already agree on `BLOCK`, `MAX_NAME`, and
//! `D` at compile time, so agreeing on endianness costs nothing extra).

use std::mem::size_of;

/// Block size in bytes. Must stay a power of two.
pub const BLOCK: usize = 512;
/// Maximum length of a path component, including the terminating padding.
pub const MAX_NAME: usize = 28;
/// Number of direct block slots in an inode. `blocks[D]` is the single
/// indirect slot, so an inode has `D + 1` pointer slots in total.
pub const D: usize = 6;
/// Total number of block pointer slots per inode (direct + indirect).
pub const BLOCKS_PER_INODE: usize = D + 1;
/// Number of block offsets that fit in one indirect block.
pub const PTRS_PER_INDIRECT: usize = BLOCK / size_of::<u64>();
/// Inode index of the (always allocated) root directory.
pub const ROOT_INODE: u64 = 0;

/// Sentinel marking an unused block pointer slot.
pub const NULL_BLOCK: u64 = 0;

pub const S_IFMT: u32 = 0o170_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFREG: u32 = 0o100_000;

/// Discriminated file kind, derived from the mode's type bits. The mode
/// itself is kept as the wire format (for `stat`-compatible attributes);
/// this is the in-memory representation branching logic should use instead
/// of repeated bit tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Directory,
    Regular,
}

impl Kind {
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFDIR => Some(Self::Directory),
            S_IFREG => Some(Self::Regular),
            _ => None,
        }
    }
}

/// RAID mode selecting how data blocks (not metadata) are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidMode {
    /// Data blocks live on exactly one disk, chosen by block address.
    Striped = 0,
    /// Every block is replicated on every disk.
    Mirrored = 1,
}

impl TryFrom<u32> for RaidMode {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        match v {
            0 => Ok(Self::Striped),
            1 => Ok(Self::Mirrored),
            _ => Err(()),
        }
    }
}

/// The superblock, stored identically at byte offset 0 of every disk.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Superblock {
    pub num_inodes: u64,
    pub num_data_blocks: u64,
    pub i_bitmap_ptr: u64,
    pub d_bitmap_ptr: u64,
    pub i_blocks_ptr: u64,
    pub d_blocks_ptr: u64,
    pub raid_mode: u32,
    pub disk_count: u32,
}

impl Superblock {
    pub const SIZE: usize = size_of::<Self>();

    /// Computes the full byte layout for `num_inodes` inodes and
    /// `num_data_blocks` data blocks. Both counts must already be rounded
    /// up to a multiple of 32 by the caller.
    pub fn new(
        num_inodes: u64,
        num_data_blocks: u64,
        raid_mode: RaidMode,
        disk_count: u32,
    ) -> Self {
        let i_bitmap_ptr = Self::SIZE as u64;
        let d_bitmap_ptr = i_bitmap_ptr + num_inodes / 8;
        let i_blocks_ptr = round_up(d_bitmap_ptr + num_data_blocks / 8, BLOCK as u64);
        let d_blocks_ptr = round_up(i_blocks_ptr + num_inodes * BLOCK as u64, BLOCK as u64);
        Self {
            num_inodes,
            num_data_blocks,
            i_bitmap_ptr,
            d_bitmap_ptr,
            i_blocks_ptr,
            d_blocks_ptr,
            raid_mode: raid_mode as u32,
            disk_count,
        }
    }

    /// Total filesystem size in bytes (superblock + bitmaps + inode table +
    /// data region).
    pub fn fs_size(&self) -> u64 {
        self.d_blocks_ptr + self.num_data_blocks * BLOCK as u64
    }

    pub fn raid_mode(&self) -> RaidMode {
        RaidMode::try_from(self.raid_mode).expect("superblock has an invalid raid_mode")
    }

    pub fn inode_bitmap_bytes(&self) -> u64 {
        self.num_inodes / 8
    }

    pub fn data_bitmap_bytes(&self) -> u64 {
        self.num_data_blocks / 8
    }

    /// Byte offset of inode `i` in the inode table.
    pub fn inode_offset(&self, i: u64) -> u64 {
        self.i_blocks_ptr + i * BLOCK as u64
    }

    /// Byte offset of the `k`th data block.
    pub fn data_block_offset(&self, k: u64) -> u64 {
        self.d_blocks_ptr + k * BLOCK as u64
    }

    /// Reconstructs a superblock from its on-disk byte representation.
    pub fn from_bytes(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);
        unsafe { (buf.as_ptr() as *const Self).read_unaligned() }
    }

    /// The on-disk byte representation of this superblock.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        unsafe {
            (out.as_mut_ptr() as *mut Self).write_unaligned(self);
        }
        out
    }
}

/// Rounds `n` up to the next multiple of `factor`.
pub fn round_up(n: u64, factor: u64) -> u64 {
    if n % factor == 0 {
        n
    } else {
        n + (factor - n % factor)
    }
}

/// An inode record. Occupies one full `BLOCK`-byte slot in the inode table;
/// the trailing bytes of that slot are left zeroed.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Inode {
    pub num: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlinks: u32,
    pub atim: i64,
    pub mtim: i64,
    pub ctim: i64,
    pub blocks: [u64; BLOCKS_PER_INODE],
}

impl Inode {
    pub const SIZE: usize = size_of::<Self>();

    pub fn empty() -> Self {
        Self {
            num: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            nlinks: 0,
            atim: 0,
            mtim: 0,
            ctim: 0,
            blocks: [NULL_BLOCK; BLOCKS_PER_INODE],
        }
    }

    pub fn kind(&self) -> Option<Kind> {
        Kind::from_mode(self.mode)
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);
        unsafe { (buf.as_ptr() as *const Self).read_unaligned() }
    }

    /// Writes the inode's byte representation into the front of `out`
    /// (which must be at least `BLOCK` bytes — the rest of the slot stays
    /// whatever it already was, zero by the block-zeroing invariant).
    pub fn write_into(&self, out: &mut [u8]) {
        assert!(out.len() >= Self::SIZE);
        unsafe {
            (out.as_mut_ptr() as *mut Self).write_unaligned(*self);
        }
    }
}

/// A fixed-size directory entry: a null-padded name and the inode it names.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DirEntry {
    pub name: [u8; MAX_NAME],
    pub num: u32,
}

impl DirEntry {
    pub const SIZE: usize = size_of::<Self>();
    pub const PER_BLOCK: usize = BLOCK / Self::SIZE;

    pub fn empty() -> Self {
        Self {
            name: [0; MAX_NAME],
            num: 0,
        }
    }

    pub fn new(name: &str, num: u64) -> Self {
        let mut buf = [0u8; MAX_NAME];
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME - 1);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            name: buf,
            num: num as u32,
        }
    }

    pub fn is_used(&self) -> bool {
        self.name[0] != 0
    }

    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::SIZE);
        unsafe { (buf.as_ptr() as *const Self).read_unaligned() }
    }

    pub fn write_into(&self, out: &mut [u8]) {
        assert!(out.len() >= Self::SIZE);
        unsafe {
            (out.as_mut_ptr() as *mut Self).write_unaligned(*self);
        }
    }
}
