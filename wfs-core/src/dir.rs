//! Path resolution and directory-entry management (spec.md §4.4).
//!
//! Directory data is a sequence of `DirEntry` records packed into the
//! directory inode's direct/indirect blocks, with no gaps: `size` is always
//! `num_entries * DirEntry::SIZE`, and removal swaps the last entry into the
//! freed slot rather than leaving a hole.

use crate::inode;
use crate::layout::{DirEntry, Inode, Kind, BLOCK, D};
use crate::diskset::DiskSet;
use crate::error::{FsError, FsResult};

/// Splits an absolute path into its components, dropping empty segments
/// (so `/a//b/` and `/a/b` parse identically).
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Splits `path` into its parent directory path and final component name.
/// The root itself has no parent; callers must check for that separately.
pub fn split_parent_child(path: &str) -> (String, String) {
    let parts = components(path);
    let child = parts.last().copied().unwrap_or("").to_string();
    let parent = if parts.len() <= 1 {
        "/".to_string()
    } else {
        format!("/{}", parts[..parts.len() - 1].join("/"))
    };
    (parent, child)
}

/// Resolves `path` to an inode index by walking components from the root,
/// requiring every intermediate component to be a directory. A component
/// that resolves to something other than a directory makes the rest of the
/// path unreachable, which spec.md §7 classifies as not-found rather than
/// a bad-file-descriptor condition (the original `wfs.c` `parsePath` returns
/// `-1` here too, which its callers turn into `-ENOENT`).
pub fn resolve(ctx: &DiskSet, path: &str) -> FsResult<u64> {
    let mut current = crate::layout::ROOT_INODE;
    for name in components(path) {
        let dir = inode::read_inode(ctx, current);
        if dir.kind() != Some(Kind::Directory) {
            return Err(FsError::NotFound);
        }
        current = find_entry(ctx, &dir, name).ok_or(FsError::NotFound)?;
    }
    Ok(current)
}

/// The number of entries currently stored in `dir`, derived from `size`.
fn entry_count(dir: &Inode) -> usize {
    (dir.size as usize) / DirEntry::SIZE
}

/// Reads entry `index` (0-based, in storage order across blocks) out of
/// `dir`. Panics if `index >= entry_count(dir)`; callers only ever pass
/// indices derived from `entry_count`.
fn read_entry(ctx: &DiskSet, dir: &Inode, index: usize) -> DirEntry {
    let per_block = DirEntry::PER_BLOCK;
    let block_num = index / per_block;
    let in_block = index % per_block;
    let off = block_offset(dir, block_num) + (in_block * DirEntry::SIZE) as u64;
    let bytes = ctx.read_metadata(off, DirEntry::SIZE);
    DirEntry::from_bytes(&bytes)
}

fn write_entry(ctx: &mut DiskSet, dir: &Inode, index: usize, entry: DirEntry) {
    let per_block = DirEntry::PER_BLOCK;
    let block_num = index / per_block;
    let in_block = index % per_block;
    let off = block_offset(dir, block_num) + (in_block * DirEntry::SIZE) as u64;
    let mut buf = [0u8; DirEntry::SIZE];
    entry.write_into(&mut buf);
    ctx.write_metadata(off, &buf);
}

/// Absolute byte offset of direct block `block_num` of `dir`. Only direct
/// blocks are ever used for directory data; a single directory can hold at
/// most `D * DirEntry::PER_BLOCK` entries (spec.md's directory non-goal:
/// no indirect-block directories).
fn block_offset(dir: &Inode, block_num: usize) -> u64 {
    dir.blocks[block_num]
}

/// Looks up `name` among `dir`'s entries and returns the child inode index.
fn find_entry(ctx: &DiskSet, dir: &Inode, name: &str) -> Option<u64> {
    for i in 0..entry_count(dir) {
        let e = read_entry(ctx, dir, i);
        if e.is_used() && e.name_str() == name {
            return Some(e.num as u64);
        }
    }
    None
}

/// Appends a `(name, child_num)` entry to `dir`, allocating a new direct
/// block when the current last block is full. Rolls back the newly
/// allocated data block on failure so a failed `mknod`/`mkdir` leaves no
/// orphaned block behind. Returns `FsError::NoSpace` when `dir` has already
/// used all `D` direct slots.
pub fn add_entry(ctx: &mut DiskSet, dir: &mut Inode, name: &str, child_num: u64) -> FsResult<()> {
    let per_block = DirEntry::PER_BLOCK;
    let index = entry_count(dir);
    let block_num = index / per_block;
    let in_block = index % per_block;

    if in_block == 0 && dir.blocks[block_num] == crate::layout::NULL_BLOCK {
        if block_num >= D {
            return Err(FsError::NoSpace);
        }
        let off = inode::block_for_offset(ctx, dir, (block_num * BLOCK) as u64, true)?
            .expect("allocate_if_missing is true");
        dir.blocks[block_num] = off;
    }

    write_entry(ctx, dir, index, DirEntry::new(name, child_num));
    dir.size += DirEntry::SIZE as u64;
    Ok(())
}

/// Removes the entry named `name` from `dir`, compacting by moving the
/// last entry into the freed slot (or just clearing it, if it was already
/// last). Returns `FsError::NotFound` if no such entry exists.
pub fn remove_entry(ctx: &mut DiskSet, dir: &mut Inode, name: &str) -> FsResult<()> {
    let count = entry_count(dir);
    let mut found = None;
    for i in 0..count {
        let e = read_entry(ctx, dir, i);
        if e.is_used() && e.name_str() == name {
            found = Some(i);
            break;
        }
    }
    let index = found.ok_or(FsError::NotFound)?;
    let last = count - 1;

    if index != last {
        let last_entry = read_entry(ctx, dir, last);
        write_entry(ctx, dir, index, last_entry);
    }
    write_entry(ctx, dir, last, DirEntry::empty());
    dir.size -= DirEntry::SIZE as u64;
    Ok(())
}

/// Lists the `(name, inode_num)` pairs stored in `dir`, in storage order.
/// Does not include the synthetic `.`/`..` entries; callers (readdir)
/// prepend those uniformly for every directory, root included.
pub fn list_entries(ctx: &DiskSet, dir: &Inode) -> Vec<(String, u64)> {
    let mut out = Vec::with_capacity(entry_count(dir));
    for i in 0..entry_count(dir) {
        let e = read_entry(ctx, dir, i);
        if e.is_used() {
            out.push((e.name_str().to_string(), e.num as u64));
        }
    }
    out
}
