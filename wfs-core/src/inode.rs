//! Inode allocation/free, direct + single-indirect block addressing, and
//! byte-range read/write (spec.md §4.3).

use crate::bitmap;
use crate::diskset::DiskSet;
use crate::error::{FsError, FsResult};
use crate::layout::{Inode, Kind, BLOCK, BLOCKS_PER_INODE, D, NULL_BLOCK, PTRS_PER_INDIRECT};
use crate::time::now_secs;

/// Reads inode `idx` from its table slot.
pub fn read_inode(ctx: &DiskSet, idx: u64) -> Inode {
    let off = ctx.sb().inode_offset(idx);
    let bytes = ctx.read_metadata(off, Inode::SIZE);
    Inode::from_bytes(&bytes)
}

/// Writes `inode` back to its table slot (mirrored as metadata).
pub fn write_inode(ctx: &mut DiskSet, inode: &Inode) {
    let off = ctx.sb().inode_offset(inode.num);
    let mut buf = [0u8; Inode::SIZE];
    inode.write_into(&mut buf);
    ctx.write_metadata(off, &buf);
}

/// Allocates a bit in the inode bitmap and writes a fresh inode there.
pub fn allocate_inode(ctx: &mut DiskSet, mode: u32, uid: u32, gid: u32) -> FsResult<Inode> {
    let num_inodes = ctx.sb().num_inodes as usize;
    let bitmap_off = ctx.sb().i_bitmap_ptr;
    let bitmap_len = ctx.sb().inode_bitmap_bytes() as usize;

    let mut map = ctx.read_metadata(bitmap_off, bitmap_len);
    let idx = bitmap::allocate(&mut map, num_inodes).ok_or(FsError::NoSpace)?;
    ctx.write_metadata(bitmap_off, &map);

    let now = now_secs();
    let inode = Inode {
        num: idx as u64,
        mode,
        uid,
        gid,
        size: 0,
        nlinks: 1,
        atim: now,
        mtim: now,
        ctim: now,
        blocks: [NULL_BLOCK; BLOCKS_PER_INODE],
    };
    write_inode(ctx, &inode);
    Ok(inode)
}

/// Frees every block owned by inode `idx` (direct, indirect pointers, the
/// indirect block itself), zeroes and frees the inode's table slot, and
/// clears its inode-bitmap bit.
pub fn free_inode(ctx: &mut DiskSet, idx: u64) -> FsResult<()> {
    let inode = read_inode(ctx, idx);
    let payload = inode.kind() == Some(Kind::Regular);

    for i in 0..D {
        if inode.blocks[i] != NULL_BLOCK {
            free_block(ctx, inode.blocks[i], payload);
        }
    }

    if inode.blocks[D] != NULL_BLOCK {
        let ind_off = inode.blocks[D];
        let ind_bytes = ctx.read_metadata(ind_off, BLOCK);
        for ptr in read_ptrs(&ind_bytes) {
            if ptr != NULL_BLOCK {
                free_block(ctx, ptr, payload);
            }
        }
        // The indirect block itself is metadata, not payload.
        free_block(ctx, ind_off, false);
    }

    let inode_off = ctx.sb().inode_offset(idx);
    ctx.write_metadata(inode_off, &[0u8; BLOCK]);

    let bitmap_off = ctx.sb().i_bitmap_ptr;
    let bitmap_len = ctx.sb().inode_bitmap_bytes() as usize;
    let mut map = ctx.read_metadata(bitmap_off, bitmap_len);
    bitmap::free(&mut map, idx as usize);
    ctx.write_metadata(bitmap_off, &map);
    Ok(())
}

/// Zeroes the data block at `block_off` and clears its data-bitmap bit.
/// `payload` selects whether the zero write is stripe-aware (a regular
/// file's bytes) or always-mirrored (an indirect block, a directory block).
fn free_block(ctx: &mut DiskSet, block_off: u64, payload: bool) {
    let zero = [0u8; BLOCK];
    if payload {
        ctx.write_data(block_off, &zero);
    } else {
        ctx.write_metadata(block_off, &zero);
    }
    let k = (block_off - ctx.sb().d_blocks_ptr) / BLOCK as u64;
    let bitmap_off = ctx.sb().d_bitmap_ptr;
    let bitmap_len = ctx.sb().data_bitmap_bytes() as usize;
    let mut map = ctx.read_metadata(bitmap_off, bitmap_len);
    bitmap::free(&mut map, k as usize);
    ctx.write_metadata(bitmap_off, &map);
}

/// Allocates a fresh data block and returns its absolute byte offset. The
/// block's content is already zero (format zeroes the image; `free_block`
/// re-zeroes on release), so no zero write is needed here.
fn allocate_data_block(ctx: &mut DiskSet) -> FsResult<u64> {
    let num_blocks = ctx.sb().num_data_blocks as usize;
    let bitmap_off = ctx.sb().d_bitmap_ptr;
    let bitmap_len = ctx.sb().data_bitmap_bytes() as usize;

    let mut map = ctx.read_metadata(bitmap_off, bitmap_len);
    let k = bitmap::allocate(&mut map, num_blocks).ok_or(FsError::NoSpace)?;
    ctx.write_metadata(bitmap_off, &map);
    Ok(ctx.sb().data_block_offset(k as u64))
}

fn read_ptrs(block: &[u8]) -> [u64; PTRS_PER_INDIRECT] {
    let mut out = [0u64; PTRS_PER_INDIRECT];
    for (i, slot) in out.iter_mut().enumerate() {
        let b = &block[i * 8..i * 8 + 8];
        *slot = u64::from_ne_bytes(b.try_into().unwrap());
    }
    out
}

fn write_ptr_into(block: &mut [u8; BLOCK], j: usize, value: u64) {
    block[j * 8..j * 8 + 8].copy_from_slice(&value.to_ne_bytes());
}

/// Computes the block owning byte `byte_offset` of `inode`, allocating a
/// new data block (and, if needed, a new indirect block) when one is
/// missing and `allocate_if_missing` is set. `inode` is mutated in place
/// when a direct slot is filled in; callers are responsible for writing
/// the inode back to disk afterwards.
pub fn block_for_offset(
    ctx: &mut DiskSet,
    inode: &mut Inode,
    byte_offset: u64,
    allocate_if_missing: bool,
) -> FsResult<Option<u64>> {
    let i = (byte_offset / BLOCK as u64) as usize;

    if i < D {
        if inode.blocks[i] == NULL_BLOCK {
            if !allocate_if_missing {
                return Ok(None);
            }
            inode.blocks[i] = allocate_data_block(ctx)?;
        }
        return Ok(Some(inode.blocks[i]));
    }

    if inode.blocks[D] == NULL_BLOCK {
        if !allocate_if_missing {
            return Ok(None);
        }
        inode.blocks[D] = allocate_data_block(ctx)?;
    }

    let j = i - D;
    if j >= PTRS_PER_INDIRECT {
        return Err(FsError::NoSpace);
    }

    let ind_off = inode.blocks[D];
    let mut ind_block_bytes = ctx.read_metadata(ind_off, BLOCK);
    let mut ind_block: [u8; BLOCK] = ind_block_bytes
        .drain(..)
        .collect::<Vec<u8>>()
        .try_into()
        .unwrap();
    let ptrs = read_ptrs(&ind_block);
    let mut slot = ptrs[j];

    if slot == NULL_BLOCK {
        if !allocate_if_missing {
            return Ok(None);
        }
        slot = allocate_data_block(ctx)?;
        write_ptr_into(&mut ind_block, j, slot);
        // The indirect block's own storage is metadata.
        ctx.write_metadata(ind_off, &ind_block);
    }

    Ok(Some(slot))
}

/// Reads up to `buf.len()` bytes starting at `offset`. Updates `atim`;
/// caller is responsible for persisting the inode afterwards (mirroring,
/// if applicable, is the caller's call since it differs by handler).
pub fn read(ctx: &mut DiskSet, inode: &mut Inode, buf: &mut [u8], offset: u64) -> usize {
    if offset >= inode.size {
        inode.atim = now_secs();
        return 0;
    }
    inode.atim = now_secs();

    let want = buf.len().min((inode.size - offset) as usize);
    let mut done = 0usize;
    while done < want {
        let cur = offset + done as u64;
        let block_off = match block_for_offset(ctx, inode, cur, false) {
            Ok(Some(off)) => off,
            _ => break,
        };
        let block = ctx.read_block_voted(block_off);
        let in_block = (cur % BLOCK as u64) as usize;
        let chunk = (want - done).min(BLOCK - in_block);
        buf[done..done + chunk].copy_from_slice(&block[in_block..in_block + chunk]);
        done += chunk;
    }
    done
}

/// Writes `buf` starting at `offset`, allocating blocks (and the indirect
/// block) lazily. Updates `atim`/`mtim` and grows `size` to
/// `max(size, offset + bytes_written)` — the corrected rule for spec.md's
/// flagged Open Question 1 (the original source unconditionally adds
/// `bytes_written` to `size`, which double-counts on overwrite).
pub fn write(ctx: &mut DiskSet, inode: &mut Inode, buf: &[u8], offset: u64) -> FsResult<usize> {
    inode.atim = now_secs();
    inode.mtim = now_secs();

    let mut done = 0usize;
    while done < buf.len() {
        let cur = offset + done as u64;
        let block_off = match block_for_offset(ctx, inode, cur, true) {
            Ok(Some(off)) => off,
            Ok(None) => unreachable!("allocate_if_missing is true"),
            Err(_) => break,
        };
        let in_block = (cur % BLOCK as u64) as usize;
        let chunk = (buf.len() - done).min(BLOCK - in_block);
        ctx.write_data(block_off + in_block as u64, &buf[done..done + chunk]);
        done += chunk;
    }

    inode.size = inode.size.max(offset + done as u64);

    if done == 0 && !buf.is_empty() {
        return Err(FsError::NoSpace);
    }
    Ok(done)
}
