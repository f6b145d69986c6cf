//! End-to-end scenarios from spec.md §8, driven directly against the core
//! handlers over real `tempfile`-backed disk images (no FUSE involved).

use std::ffi::c_void;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use tempfile::tempdir;
use wfs_core::layout::{Superblock, S_IFDIR, S_IFREG};
use wfs_core::{bitmap, ops, DiskSet, FsError, RaidMode};

/// Formats `disk_count` fresh images (same shape `mkfs` would produce: a
/// superblock, inode 0 marked allocated and initialized as the root
/// directory, no pre-written `.`/`..` entries) and returns the open
/// `DiskSet`.
fn format(dir: &Path, raid: RaidMode, disk_count: u32, num_inodes: u64, num_blocks: u64) -> DiskSet {
    let sb = Superblock::new(num_inodes, num_blocks, raid, disk_count);
    let fs_size = sb.fs_size();

    let paths: Vec<_> = (0..disk_count)
        .map(|i| {
            let p = dir.join(format!("disk{i}.img"));
            let f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&p)
                .unwrap();
            f.set_len(fs_size).unwrap();
            p
        })
        .collect();

    {
        let mut f = OpenOptions::new().write(true).open(&paths[0]).unwrap();
        f.write_all(&sb.to_bytes()).unwrap();
    }

    let mut ctx = DiskSet::open(&paths).unwrap();
    let mut root = wfs_core::inode::allocate_inode(&mut ctx, S_IFDIR | 0o755, 0, 0).unwrap();
    assert_eq!(root.num, wfs_core::layout::ROOT_INODE);
    root.nlinks = 2;
    wfs_core::inode::write_inode(&mut ctx, &root);
    ctx
}

#[test]
fn scenario_nested_mkdir_reports_correct_nlinks() {
    let tmp = tempdir().unwrap();
    let mut ctx = format(tmp.path(), RaidMode::Mirrored, 2, 32, 32);

    ops::mkdir(&mut ctx, "/a", 0o755, 0, 0).unwrap();
    ops::mkdir(&mut ctx, "/a/b", 0o755, 0, 0).unwrap();

    let entries = ops::readdir(&mut ctx, "/a").unwrap();
    let names: Vec<_> = entries.into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec![".", "..", "b"]);

    assert_eq!(ops::getattr(&mut ctx, "/a").unwrap().nlinks, 3);
    assert_eq!(ops::getattr(&mut ctx, "/").unwrap().nlinks, 3);
}

#[test]
fn scenario_mknod_write_read_getattr() {
    let tmp = tempdir().unwrap();
    let mut ctx = format(tmp.path(), RaidMode::Mirrored, 2, 32, 32);

    ops::mknod(&mut ctx, "/f", S_IFREG | 0o644, 0, 0).unwrap();
    let n = ops::write(&mut ctx, "/f", b"hello", 0).unwrap();
    assert_eq!(n, 5);

    let mut out = [0u8; 5];
    let r = ops::read(&mut ctx, "/f", &mut out, 0).unwrap();
    assert_eq!(r, 5);
    assert_eq!(&out, b"hello");
    assert_eq!(ops::getattr(&mut ctx, "/f").unwrap().size, 5);
}

#[test]
fn scenario_33rd_file_in_root_hits_inode_no_space() {
    let tmp = tempdir().unwrap();
    let mut ctx = format(tmp.path(), RaidMode::Mirrored, 2, 32, 32);

    // Root already occupies inode 0; 31 more fit in the 32-bit bitmap.
    for i in 0..31 {
        ops::mknod(&mut ctx, &format!("/f{i}"), S_IFREG | 0o644, 0, 0).unwrap();
    }
    let result = ops::mknod(&mut ctx, "/f31", S_IFREG | 0o644, 0, 0);
    assert!(matches!(result, Err(FsError::NoSpace)));
}

#[test]
fn scenario_striped_four_block_write_places_each_block_on_its_owner() {
    let tmp = tempdir().unwrap();
    let mut ctx = format(tmp.path(), RaidMode::Striped, 2, 32, 32);

    ops::mknod(&mut ctx, "/big", S_IFREG | 0o644, 0, 0).unwrap();
    let block = wfs_core::BLOCK;
    let mut payload = vec![0u8; block * 4];
    for (k, chunk) in payload.chunks_mut(block).enumerate() {
        chunk.fill(k as u8 + 1);
    }
    ops::write(&mut ctx, "/big", &payload, 0).unwrap();

    let idx = wfs_core::dir::resolve(&ctx, "/big").unwrap();
    let node = wfs_core::inode::read_inode(&ctx, idx);
    // `/big`'s directory entry lives in root's own block (global data block
    // 0), so `/big`'s four payload blocks land at global blocks 1..4 and
    // alternate owners starting from disk 1.
    for k in 0..4 {
        assert_eq!(ctx.stripe_owner(node.blocks[k]), (k + 1) % 2);
    }
}

#[test]
fn scenario_mirrored_corrupt_then_read_repairs_both_disks() {
    let tmp = tempdir().unwrap();
    let mut ctx = format(tmp.path(), RaidMode::Mirrored, 2, 32, 32);

    ops::mknod(&mut ctx, "/f", S_IFREG | 0o644, 0, 0).unwrap();
    ops::write(&mut ctx, "/f", b"world", 0).unwrap();

    let idx = wfs_core::dir::resolve(&ctx, "/f").unwrap();
    let node = wfs_core::inode::read_inode(&ctx, idx);
    let off = node.blocks[0];

    // Corrupt disk 1's copy directly, bypassing replication, as a
    // concurrent bit-rot event would.
    {
        let disk1 = tmp.path().join("disk1.img");
        let f = OpenOptions::new().write(true).open(&disk1).unwrap();
        let zero = [0u8; wfs_core::BLOCK];
        unsafe {
            libc::pwrite(
                f.as_raw_fd(),
                zero.as_ptr() as *const c_void,
                wfs_core::BLOCK,
                off as i64,
            );
        }
    }

    let mut out = [0u8; 5];
    let n = ops::read(&mut ctx, "/f", &mut out, 0).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&out, b"world");

    // The repair from read_block_voted must have propagated to disk 1.
    let repaired = ctx.read_metadata(off, wfs_core::BLOCK);
    drop(ctx);
    let mut disk1_bytes = vec![0u8; wfs_core::BLOCK];
    {
        use std::io::{Read, Seek, SeekFrom};
        let mut f = OpenOptions::new().read(true).open(tmp.path().join("disk1.img")).unwrap();
        f.seek(SeekFrom::Start(off)).unwrap();
        f.read_exact(&mut disk1_bytes).unwrap();
    }
    assert_eq!(disk1_bytes, repaired);
}

#[test]
fn scenario_mkdir_rmdir_reuse() {
    let tmp = tempdir().unwrap();
    let mut ctx = format(tmp.path(), RaidMode::Mirrored, 2, 32, 32);

    let a1 = ops::mkdir(&mut ctx, "/a", 0o755, 0, 0).unwrap();
    ops::rmdir(&mut ctx, "/a").unwrap();
    assert!(matches!(ops::rmdir(&mut ctx, "/a"), Err(FsError::NotFound)));
    assert_eq!(ops::getattr(&mut ctx, "/").unwrap().nlinks, 2);

    let a2 = ops::mkdir(&mut ctx, "/a", 0o755, 0, 0).unwrap();
    assert_eq!(a1.ino, a2.ino, "freed inode index must be reused by the next allocation");
}

#[test]
fn scenario_rmdir_refuses_non_empty_directory() {
    let tmp = tempdir().unwrap();
    let mut ctx = format(tmp.path(), RaidMode::Mirrored, 2, 32, 32);

    ops::mkdir(&mut ctx, "/a", 0o755, 0, 0).unwrap();
    ops::mknod(&mut ctx, "/a/f", S_IFREG | 0o644, 0, 0).unwrap();
    assert!(matches!(ops::rmdir(&mut ctx, "/a"), Err(FsError::NotEmpty)));
}

#[test]
fn allocator_bit_zero_is_reserved_for_root_at_format_time() {
    let tmp = tempdir().unwrap();
    let ctx = format(tmp.path(), RaidMode::Mirrored, 1, 32, 32);
    let map = ctx.read_metadata(ctx.sb().i_bitmap_ptr, ctx.sb().inode_bitmap_bytes() as usize);
    assert!(bitmap::is_set(&map, 0));
    assert!(!bitmap::is_set(&map, 1));
}
