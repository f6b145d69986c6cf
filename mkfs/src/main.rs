//! Offline formatter: writes a fresh wfs layout onto a set of disk images.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;

use wfs_core::layout::{round_up, Superblock, S_IFDIR};
use wfs_core::{bitmap, diskset::MappedDisk, RaidMode};

struct Args {
    prog: String,
    raid_mode: Option<u32>,
    disks: Vec<PathBuf>,
    num_inodes: u64,
    num_data_blocks: u64,
}

fn usage(prog: &str) {
    eprintln!(
        "Usage: {prog} -r <raid mode> -d <disk image file> [-d <disk image file> ...] -i <inode count> -b <data block count>"
    );
    eprintln!("\t-r RAID mode: 0 (striping) or 1 (mirroring)");
    eprintln!("\t-d Specifies a disk file (can be used multiple times, max 10)");
    eprintln!("\t-i Number of inodes in the filesystem (rounded up to a multiple of 32)");
    eprintln!("\t-b Number of data blocks in the filesystem (rounded up to a multiple of 32)");
}

/// Hand-parses `-r`/`-d`/`-i`/`-b`, mirroring the flag-with-following-value
/// shape of the original CLI. `-d` may repeat; every other flag is a single
/// value, last one wins.
fn parse_args() -> Args {
    let mut iter = std::env::args();
    let prog = iter.next().unwrap_or_else(|| "mkfs".to_owned());

    let mut args = Args {
        prog: prog.clone(),
        raid_mode: None,
        disks: Vec::new(),
        num_inodes: 0,
        num_data_blocks: 0,
    };

    while let Some(flag) = iter.next() {
        let value = iter.next().unwrap_or_else(|| {
            eprintln!("{prog}: missing value for `{flag}`");
            usage(&prog);
            exit(1);
        });
        match flag.as_str() {
            "-r" => {
                let mode: u32 = value.parse().unwrap_or(u32::MAX);
                if mode != 0 && mode != 1 {
                    eprintln!("{prog}: invalid RAID mode, use 0 (striping) or 1 (mirroring)");
                    usage(&prog);
                    exit(1);
                }
                args.raid_mode = Some(mode);
            }
            "-d" => {
                if args.disks.len() >= 10 {
                    eprintln!("{prog}: too many disk files specified (maximum 10)");
                    exit(1);
                }
                args.disks.push(PathBuf::from(value));
            }
            "-i" => {
                args.num_inodes = round_up(value.parse().unwrap_or(0), 32);
            }
            "-b" => {
                args.num_data_blocks = round_up(value.parse().unwrap_or(0), 32);
            }
            other => {
                eprintln!("{prog}: unknown option `{other}`");
                usage(&prog);
                exit(1);
            }
        }
    }

    args
}

fn main() {
    let args = parse_args();

    if args.raid_mode.is_none()
        || args.disks.is_empty()
        || args.num_inodes == 0
        || args.num_data_blocks == 0
    {
        usage(&args.prog);
        exit(1);
    }
    let raid_mode = RaidMode::try_from(args.raid_mode.unwrap()).unwrap();

    if raid_mode == RaidMode::Mirrored && args.disks.len() < 2 {
        eprintln!("{}: RAID 1 (mirrored) requires at least two disks", args.prog);
        exit(1);
    }

    let sb = Superblock::new(
        args.num_inodes,
        args.num_data_blocks,
        raid_mode,
        args.disks.len() as u32,
    );
    let fs_size = sb.fs_size();

    let mut total_disk_space: u64 = 0;
    for path in &args.disks {
        let meta = std::fs::metadata(path).unwrap_or_else(|e| {
            eprintln!("{}: {}: {e}", args.prog, path.display());
            exit(1);
        });
        total_disk_space = total_disk_space.saturating_add(meta.len());
    }

    let enough = match raid_mode {
        RaidMode::Striped => fs_size <= total_disk_space / args.disks.len() as u64,
        RaidMode::Mirrored => {
            let first = std::fs::metadata(&args.disks[0]).unwrap();
            fs_size <= first.len()
        }
    };
    if !enough {
        eprintln!(
            "{}: requested inode/data-block counts exceed available disk space",
            args.prog
        );
        exit(255);
    }

    for path in &args.disks {
        if let Err(e) = OpenOptions::new().read(true).write(true).open(path) {
            eprintln!("{}: {}: {e}", args.prog, path.display());
            exit(1);
        }
    }

    let mut disks: Vec<MappedDisk> = args
        .disks
        .iter()
        .map(|p| {
            MappedDisk::open(p, fs_size).unwrap_or_else(|e| {
                eprintln!("{}: {}: {e}", args.prog, p.display());
                exit(1);
            })
        })
        .collect();

    for disk in &mut disks {
        disk.as_mut_slice().fill(0);
    }

    disks[0].as_mut_slice()[..Superblock::SIZE].copy_from_slice(&sb.to_bytes());

    // Mark the root inode allocated and write its record. Its directory
    // data blocks are left entirely unallocated: `.`/`..` are synthesized
    // by readdir for every directory, root included, rather than
    // pre-written on disk (see DESIGN.md).
    let i_bitmap_off = sb.i_bitmap_ptr as usize;
    let mut i_bitmap = vec![0u8; sb.inode_bitmap_bytes() as usize];
    bitmap::set(&mut i_bitmap, wfs_core::layout::ROOT_INODE as usize);
    disks[0].as_mut_slice()[i_bitmap_off..i_bitmap_off + i_bitmap.len()].copy_from_slice(&i_bitmap);

    let now = wfs_core::time::now_secs();
    let root = wfs_core::layout::Inode {
        num: wfs_core::layout::ROOT_INODE,
        mode: S_IFDIR | 0o755,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        size: 0,
        nlinks: 2,
        atim: now,
        mtim: now,
        ctim: now,
        blocks: [wfs_core::layout::NULL_BLOCK; wfs_core::layout::BLOCKS_PER_INODE],
    };
    let root_off = sb.inode_offset(wfs_core::layout::ROOT_INODE) as usize;
    let mut root_bytes = [0u8; wfs_core::layout::BLOCK];
    root.write_into(&mut root_bytes);
    disks[0].as_mut_slice()[root_off..root_off + root_bytes.len()].copy_from_slice(&root_bytes);

    // Metadata is mirrored in both RAID modes: copy disk 0's whole region.
    let region = disks[0].as_slice()[..fs_size as usize].to_vec();
    for disk in disks.iter_mut().skip(1) {
        disk.as_mut_slice()[..region.len()].copy_from_slice(&region);
    }
}
