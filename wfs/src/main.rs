//! The `wfs` daemon: memory-maps a set of disk images and serves them as a
//! single POSIX hierarchy through FUSE.

mod fs;

use std::path::PathBuf;
use std::process::exit;

use wfs_core::DiskSet;

/// Splits the command line into the leading disk-image arguments and the
/// remainder to forward to the kernel bridge, per spec.md §6: consume
/// positional arguments as disks until one begins with `-` or fails to
/// `stat`, whichever comes first.
fn split_args(raw: Vec<String>) -> (Vec<PathBuf>, Vec<String>) {
    let mut disks = Vec::new();
    let mut iter = raw.into_iter().peekable();
    while let Some(arg) = iter.peek() {
        if arg.starts_with('-') || std::fs::metadata(arg).is_err() {
            break;
        }
        disks.push(PathBuf::from(iter.next().unwrap()));
    }
    (disks, iter.collect())
}

fn main() {
    env_logger::init();

    let prog = std::env::args().next().unwrap_or_else(|| "wfs".to_owned());
    let rest: Vec<String> = std::env::args().skip(1).collect();
    let (disk_paths, bridge_args) = split_args(rest);

    let Some(mount_point) = bridge_args.last().cloned() else {
        eprintln!("{prog}: usage: {prog} <image1> [<image2> ...] [options] <mount_point>");
        exit(1);
    };

    let disk_set = DiskSet::open(&disk_paths).unwrap_or_else(|e| {
        eprintln!("{prog}: {e}");
        exit(255);
    });

    log::info!(
        "mounting {} disk(s) at {mount_point} (raid_mode={:?})",
        disk_paths.len(),
        disk_set.sb().raid_mode()
    );

    let options: Vec<fuser::MountOption> = bridge_args[..bridge_args.len() - 1]
        .iter()
        .filter_map(|a| a.strip_prefix("-o"))
        .flat_map(|opts| opts.split(','))
        .filter(|s| !s.is_empty())
        .map(|s| fuser::MountOption::CUSTOM(s.to_string()))
        .collect();

    let filesystem = fs::WfsFuse::new(disk_set);
    if let Err(e) = fuser::mount2(filesystem, &mount_point, &options) {
        eprintln!("{prog}: mount failed: {e}");
        exit(1);
    }
}
