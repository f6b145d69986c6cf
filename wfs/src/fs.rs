//! Bridges `fuser`'s inode-number-based `Filesystem` trait onto
//! `wfs_core::ops`'s path-based handlers.
//!
//! `fuser` works in terms of `u64` inode numbers handed out by the kernel,
//! while the core (faithful to the original path-based bridge) resolves
//! everything by path. This adapter keeps a small `ino -> path` cache,
//! populated whenever a path is resolved via `lookup`/`readdir`, and is the
//! only place in the whole crate that knows about that translation —
//! `wfs_core` itself never sees a `fuser` type.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyWrite, Request,
};

use wfs_core::ops::Attr;
use wfs_core::{DiskSet, FsError};

const TTL: Duration = Duration::from_secs(1);

/// `FUSE_ROOT_ID`; `wfs`'s own root directory is inode index 0, so every
/// fuse-visible inode number is `wfs_inode_index + 1`.
const FUSE_ROOT_ID: u64 = 1;

pub struct WfsFuse {
    ctx: DiskSet,
    paths: HashMap<u64, String>,
}

impl WfsFuse {
    pub fn new(ctx: DiskSet) -> Self {
        let mut paths = HashMap::new();
        paths.insert(FUSE_ROOT_ID, "/".to_string());
        Self { ctx, paths }
    }

    fn fuse_ino(wfs_ino: u64) -> u64 {
        wfs_ino + 1
    }

    fn path_for(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    fn remember(&mut self, ino: u64, path: String) {
        self.paths.insert(ino, path);
    }

    fn child_path(parent_path: &str, name: &OsStr) -> String {
        let name = name.to_string_lossy();
        if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        }
    }

    fn to_file_attr(attr: &Attr) -> FileAttr {
        let kind = if wfs_core::Kind::from_mode(attr.mode) == Some(wfs_core::Kind::Directory) {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let secs_to_time = |s: i64| UNIX_EPOCH + Duration::from_secs(s.max(0) as u64);
        FileAttr {
            ino: Self::fuse_ino(attr.ino),
            size: attr.size,
            blocks: attr.size.div_ceil(wfs_core::BLOCK as u64),
            atime: secs_to_time(attr.atim),
            mtime: secs_to_time(attr.mtim),
            ctime: secs_to_time(attr.ctim),
            crtime: SystemTime::UNIX_EPOCH,
            kind,
            perm: (attr.mode & 0o7777) as u16,
            nlink: attr.nlinks,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: wfs_core::BLOCK as u32,
            flags: 0,
        }
    }
}

/// Maps a core error to the errno `fuser`'s reply types expect.
fn errno(e: &FsError) -> i32 {
    e.errno()
}

impl Filesystem for WfsFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_for(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = Self::child_path(&parent_path, name);
        match wfs_core::ops::getattr(&mut self.ctx, &child_path) {
            Ok(attr) => {
                self.remember(Self::fuse_ino(attr.ino), child_path);
                reply.entry(&TTL, &Self::to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.path_for(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        match wfs_core::ops::getattr(&mut self.ctx, &path) {
            Ok(attr) => reply.attr(&TTL, &Self::to_file_attr(&attr)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_for(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = Self::child_path(&parent_path, name);
        match wfs_core::ops::mknod(&mut self.ctx, &child_path, mode, req.uid(), req.gid()) {
            Ok(attr) => {
                self.remember(Self::fuse_ino(attr.ino), child_path);
                reply.entry(&TTL, &Self::to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.path_for(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = Self::child_path(&parent_path, name);
        match wfs_core::ops::mkdir(&mut self.ctx, &child_path, mode, req.uid(), req.gid()) {
            Ok(attr) => {
                self.remember(Self::fuse_ino(attr.ino), child_path);
                reply.entry(&TTL, &Self::to_file_attr(&attr), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_for(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = Self::child_path(&parent_path, name);
        match wfs_core::ops::unlink(&mut self.ctx, &child_path) {
            Ok(()) => {
                self.paths.retain(|_, p| p != &child_path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.path_for(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = Self::child_path(&parent_path, name);
        match wfs_core::ops::rmdir(&mut self.ctx, &child_path) {
            Ok(()) => {
                self.paths.retain(|_, p| p != &child_path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_for(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match wfs_core::ops::read(&mut self.ctx, &path, &mut buf, offset.max(0) as u64) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_for(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        match wfs_core::ops::write(&mut self.ctx, &path, data, offset.max(0) as u64) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_for(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match wfs_core::ops::readdir(&mut self.ctx, &path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        for (i, (name, attr)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            let kind = if wfs_core::Kind::from_mode(attr.mode) == Some(wfs_core::Kind::Directory) {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            let child_ino = Self::fuse_ino(attr.ino);
            if name.as_str() != "." && name.as_str() != ".." {
                self.remember(child_ino, Self::child_path(&path, OsStr::new(name.as_str())));
            }
            let full = i as i64 + 1;
            if reply.add(child_ino, full, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}
