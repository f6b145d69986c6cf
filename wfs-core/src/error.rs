//! Structured error kind shared by every layer of the filesystem.
//!
//! Core code never returns a bare negated `errno`; that translation happens
//! once, at the handler-to-bridge boundary in the `wfs` binary.

use std::fmt;
use std::io;

/// An error raised by the filesystem core.
#[derive(Debug)]
pub enum FsError {
    /// A path component, or the final target, does not resolve.
    NotFound,
    /// `mknod`/`mkdir` target already exists.
    AlreadyExists,
    /// `readdir` on a non-directory, or a malformed (empty child) path.
    NotADirectory,
    /// `rmdir` on a directory whose `size > 0`.
    NotEmpty,
    /// Inode bitmap full, data bitmap full, or write past the maximum
    /// addressable offset.
    NoSpace,
    /// An underlying I/O failure (open, mmap, stat).
    Io(io::Error),
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file or directory"),
            Self::AlreadyExists => write!(f, "file already exists"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl FsError {
    /// The POSIX errno this error kind corresponds to, for handlers that
    /// negate it before returning to the bridge.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotADirectory => libc::EBADF,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NoSpace => libc::ENOSPC,
            Self::Io(_) => libc::EIO,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
