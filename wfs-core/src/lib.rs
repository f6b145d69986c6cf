//! Core of the wfs striped/mirrored filesystem: on-disk layout, the bitmap
//! allocator, the disk set's replication and voting rules, the inode store,
//! directory logic, and the operation handlers bound on top of them.
//!
//! Binds to a kernel filesystem bridge; this crate has no FUSE dependency
//! itself, so it can be exercised directly in tests without mounting
//! anything.

pub mod bitmap;
pub mod dir;
pub mod diskset;
pub mod error;
pub mod inode;
pub mod layout;
pub mod ops;
pub mod time;

pub use diskset::DiskSet;
pub use error::{FsError, FsResult};
pub use layout::{Inode, Kind, RaidMode, Superblock, BLOCK, D, MAX_NAME};
pub use ops::Attr;
