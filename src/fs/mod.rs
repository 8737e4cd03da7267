//! Filesystem bridge: inode cache, path resolution, and the `BlockFs`
//! collaborator trait (spec.md §4.9). The concrete on-disk layout is out of
//! scope (spec.md §1) — see `inode::BlockFs`.

pub mod inode;
