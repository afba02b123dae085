//! Rootbox - prepare a root filesystem and run a command inside it
//!
//! A setup script populates the root filesystem, the host's `/dev`, `/proc`
//! and `/sys` are bind mounted into it, and the command configured in the
//! `[chroot]` section of an INI file is executed after changing root.

pub mod bind_mount;
pub mod cli;
pub mod config;
pub mod host;
pub mod launcher;
pub mod mount;
pub mod rootfs;
pub mod utils;
