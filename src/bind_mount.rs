//! Bind mount operations

use eyre::{Context, Result};
use nix::mount::{MsFlags, mount};
use std::path::Path;

bitflags::bitflags! {
    /// Bind mount flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BindMountFlags: u32 {
        const READONLY = 1 << 0;
        const DEVICES = 1 << 1;
        const RECURSIVE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMountResult {
    Success,
    SourceNotFound,
}

impl BindMountFlags {
    /// Flags for the initial `MS_BIND` mount
    pub fn mount_flags(self) -> MsFlags {
        let mut mount_flags = MsFlags::MS_BIND;
        if self.contains(BindMountFlags::RECURSIVE) {
            mount_flags |= MsFlags::MS_REC;
        }
        mount_flags
    }

    /// Flags for the follow-up remount, if one is needed
    ///
    /// Read-only and nodev must be applied in a single remount, separate
    /// remounts override each other.
    pub fn remount_flags(self) -> Option<MsFlags> {
        let readonly = self.contains(BindMountFlags::READONLY);
        let nodev = !self.contains(BindMountFlags::DEVICES);
        if !readonly && !nodev {
            return None;
        }

        let mut remount_flags = MsFlags::MS_BIND | MsFlags::MS_REMOUNT;
        if readonly {
            remount_flags |= MsFlags::MS_RDONLY;
        }
        if nodev {
            remount_flags |= MsFlags::MS_NODEV;
        }
        Some(remount_flags)
    }
}

/// Perform the initial bind mount.
///
/// Read-only and nodev are not applied here, see [`remount_bind`].
pub fn bind_mount<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    dest: Q,
    flags: BindMountFlags,
) -> Result<BindMountResult> {
    let source = source.as_ref();
    let dest = dest.as_ref();

    log::debug!(
        "bind_mount: source={}, dest={}, flags={:?}",
        source.display(),
        dest.display(),
        flags
    );

    if !source.exists() {
        log::debug!("Bind mount source not found: {}", source.display());
        return Ok(BindMountResult::SourceNotFound);
    }

    let mount_flags = flags.mount_flags();
    log::debug!("Performing bind mount with flags: {:?}", mount_flags);
    mount(Some(source), dest, None::<&str>, mount_flags, None::<&str>).wrap_err_with(|| {
        format!(
            "Failed to bind mount {} to {}",
            source.display(),
            dest.display()
        )
    })?;

    log::debug!("Bind mount of {} completed", dest.display());
    Ok(BindMountResult::Success)
}

/// Apply read-only and nodev to an established bind mount, if `flags` call for it
pub fn remount_bind<P: AsRef<Path>>(dest: P, flags: BindMountFlags) -> Result<()> {
    let dest = dest.as_ref();

    let Some(remount_flags) = flags.remount_flags() else {
        return Ok(());
    };

    log::debug!("Remounting {} with flags: {:?}", dest.display(), remount_flags);
    mount(
        None::<&str>,
        dest,
        None::<&str>,
        remount_flags,
        None::<&str>,
    )
    .wrap_err_with(|| format!("Failed to apply remount flags to {}", dest.display()))?;

    Ok(())
}
