//! Mount plan for the root filesystem

use crate::bind_mount::{BindMountFlags, BindMountResult};
use crate::host::Host;
use crate::utils::{create_parent_dirs, ensure_dir, ensure_file};
use eyre::{Result, bail};
use std::path::{Component, Path, PathBuf};

/// Directories that must exist under the root before mounting
pub const ROOT_DIRS: [&str; 4] = ["dev", "proc", "sys", "tmp"];

/// A bind mount of a host path into the root filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: PathBuf,
    /// Destination relative to the root filesystem
    pub dest: PathBuf,
    pub flags: BindMountFlags,
}

impl MountSpec {
    /// Bind `source` onto `dest`, where `dest` is a path inside the root.
    ///
    /// A leading `/` on `dest` is dropped; `..` components are rejected.
    pub fn new<P: Into<PathBuf>, Q: AsRef<Path>>(
        source: P,
        dest: Q,
        flags: BindMountFlags,
    ) -> Result<Self> {
        let dest = dest.as_ref();
        let mut relative = PathBuf::new();
        for component in dest.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => relative.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    bail!(
                        "Mount destination {} must not leave the root filesystem",
                        dest.display()
                    );
                }
            }
        }

        if relative.as_os_str().is_empty() {
            bail!("Mount destination {} names the root itself", dest.display());
        }

        Ok(Self {
            source: source.into(),
            dest: relative,
            flags,
        })
    }

    /// Absolute mount point under `root`
    pub fn target(&self, root: &Path) -> PathBuf {
        root.join(&self.dest)
    }

    /// Create the mount point under `root`, matching the source's type
    fn prepare_target(&self, root: &Path) -> Result<PathBuf> {
        let target = self.target(root);

        create_parent_dirs(&target)?;
        if !target.exists() {
            if self.source.is_dir() {
                ensure_dir(&target, 0o755)?;
            } else {
                ensure_file(&target, 0o644)?;
            }
        }

        Ok(target)
    }
}

/// The host pseudo-filesystems bound into every root: `/dev`, `/proc`, `/sys`
pub fn standard_mounts() -> Vec<MountSpec> {
    vec![
        MountSpec {
            source: PathBuf::from("/dev"),
            dest: PathBuf::from("dev"),
            flags: BindMountFlags::DEVICES,
        },
        MountSpec {
            source: PathBuf::from("/proc"),
            dest: PathBuf::from("proc"),
            flags: BindMountFlags::empty(),
        },
        MountSpec {
            source: PathBuf::from("/sys"),
            dest: PathBuf::from("sys"),
            flags: BindMountFlags::empty(),
        },
    ]
}

/// Ensure each of [`ROOT_DIRS`] exists under `root`
pub fn ensure_root_dirs(root: &Path) -> Result<()> {
    for dir in ROOT_DIRS {
        let path = root.join(dir);
        log::debug!("Ensuring directory {}", path.display());
        ensure_dir(&path, 0o755)?;
    }
    Ok(())
}

/// Mounts established under one root.
///
/// With `release` set, everything mounted is detached in reverse order when
/// [`MountSet::release`] is called or the set is dropped. Otherwise the
/// mounts outlive the process.
pub struct MountSet<'h, H: Host> {
    host: &'h mut H,
    root: PathBuf,
    mounted: Vec<PathBuf>,
    release: bool,
}

impl<'h, H: Host> MountSet<'h, H> {
    pub fn new(host: &'h mut H, root: &Path, release: bool) -> Self {
        Self {
            host,
            root: root.to_path_buf(),
            mounted: Vec::new(),
            release,
        }
    }

    /// Mount one spec; a missing source is an error
    pub fn mount(&mut self, spec: &MountSpec) -> Result<()> {
        let target = spec.prepare_target(&self.root)?;

        log::info!(
            "Bind mounting {} to {}",
            spec.source.display(),
            target.display()
        );
        if self.host.bind_mount(&spec.source, &target, spec.flags)?
            == BindMountResult::SourceNotFound
        {
            bail!("Bind mount source {} does not exist", spec.source.display());
        }

        // Tracked before the remount so a failed remount is still released
        self.mounted.push(target.clone());
        if spec.flags.remount_flags().is_some() {
            self.host.remount(&target, spec.flags)?;
        }
        Ok(())
    }

    /// Mount specs in order, stopping at the first failure
    pub fn mount_all<'a, I>(&mut self, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a MountSpec>,
    {
        for spec in specs {
            self.mount(spec)?;
        }
        Ok(())
    }

    pub fn host(&mut self) -> &mut H {
        &mut *self.host
    }

    pub fn mounted(&self) -> &[PathBuf] {
        &self.mounted
    }

    /// Unmount everything mounted so far, most recent first
    pub fn release(&mut self) -> Result<()> {
        while let Some(target) = self.mounted.pop() {
            self.host.unmount(&target)?;
        }
        Ok(())
    }
}

impl<H: Host> Drop for MountSet<'_, H> {
    fn drop(&mut self) {
        if self.release && !self.mounted.is_empty() {
            if let Err(e) = self.release() {
                log::warn!("Failed to release mounts: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::recording::{HostCall, RecordingHost};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_standard_mounts() {
        let mounts = standard_mounts();
        let sources: Vec<_> = mounts.iter().map(|m| m.source.clone()).collect();
        assert_eq!(
            sources,
            vec![
                PathBuf::from("/dev"),
                PathBuf::from("/proc"),
                PathBuf::from("/sys")
            ]
        );
        assert!(mounts[0].flags.contains(BindMountFlags::DEVICES));
        assert!(!mounts[1].flags.contains(BindMountFlags::DEVICES));
    }

    #[test]
    fn test_spec_strips_leading_slash() -> Result<()> {
        let spec = MountSpec::new("/tmp", "/var/tmp", BindMountFlags::empty())?;
        assert_eq!(spec.dest, PathBuf::from("var/tmp"));
        assert_eq!(
            spec.target(Path::new("/srv/root")),
            PathBuf::from("/srv/root/var/tmp")
        );
        Ok(())
    }

    #[test]
    fn test_spec_rejects_escape() {
        assert!(MountSpec::new("/tmp", "../etc", BindMountFlags::empty()).is_err());
        assert!(MountSpec::new("/tmp", "/", BindMountFlags::empty()).is_err());
    }

    #[test]
    fn test_ensure_root_dirs_creates_missing() -> Result<()> {
        let tmp = TempDir::new()?;
        fs::create_dir(tmp.path().join("proc"))?;

        ensure_root_dirs(tmp.path())?;
        for dir in ROOT_DIRS {
            assert!(tmp.path().join(dir).is_dir(), "{} missing", dir);
        }
        Ok(())
    }

    #[test]
    fn test_mount_set_creates_file_target() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("root");
        fs::create_dir(&root)?;
        let source = tmp.path().join("resolv.conf");
        fs::write(&source, "nameserver 127.0.0.1\n")?;

        let spec = MountSpec::new(&source, "/etc/resolv.conf", BindMountFlags::READONLY)?;
        let mut host = RecordingHost::default();
        let mut mounts = MountSet::new(&mut host, &root, false);
        mounts.mount(&spec)?;

        assert!(root.join("etc/resolv.conf").is_file());
        assert_eq!(mounts.mounted(), &[root.join("etc/resolv.conf")]);
        drop(mounts);

        assert_eq!(
            host.calls.last(),
            Some(&HostCall::Remount {
                dest: root.join("etc/resolv.conf"),
                flags: BindMountFlags::READONLY,
            })
        );
        Ok(())
    }

    #[test]
    fn test_mount_set_stops_at_failure() -> Result<()> {
        let tmp = TempDir::new()?;
        ensure_root_dirs(tmp.path())?;

        let mut host = RecordingHost {
            fail_source: Some(PathBuf::from("/proc")),
            ..Default::default()
        };
        {
            let mut mounts = MountSet::new(&mut host, tmp.path(), false);
            assert!(mounts.mount_all(&standard_mounts()).is_err());
            assert_eq!(mounts.mounted().len(), 1);
        }

        // /sys is never attempted and nothing is unmounted
        assert_eq!(host.mounts().len(), 2);
        assert!(!host.calls.iter().any(|c| matches!(c, HostCall::Unmount(_))));
        Ok(())
    }

    #[test]
    fn test_mount_set_tracks_mount_when_remount_fails() -> Result<()> {
        let tmp = TempDir::new()?;
        ensure_root_dirs(tmp.path())?;

        let mut host = RecordingHost {
            fail_remount: Some(tmp.path().join("sys")),
            ..Default::default()
        };
        {
            let mut mounts = MountSet::new(&mut host, tmp.path(), true);
            assert!(mounts.mount_all(&standard_mounts()).is_err());
            assert_eq!(mounts.mounted().len(), 3);
        }

        let unmounts: Vec<_> = host
            .calls
            .iter()
            .filter_map(|c| match c {
                HostCall::Unmount(target) => Some(target.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            unmounts,
            vec![
                tmp.path().join("sys"),
                tmp.path().join("proc"),
                tmp.path().join("dev")
            ]
        );
        Ok(())
    }

    #[test]
    fn test_devices_mount_skips_remount() -> Result<()> {
        let tmp = TempDir::new()?;
        ensure_root_dirs(tmp.path())?;

        let mut host = RecordingHost::default();
        let mut mounts = MountSet::new(&mut host, tmp.path(), false);
        mounts.mount(&standard_mounts()[0])?;
        drop(mounts);

        assert!(!host.calls.iter().any(|c| matches!(c, HostCall::Remount { .. })));
        Ok(())
    }

    #[test]
    fn test_mount_set_releases_in_reverse_on_drop() -> Result<()> {
        let tmp = TempDir::new()?;
        ensure_root_dirs(tmp.path())?;

        let mut host = RecordingHost::default();
        {
            let mut mounts = MountSet::new(&mut host, tmp.path(), true);
            mounts.mount_all(&standard_mounts())?;
        }

        let unmounts: Vec<_> = host
            .calls
            .iter()
            .filter_map(|c| match c {
                HostCall::Unmount(target) => Some(target.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            unmounts,
            vec![
                tmp.path().join("sys"),
                tmp.path().join("proc"),
                tmp.path().join("dev")
            ]
        );
        Ok(())
    }
}
