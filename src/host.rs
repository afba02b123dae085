//! Privileged host operations
//!
//! Everything that needs root (mounting, unmounting, changing root) goes
//! through the [`Host`] trait so the launch sequence can be driven against a
//! recording implementation in tests.

use crate::bind_mount::{BindMountFlags, BindMountResult, bind_mount, remount_bind};
use eyre::{Context, Result, bail};
use nix::mount::{MntFlags, umount2};
use nix::unistd::{chdir, chroot};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::Command;

pub trait Host {
    /// Bind mount `source` onto `dest`
    fn bind_mount(&mut self, source: &Path, dest: &Path, flags: BindMountFlags)
    -> Result<BindMountResult>;

    /// Apply the read-only/nodev part of `flags` to the bind mount at `dest`
    fn remount(&mut self, dest: &Path, flags: BindMountFlags) -> Result<()>;

    /// Detach the mount at `target`
    fn unmount(&mut self, target: &Path) -> Result<()>;

    /// Change root to `root` and replace the current process with `argv`.
    ///
    /// Only returns on failure.
    fn exec_in_root(&mut self, root: &Path, argv: &[String]) -> Result<()>;

    /// Run `argv` as a child changed-root into `root` and wait for its exit code
    fn run_in_root(&mut self, root: &Path, argv: &[String]) -> Result<i32>;
}

/// The real Linux host
#[derive(Debug, Default)]
pub struct LinuxHost;

impl Host for LinuxHost {
    fn bind_mount(
        &mut self,
        source: &Path,
        dest: &Path,
        flags: BindMountFlags,
    ) -> Result<BindMountResult> {
        bind_mount(source, dest, flags)
    }

    fn remount(&mut self, dest: &Path, flags: BindMountFlags) -> Result<()> {
        remount_bind(dest, flags)
    }

    fn unmount(&mut self, target: &Path) -> Result<()> {
        log::debug!("Unmounting {}", target.display());
        umount2(target, MntFlags::MNT_DETACH)
            .wrap_err_with(|| format!("Failed to unmount {}", target.display()))
    }

    fn exec_in_root(&mut self, root: &Path, argv: &[String]) -> Result<()> {
        let mut cmd = command_for(argv)?;

        enter_root(root)?;

        // exec() replaces the current process and only returns on error
        let err = cmd.exec();
        Err(err).wrap_err_with(|| format!("Failed to execute {}", argv[0]))
    }

    fn run_in_root(&mut self, root: &Path, argv: &[String]) -> Result<i32> {
        let mut cmd = command_for(argv)?;
        let root = root.to_path_buf();

        // SAFETY: chroot(2) and chdir(2) are async-signal-safe and the
        // closure does not allocate.
        unsafe {
            cmd.pre_exec(move || {
                chroot(root.as_path())?;
                chdir("/")?;
                Ok(())
            });
        }

        let status = cmd
            .status()
            .wrap_err_with(|| format!("Failed to execute {}", argv[0]))?;

        match (status.code(), status.signal()) {
            (Some(code), _) => Ok(code),
            (None, Some(sig)) => Ok(128 + sig),
            _ => Ok(1),
        }
    }
}

fn command_for(argv: &[String]) -> Result<Command> {
    let Some((program, args)) = argv.split_first() else {
        bail!("No command specified");
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// chroot into `root` and move to its `/`
fn enter_root(root: &Path) -> Result<()> {
    log::debug!("Changing root to {}", root.display());
    chroot(root).wrap_err_with(|| format!("Failed to chroot into {}", root.display()))?;
    chdir("/").wrap_err("Failed to change directory to / in new root")?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::recording::RecordingHost;
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_command_for_splits_program_and_args() -> Result<()> {
        let argv = vec!["/bin/ls".to_string(), "-la".to_string()];
        let cmd = command_for(&argv)?;
        assert_eq!(cmd.get_program(), "/bin/ls");
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), vec!["-la"]);
        Ok(())
    }

    #[test]
    fn test_command_for_rejects_empty() {
        assert!(command_for(&[]).is_err());
    }

    #[test]
    fn test_exec_in_root_needs_privileges() {
        // chroot fails with EPERM unless running as root; the process is left intact
        if nix::unistd::geteuid().as_raw() != 0 {
            let argv = vec!["/bin/true".to_string()];
            let err = LinuxHost.exec_in_root(Path::new("/"), &argv).unwrap_err();
            assert!(err.to_string().contains("Failed to chroot"));
        }
    }

    #[test]
    fn test_recording_host_fails_configured_source() {
        let mut host = RecordingHost {
            fail_source: Some(PathBuf::from("/proc")),
            ..Default::default()
        };
        assert!(
            host.bind_mount(Path::new("/dev"), Path::new("/r/dev"), BindMountFlags::DEVICES)
                .is_ok()
        );
        assert!(
            host.bind_mount(Path::new("/proc"), Path::new("/r/proc"), BindMountFlags::empty())
                .is_err()
        );
        assert_eq!(host.mounts().len(), 2);
    }
}
