//! Launch sequence: prepare the root filesystem, mount, change root and run

use crate::bind_mount::BindMountFlags;
use crate::cli::Args;
use crate::config::ChrootConfig;
use crate::host::Host;
use crate::mount::{MountSet, MountSpec, ensure_root_dirs, standard_mounts};
use crate::rootfs::prepare_rootfs;
use eyre::{Context, Result};
use std::path::PathBuf;

/// Everything needed for one launch, built once from the command line
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub rootfs_dir: PathBuf,
    pub rootfile: PathBuf,
    pub config_path: PathBuf,
    pub interpreter: PathBuf,
    pub extra_mounts: Vec<MountSpec>,
    pub unmount_on_exit: bool,
}

impl LaunchConfig {
    /// Create launch config from CLI arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut extra_mounts = Vec::new();

        // Parse bind mounts; device nodes stay usable so /dev/pts and the like work
        for chunk in args.bind.chunks(2) {
            if let [source, dest] = chunk {
                extra_mounts.push(MountSpec::new(
                    source,
                    dest,
                    BindMountFlags::RECURSIVE | BindMountFlags::DEVICES,
                )?);
            }
        }

        // Parse read-only bind mounts
        for chunk in args.ro_bind.chunks(2) {
            if let [source, dest] = chunk {
                extra_mounts.push(MountSpec::new(
                    source,
                    dest,
                    BindMountFlags::RECURSIVE | BindMountFlags::READONLY,
                )?);
            }
        }

        Ok(Self {
            rootfs_dir: args.rootfs_dir.clone(),
            rootfile: args.rootfile.clone(),
            config_path: args.config.clone(),
            interpreter: args.interpreter.clone(),
            extra_mounts,
            unmount_on_exit: args.unmount_on_exit,
        })
    }

    /// Prepare the root filesystem, then run the configured command in it.
    ///
    /// Returns the exit code to leave with. When the command is exec'd on a
    /// real host this only returns on failure.
    pub fn run<H: Host>(&self, host: &mut H) -> Result<i32> {
        log::info!("Preparing root filesystem {}", self.rootfs_dir.display());
        prepare_rootfs(&self.rootfs_dir, &self.rootfile, &self.interpreter).wrap_err_with(
            || {
                format!(
                    "Failed to prepare root filesystem {}",
                    self.rootfs_dir.display()
                )
            },
        )?;

        self.execute(host).wrap_err_with(|| {
            format!("Failed to run command in {}", self.rootfs_dir.display())
        })
    }

    /// Load the config, mount, change root and run the command
    pub fn execute<H: Host>(&self, host: &mut H) -> Result<i32> {
        let config = ChrootConfig::load(&self.config_path)?;
        let argv = config.argv();
        log::debug!("Resolved command: {:?}", argv);

        ensure_root_dirs(&self.rootfs_dir)?;

        let mut mounts = MountSet::new(host, &self.rootfs_dir, self.unmount_on_exit);
        mounts.mount_all(standard_mounts().iter().chain(&self.extra_mounts))?;
        log::info!("Established {} bind mounts", mounts.mounted().len());

        log::info!(
            "Executing {:?} in {}",
            argv,
            self.rootfs_dir.display()
        );
        if self.unmount_on_exit {
            let code = mounts.host().run_in_root(&self.rootfs_dir, &argv)?;
            log::info!("Command exited with status {}", code);
            mounts.release()?;
            return Ok(code);
        }

        mounts.host().exec_in_root(&self.rootfs_dir, &argv)?;

        // Only reached when the host does not replace the process
        Ok(0)
    }
}
