//! Command-line interface

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rootbox")]
#[command(version)]
#[command(about = "Create a root filesystem and run a command inside it with chroot")]
#[command(
    long_about = "Rootbox runs a setup script to populate a root filesystem directory, \
                        bind mounts /dev, /proc and /sys into it, then changes root into it \
                        and executes the command configured in the [chroot] section of the \
                        configuration file."
)]
pub struct Args {
    /// Path to the root filesystem directory
    #[arg(value_name = "ROOTFS_DIR")]
    pub rootfs_dir: PathBuf,

    /// Path to the rootfs setup script
    #[arg(short = 'r', long, value_name = "PATH", default_value = "rootfile.sh")]
    pub rootfile: PathBuf,

    /// Path to the chroot configuration file
    #[arg(short = 'c', long, value_name = "PATH", default_value = "root.conf")]
    pub config: PathBuf,

    /// Interpreter used to run the setup script
    #[arg(long, value_name = "PATH", default_value = "/bin/bash")]
    pub interpreter: PathBuf,

    /// Additionally bind mount host SOURCE to DEST inside the root filesystem
    #[arg(long, value_names = ["SOURCE", "DEST"], num_args = 2)]
    pub bind: Vec<String>,

    /// Additionally bind mount host SOURCE to DEST inside the root filesystem (read-only)
    #[arg(long, value_names = ["SOURCE", "DEST"], num_args = 2)]
    pub ro_bind: Vec<String>,

    /// Run the command as a child and unmount everything once it exits
    #[arg(long)]
    pub unmount_on_exit: bool,

    /// Set logging level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> eyre::Result<()> {
        if self.rootfs_dir.as_os_str().is_empty() {
            eyre::bail!("The root filesystem directory must not be empty");
        }

        // With clap's num_args = 2, these should always be even, but validate anyway
        if !self.bind.len().is_multiple_of(2) {
            eyre::bail!("--bind requires pairs of source and destination");
        }

        if !self.ro_bind.len().is_multiple_of(2) {
            eyre::bail!("--ro-bind requires pairs of source and destination");
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            eyre::bail!(
                "Invalid log level '{}'. Valid levels are: error, warn, info, debug, trace",
                self.log_level
            );
        }

        Ok(())
    }
}
