//! Root filesystem preparation

use crate::utils::ensure_dir_all;
use eyre::{Context, Result, bail};
use std::path::Path;
use std::process::Command;

/// Create `rootfs` if needed and populate it by running `rootfile`.
///
/// The script is run once as `<interpreter> <rootfile> <rootfs>` and inherits
/// the environment, working directory and stdio of this process.
pub fn prepare_rootfs<P, Q, R>(rootfs: P, rootfile: Q, interpreter: R) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let rootfs = rootfs.as_ref();
    let rootfile = rootfile.as_ref();
    let interpreter = interpreter.as_ref();

    if !rootfs.exists() {
        log::info!("Creating root filesystem directory {}", rootfs.display());
    }
    ensure_dir_all(rootfs)?;

    log::info!(
        "Running {} {} {}",
        interpreter.display(),
        rootfile.display(),
        rootfs.display()
    );
    let status = Command::new(interpreter)
        .arg(rootfile)
        .arg(rootfs)
        .status()
        .wrap_err_with(|| format!("Failed to spawn {}", interpreter.display()))?;

    if !status.success() {
        bail!("Error executing {}: {}", rootfile.display(), status);
    }

    log::debug!("{} completed successfully", rootfile.display());
    Ok(())
}
