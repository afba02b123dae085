//! Utility functions

use eyre::{Context, Result, bail};
use std::fs::{self, File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Ensure a directory exists with given permissions
pub fn ensure_dir<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    let path = path.as_ref();

    if path.exists() {
        if !path.is_dir() {
            bail!("{} exists but is not a directory", path.display());
        }
        return Ok(());
    }

    fs::create_dir(path)
        .wrap_err_with(|| format!("Failed to create directory {}", path.display()))?;
    fs::set_permissions(path, Permissions::from_mode(mode))?;

    Ok(())
}

/// Ensure a directory and all of its parents exist
pub fn ensure_dir_all<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if path.exists() && !path.is_dir() {
        bail!("{} exists but is not a directory", path.display());
    }

    fs::create_dir_all(path)
        .wrap_err_with(|| format!("Failed to create directory {}", path.display()))
}

/// Ensure a file exists with given permissions
pub fn ensure_file<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    let path = path.as_ref();

    if !path.exists() {
        File::create(path)
            .wrap_err_with(|| format!("Failed to create file {}", path.display()))?;
        fs::set_permissions(path, Permissions::from_mode(mode))?;
    }

    Ok(())
}

/// Create parent directories of `path`
pub fn create_parent_dirs<P: AsRef<Path>>(path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.exists() {
            ensure_dir_all(parent)?;
        }
    }
    Ok(())
}
