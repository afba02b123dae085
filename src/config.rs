//! `[chroot]` configuration file

use configparser::ini::{Ini, IniDefault};
use eyre::{Context, Result, bail, eyre};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Section holding the chroot settings
pub const CHROOT_SECTION: &str = "chroot";

/// Command run when the configuration does not name one
pub const DEFAULT_COMMAND: &str = "/bin/bash";

/// Settings read from the `[chroot]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChrootConfig {
    /// Command line executed inside the root filesystem
    pub command: String,
}

impl Default for ChrootConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
        }
    }
}

impl ChrootConfig {
    /// Load the configuration from an INI file.
    ///
    /// A missing file yields the defaults. A file that exists but cannot be
    /// read or parsed is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::warn!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        log::debug!("Loading configuration from {}", path.display());
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read configuration {}", path.display()))?;

        Self::parse(&contents)
            .wrap_err_with(|| format!("Invalid configuration {}", path.display()))
    }

    /// Parse the configuration from INI text
    pub fn parse(contents: &str) -> Result<Self> {
        check_syntax(contents)?;

        let mut ini = new_ini();
        ini.read(contents.to_string())
            .map_err(|e| eyre!("Failed to parse configuration: {}", e))?;

        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &Ini) -> Self {
        let command = ini
            .get_map_ref()
            .get(CHROOT_SECTION)
            .and_then(|section| {
                section
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case("command"))
            })
            .and_then(|(_, value)| value.as_deref());

        match command {
            Some(command) if !command.trim().is_empty() => {
                log::debug!("Configured command: {}", command);
                Self {
                    command: command.trim().to_string(),
                }
            }
            _ => {
                log::debug!("No command configured, falling back to {}", DEFAULT_COMMAND);
                Self::default()
            }
        }
    }

    /// Split the command into program and arguments
    pub fn argv(&self) -> Vec<String> {
        self.command
            .split_ascii_whitespace()
            .map(str::to_string)
            .collect()
    }
}

/// Section names are case-sensitive and values are taken whole: `;` and `#`
/// only start a comment at the beginning of a line. Indented lines continue
/// the previous value.
fn new_ini() -> Ini {
    let mut defaults = IniDefault::default();
    defaults.case_sensitive = true;
    defaults.enable_inline_comments = false;
    defaults.multiline = true;
    Ini::new_from_defaults(defaults)
}

/// Reject text the INI reader would otherwise accept silently: content before
/// the first section header, keys without a value, and repeated sections or
/// keys. Key names compare case-insensitively, section names do not.
fn check_syntax(contents: &str) -> Result<()> {
    let mut sections = HashSet::new();
    let mut keys = HashSet::new();
    let mut section: Option<&str> = None;
    // indentation of the last key line, while a continuation is possible
    let mut key_indent: Option<usize> = None;

    for (num, raw_line) in (1..).zip(contents.lines()) {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with([';', '#']) {
            continue;
        }

        let indent = raw_line.len() - raw_line.trim_start().len();
        if key_indent.is_some_and(|key_indent| indent > key_indent) {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let Some(name) = header.strip_suffix(']').map(str::trim) else {
                bail!("line {}: section header is missing its closing bracket", num);
            };
            if name.is_empty() {
                bail!("line {}: empty section name", num);
            }
            if !sections.insert(name) {
                bail!("line {}: section [{}] already exists", num, name);
            }
            section = Some(name);
            key_indent = None;
            continue;
        }

        let Some(section) = section else {
            bail!("line {}: content before the first section header", num);
        };

        let Some(idx) = line.find(['=', ':']) else {
            bail!("line {}: key '{}' has no value", num, line);
        };
        let key = line[..idx].trim();
        if key.is_empty() {
            bail!("line {}: empty key", num);
        }
        if !keys.insert((section, key.to_lowercase())) {
            bail!("line {}: key '{}' already set in [{}]", num, key, section);
        }
        key_indent = Some(indent);
    }

    Ok(())
}
