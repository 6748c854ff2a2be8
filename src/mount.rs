//! Makes sure the boot partition is mounted before anything touches it.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::context::BootContext;
use crate::process::Cmd;

/// Access a command needs to the boot partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// One row of a `/proc/mounts`-style table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|opt| opt == "ro")
    }
}

/// Parse a mount table. Malformed rows are skipped.
pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next()?;
            Some(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(unescape_octal(mount_point)),
                fs_type: fs_type.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The boot partition collaborator.
#[derive(Debug, Clone)]
pub struct BootMount {
    mount_point: PathBuf,
    device: Option<PathBuf>,
    mounts_table: PathBuf,
}

impl BootMount {
    pub fn new(ctx: &BootContext) -> Self {
        Self {
            mount_point: ctx.boot_mount.clone(),
            device: ctx.boot_device.clone(),
            mounts_table: ctx.mounts_table.clone(),
        }
    }

    /// Current mount table entry for the boot mount point, if any.
    pub fn entry(&self) -> Result<Option<MountEntry>> {
        let text = fs::read_to_string(&self.mounts_table)
            .with_context(|| format!("reading mount table '{}'", self.mounts_table.display()))?;
        // Later rows shadow earlier ones mounted on the same point.
        Ok(parse_mounts(&text)
            .into_iter()
            .rev()
            .find(|entry| entry.mount_point == self.mount_point))
    }

    /// Mount or remount as needed so the boot directory offers `access`.
    pub fn ensure(&self, access: Access) -> Result<()> {
        match self.entry()? {
            None => {
                if let Some(device) = &self.device {
                    log::info!(
                        "mounting {} on {}",
                        device.display(),
                        self.mount_point.display()
                    );
                    fs::create_dir_all(&self.mount_point).with_context(|| {
                        format!("creating mount point '{}'", self.mount_point.display())
                    })?;
                    Cmd::new("mount")
                        .arg_path(device)
                        .arg_path(&self.mount_point)
                        .run()
                        .with_context(|| {
                            format!("mounting boot partition on '{}'", self.mount_point.display())
                        })?;
                } else {
                    log::debug!(
                        "{} is not a mount point; using it as a plain directory",
                        self.mount_point.display()
                    );
                }
            }
            Some(entry) if access == Access::ReadWrite && entry.is_read_only() => {
                log::info!("remounting {} read-write", self.mount_point.display());
                Cmd::new("mount")
                    .args(["-o", "remount,rw"])
                    .arg_path(&self.mount_point)
                    .run()
                    .with_context(|| {
                        format!(
                            "remounting boot partition '{}' read-write",
                            self.mount_point.display()
                        )
                    })?;
            }
            Some(_) => {}
        }

        if !self.mount_point.is_dir() {
            bail!(
                "boot partition directory '{}' does not exist",
                self.mount_point.display()
            );
        }
        if access == Access::ReadWrite && !is_writable(&self.mount_point) {
            bail!(
                "boot partition directory '{}' is not writable",
                self.mount_point.display()
            );
        }
        Ok(())
    }
}

/// Create and drop an unnamed file; this also catches rw mounts whose
/// ownership or mount options still refuse writes.
fn is_writable(path: &Path) -> bool {
    tempfile::tempfile_in(path).is_ok()
}
