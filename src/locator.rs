//! Resolves the base device tree the bootloader loads.
//!
//! The bootloader environment file names a directory through `fdt_path=`.
//! That directory, rooted under the boot mount, is searched for `.dtb`
//! files. Exactly one candidate is the active tree; more than one needs an
//! explicit choice.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::context::BootContext;
use crate::error::OverlayError;

/// Bootloader variable holding the device-tree directory.
pub const FDT_PATH_VARIABLE: &str = "fdt_path";

/// Extension of base device-tree binaries.
pub const DEVICE_TREE_EXTENSION: &str = "dtb";

#[derive(Debug, Clone)]
pub struct DeviceTreeLocator {
    boot_mount: PathBuf,
    bootloader_env: PathBuf,
}

impl DeviceTreeLocator {
    pub fn new(ctx: &BootContext) -> Self {
        Self {
            boot_mount: ctx.boot_mount.clone(),
            bootloader_env: ctx.bootloader_env.clone(),
        }
    }

    /// Directory holding the base device trees.
    pub fn search_path(&self) -> Result<PathBuf> {
        let text = fs::read_to_string(&self.bootloader_env).with_context(|| {
            format!(
                "reading bootloader environment '{}'",
                self.bootloader_env.display()
            )
        })?;
        let value = env_variable(&text, FDT_PATH_VARIABLE).ok_or_else(|| {
            OverlayError::MissingVariable {
                variable: FDT_PATH_VARIABLE.to_string(),
                file: self.bootloader_env.clone(),
            }
        })?;
        Ok(self.boot_mount.join(value.trim_start_matches('/')))
    }

    /// Path of the active base device tree.
    ///
    /// With `explicit`, the name is joined onto the search path without an
    /// existence check; the caller confirms the file exists before use.
    /// Without it, `Ok(None)` means no candidate was found.
    pub fn active_device_tree(&self, explicit: Option<&str>) -> Result<Option<PathBuf>> {
        let search_path = self.search_path()?;
        if let Some(name) = explicit {
            return Ok(Some(search_path.join(name)));
        }

        let candidates = device_tree_candidates(&search_path)?;
        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.clone())),
            _ => Err(OverlayError::Ambiguous {
                candidates: candidates
                    .iter()
                    .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                    .map(str::to_string)
                    .collect(),
                search_path,
            }
            .into()),
        }
    }

    /// Like [`Self::active_device_tree`], but the result must exist.
    pub fn require_device_tree(&self, explicit: Option<&str>) -> Result<PathBuf> {
        let path = match self.active_device_tree(explicit)? {
            Some(path) => path,
            None => {
                return Err(OverlayError::NotFound {
                    what: "active device tree",
                    path: self.search_path()?,
                }
                .into())
            }
        };
        if !path.is_file() {
            return Err(OverlayError::NotFound {
                what: "device tree",
                path,
            }
            .into());
        }
        Ok(path)
    }
}

/// First `name=value` assignment in a bootloader environment text.
fn env_variable<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        if key.trim() == name {
            let value = value.trim();
            (!value.is_empty()).then_some(value)
        } else {
            None
        }
    })
}

fn device_tree_candidates(search_path: &Path) -> Result<Vec<PathBuf>> {
    if !search_path.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(search_path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("listing '{}'", search_path.display()))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(DEVICE_TREE_EXTENSION)
        {
            out.push(path.to_path_buf());
        }
    }
    Ok(out)
}
