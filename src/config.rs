//! Optional TOML configuration describing where the boot files and tools live.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "OVERLAYCTL_CONFIG";

/// Configuration file consulted when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/overlayctl.toml";

pub const DEFAULT_BOOT_MOUNT: &str = "/boot";
pub const DEFAULT_MOUNTS_TABLE: &str = "/proc/mounts";
pub const DEFAULT_OVERLAYS_FILE: &str = "overlays.txt";
pub const DEFAULT_OVERLAYS_DIR: &str = "overlays";
pub const DEFAULT_BOOTLOADER_ENV: &str = "loader/uEnv.txt";
pub const DEFAULT_MODEL_PATH: &str = "/proc/device-tree/model";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayCtlToml {
    pub boot_mount: Option<PathBuf>,
    pub boot_device: Option<PathBuf>,
    pub mounts_table: Option<PathBuf>,
    pub overlays_file: Option<PathBuf>,
    pub overlays_dir: Option<PathBuf>,
    pub bootloader_env: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub dtc: Option<String>,
    pub fdtoverlay: Option<String>,
    pub include_dirs: Option<Vec<PathBuf>>,
    pub tool_timeout_secs: Option<u64>,
}

/// Load the configuration named by [`CONFIG_ENV`], or the default file.
///
/// A missing default file yields an empty configuration. A file named
/// explicitly through the environment must exist.
pub fn load_config() -> Result<OverlayCtlToml> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => load_config_from(Path::new(&path)),
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.is_file() {
                load_config_from(path)
            } else {
                Ok(OverlayCtlToml::default())
            }
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<OverlayCtlToml> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading overlayctl config '{}'", path.display()))?;
    parse_config(&text).with_context(|| format!("parsing overlayctl config '{}'", path.display()))
}

pub fn parse_config(text: &str) -> Result<OverlayCtlToml> {
    let parsed: OverlayCtlToml = toml::from_str(text)?;
    Ok(parsed)
}
