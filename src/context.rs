//! Immutable runtime context, built once at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{
    OverlayCtlToml, DEFAULT_BOOTLOADER_ENV, DEFAULT_BOOT_MOUNT, DEFAULT_MODEL_PATH,
    DEFAULT_MOUNTS_TABLE, DEFAULT_OVERLAYS_DIR, DEFAULT_OVERLAYS_FILE, DEFAULT_TOOL_TIMEOUT_SECS,
};

/// Where the boot files live and how external tools are invoked.
///
/// Every component receives this by reference; nothing here changes after
/// construction.
#[derive(Debug, Clone)]
pub struct BootContext {
    /// Mount point of the boot partition.
    pub boot_mount: PathBuf,
    /// Block device mounted on `boot_mount` when it is not mounted yet.
    pub boot_device: Option<PathBuf>,
    pub mounts_table: PathBuf,
    /// The `fdt_overlays=` configuration file.
    pub overlays_file: PathBuf,
    /// Directory enabled overlay binaries are copied into.
    pub overlays_dir: PathBuf,
    /// Bootloader-owned file carrying `fdt_path=`.
    pub bootloader_env: PathBuf,
    /// Board model string, if the running kernel exposes one.
    pub board: Option<String>,
    pub tools: ToolSettings,
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub dtc: String,
    pub fdtoverlay: String,
    pub include_dirs: Vec<PathBuf>,
    pub timeout: Duration,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            dtc: "dtc".to_string(),
            fdtoverlay: "fdtoverlay".to_string(),
            include_dirs: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }
}

impl BootContext {
    /// Build the context from a parsed configuration, filling in defaults.
    pub fn from_config(cfg: &OverlayCtlToml) -> Self {
        let boot_mount = cfg
            .boot_mount
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BOOT_MOUNT));
        let under_boot = |value: &Option<PathBuf>, default: &str| {
            boot_mount.join(value.as_deref().unwrap_or_else(|| Path::new(default)))
        };
        let overlays_file = under_boot(&cfg.overlays_file, DEFAULT_OVERLAYS_FILE);
        let overlays_dir = under_boot(&cfg.overlays_dir, DEFAULT_OVERLAYS_DIR);
        let bootloader_env = under_boot(&cfg.bootloader_env, DEFAULT_BOOTLOADER_ENV);

        let model_path = cfg
            .model_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));

        let defaults = ToolSettings::default();
        let tools = ToolSettings {
            dtc: cfg.dtc.clone().unwrap_or(defaults.dtc),
            fdtoverlay: cfg.fdtoverlay.clone().unwrap_or(defaults.fdtoverlay),
            include_dirs: cfg.include_dirs.clone().unwrap_or_default(),
            timeout: cfg
                .tool_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        };

        Self {
            boot_device: cfg.boot_device.clone(),
            mounts_table: cfg
                .mounts_table
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MOUNTS_TABLE)),
            overlays_file,
            overlays_dir,
            bootloader_env,
            board: read_board_model(&model_path),
            boot_mount,
            tools,
        }
    }

    /// Context rooted at `boot_mount` with default relative layout.
    pub fn with_boot_mount(boot_mount: &Path) -> Self {
        Self::from_config(&OverlayCtlToml {
            boot_mount: Some(boot_mount.to_path_buf()),
            model_path: Some(boot_mount.join(".no-model")),
            ..OverlayCtlToml::default()
        })
    }
}

/// The device-tree `model` property is NUL-terminated.
fn read_board_model(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let model = String::from_utf8_lossy(&bytes)
        .trim_end_matches('\0')
        .trim()
        .to_string();
    if model.is_empty() {
        None
    } else {
        Some(model)
    }
}
