use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use overlayctl::{BootContext, DeviceTreeLocator, DirectiveState, OverlayRegistry};

#[derive(Debug, Serialize)]
struct StatusReport {
    board: Option<String>,
    overlays_file: PathBuf,
    overlays_dir: PathBuf,
    search_path: Option<PathBuf>,
    device_tree: Option<PathBuf>,
    /// Set when the active device tree could not be resolved.
    device_tree_error: Option<String>,
    /// `None` when the file has no `fdt_overlays=` line.
    enabled: Option<Vec<String>>,
    available: Vec<String>,
}

/// Print what the bootloader will load. Everything that can be read is
/// printed; a device tree that cannot be resolved still fails the command.
pub(crate) fn status(ctx: &BootContext, json: bool) -> Result<()> {
    let registry = OverlayRegistry::new(ctx);
    let locator = DeviceTreeLocator::new(ctx);

    let search_path = locator.search_path();
    let device_tree = match &search_path {
        Ok(_) => locator.active_device_tree(None),
        Err(_) => Ok(None),
    };

    let enabled = match registry.directive_state()? {
        DirectiveState::Absent => None,
        DirectiveState::Present(names) => Some(names),
    };

    let report = StatusReport {
        board: ctx.board.clone(),
        overlays_file: registry.config_path().to_path_buf(),
        overlays_dir: registry.overlays_dir().to_path_buf(),
        search_path: search_path.as_ref().ok().cloned(),
        device_tree: device_tree.as_ref().ok().cloned().flatten(),
        device_tree_error: search_path
            .as_ref()
            .err()
            .or(device_tree.as_ref().err())
            .map(|err| format!("{err:#}")),
        enabled,
        available: registry.available()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    search_path?;
    device_tree?;
    Ok(())
}

fn print_report(report: &StatusReport) {
    let show = |path: &Option<PathBuf>, missing: &str| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| missing.to_string())
    };

    println!(
        "board:          {}",
        report.board.as_deref().unwrap_or("unknown")
    );
    println!("device trees:   {}", show(&report.search_path, "unknown"));
    println!("device tree:    {}", show(&report.device_tree, "none found"));
    println!("overlays file:  {}", report.overlays_file.display());
    match &report.enabled {
        None => println!("enabled:        (no fdt_overlays line)"),
        Some(names) if names.is_empty() => println!("enabled:        (none)"),
        Some(names) => {
            println!("enabled:");
            for name in names {
                println!("  {name}");
            }
        }
    }
    if report.available.is_empty() {
        println!("available:      (none in {})", report.overlays_dir.display());
    } else {
        println!("available:");
        for name in &report.available {
            println!("  {name}");
        }
    }
}
