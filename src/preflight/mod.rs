//! Preflight checks for the device-tree toolchain.
//!
//! Validates that the host has the tools a command needs before it starts,
//! so a missing `fdtoverlay` is reported up front instead of halfway
//! through an activation.
//!
//! # Example
//!
//! ```rust
//! use overlayctl::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("dtc") {
//!     println!("device-tree-compiler not installed");
//! }
//!
//! let tools = &[("dtc", "device-tree-compiler"), ("fdtoverlay", "device-tree-compiler")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::context::BootContext;

/// Package that ships `dtc` and `fdtoverlay` on most distributions.
const DTC_PACKAGE: &str = "device-tree-compiler";

/// Check if a command exists on the host system.
///
/// Accepts bare names (searched in PATH) and explicit paths.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Which toolchain pieces a command uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Needs {
    /// Compiling or dumping only.
    Compiler,
    /// Compiling and validating.
    CompilerAndValidator,
}

/// Tools a command needs under `ctx`, as (command, package) pairs.
pub fn required_tools(ctx: &BootContext, needs: Needs) -> Vec<(String, &'static str)> {
    let mut tools = vec![(ctx.tools.dtc.clone(), DTC_PACKAGE)];
    if needs == Needs::CompilerAndValidator {
        tools.push((ctx.tools.fdtoverlay.clone(), DTC_PACKAGE));
    }
    if !ctx.tools.include_dirs.is_empty() {
        tools.push(("cpp".to_string(), "cpp"));
    }
    tools
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools<S: AsRef<str>>(tools: &[(S, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool.as_ref()) {
            missing.push((tool.as_ref(), *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check the tools a command needs under `ctx`.
pub fn check_host_tools(ctx: &BootContext, needs: Needs) -> Result<()> {
    check_required_tools(&required_tools(ctx, needs))
}
