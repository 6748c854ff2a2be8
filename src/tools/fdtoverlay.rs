//! `fdtoverlay`: applies an overlay to a base tree to prove it fits.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use super::{Validator, Verdict};
use crate::context::BootContext;
use crate::error::OverlayError;
use crate::process::Cmd;

#[derive(Debug, Clone)]
pub struct FdtOverlay {
    program: String,
    timeout: Duration,
}

impl FdtOverlay {
    pub fn new(ctx: &BootContext) -> Self {
        Self {
            program: ctx.tools.fdtoverlay.clone(),
            timeout: ctx.tools.timeout,
        }
    }
}

impl Validator for FdtOverlay {
    fn validate(&self, base: &Path, overlay: &Path) -> Result<Verdict> {
        for (what, path) in [("device tree", base), ("overlay artifact", overlay)] {
            if !path.is_file() {
                return Err(OverlayError::NotFound {
                    what,
                    path: path.to_path_buf(),
                }
                .into());
            }
        }

        // The merged tree is only a by-product; it is removed on drop.
        let scratch = tempfile::Builder::new()
            .prefix("overlayctl-merged-")
            .suffix(".dtb")
            .tempfile()
            .context("creating scratch file for fdtoverlay")?;

        let res = Cmd::new(&self.program)
            .arg("-i")
            .arg_path(base)
            .arg("-o")
            .arg_path(scratch.path())
            .arg_path(overlay)
            .timeout(self.timeout)
            .allow_fail()
            .run()
            .with_context(|| {
                format!(
                    "validating '{}' against '{}'",
                    overlay.display(),
                    base.display()
                )
            })?;

        if res.success() {
            Ok(Verdict::Applies)
        } else {
            Ok(Verdict::Rejected {
                diagnostic: res.diagnostic(),
            })
        }
    }
}
