//! Wrappers around the device-tree toolchain.
//!
//! The pipeline only sees the [`Compiler`] and [`Validator`] traits; the
//! real implementations shell out to `dtc` and `fdtoverlay` through
//! [`crate::process::Cmd`].

use anyhow::Result;
use std::path::{Path, PathBuf};

pub mod dtc;
pub mod fdtoverlay;

pub use dtc::Dtc;
pub use fdtoverlay::FdtOverlay;

/// Kind of binary a source compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Overlay blob (`.dtbo`), compiled with symbols.
    Overlay,
    /// Base device tree (`.dtb`).
    Tree,
}

impl OutputKind {
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Overlay => "dtbo",
            OutputKind::Tree => "dtb",
        }
    }

    /// Kind implied by an output file extension, if it names one.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("dtbo") => Some(OutputKind::Overlay),
            Some("dtb") => Some(OutputKind::Tree),
            _ => None,
        }
    }
}

/// Markers whose presence in a source suggests it describes an overlay.
pub const OVERLAY_MARKERS: &[&str] = &["fragment", "/plugin/"];

/// Heuristic: a source containing an overlay marker is an overlay.
///
/// Only consulted when neither the caller nor the output extension says
/// which kind to build.
pub fn looks_like_overlay(source_text: &str) -> bool {
    OVERLAY_MARKERS
        .iter()
        .any(|marker| source_text.contains(marker))
}

/// Turns a source description into a binary blob.
pub trait Compiler {
    fn compile(&self, source: &Path, output: &Path, kind: OutputKind) -> Result<()>;
}

/// Outcome of applying an overlay to a base tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Applies,
    Rejected { diagnostic: String },
}

impl Verdict {
    pub fn applies(&self) -> bool {
        matches!(self, Verdict::Applies)
    }
}

/// Checks that an overlay applies on top of a base tree.
///
/// `Err` is reserved for being unable to run the check at all; an overlay
/// that does not apply is `Ok(Verdict::Rejected)`.
pub trait Validator {
    fn validate(&self, base: &Path, overlay: &Path) -> Result<Verdict>;
}

/// Pick the output kind for `source`: explicit choice first, then the
/// output extension, then [`looks_like_overlay`].
pub fn resolve_output_kind(
    source: &Path,
    output: Option<&Path>,
    explicit: Option<OutputKind>,
) -> Result<OutputKind> {
    if let Some(kind) = explicit {
        return Ok(kind);
    }
    if let Some(kind) = output.and_then(OutputKind::from_path) {
        return Ok(kind);
    }
    let text = std::fs::read_to_string(source).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            anyhow::Error::from(crate::error::OverlayError::NotFound {
                what: "overlay source",
                path: source.to_path_buf(),
            })
        } else {
            anyhow::Error::from(err).context(format!("reading '{}'", source.display()))
        }
    })?;
    Ok(if looks_like_overlay(&text) {
        OutputKind::Overlay
    } else {
        OutputKind::Tree
    })
}

/// Default artifact path: the source with the kind's extension.
pub fn default_output(source: &Path, kind: OutputKind) -> PathBuf {
    source.with_extension(kind.extension())
}
