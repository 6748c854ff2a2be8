//! Error categories surfaced by overlay operations.
//!
//! Library functions return `anyhow::Result` and raise these values at the
//! failure site. Callers that need to tell categories apart use
//! `err.downcast_ref::<OverlayError>()`.

use std::path::PathBuf;

/// Failure categories the CLI reports as a single message.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// A source, artifact or device tree that must exist does not.
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    /// A bootloader variable required to locate files is missing.
    #[error("variable '{variable}' not set in {}", file.display())]
    MissingVariable { variable: String, file: PathBuf },

    /// More than one base device tree and no explicit choice.
    #[error(
        "multiple device trees in {}: {}; pick one explicitly with -c <name>",
        search_path.display(),
        candidates.join(", ")
    )]
    Ambiguous {
        search_path: PathBuf,
        candidates: Vec<String>,
    },

    /// An external tool exited unsuccessfully.
    #[error("{tool} failed ({status}):\n{diagnostic}")]
    ToolFailure {
        tool: String,
        status: String,
        diagnostic: String,
    },

    /// An external tool ran past its time bound and was killed.
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// The overlay does not apply on top of the base device tree.
    #[error(
        "overlay {} does not apply to {}:\n{diagnostic}",
        overlay.display(),
        base.display()
    )]
    ValidationFailed {
        overlay: PathBuf,
        base: PathBuf,
        diagnostic: String,
    },
}

impl OverlayError {
    /// True for failures coming from an external tool, including timeouts.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            OverlayError::ToolFailure { .. } | OverlayError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_message_lists_candidates() {
        let err = OverlayError::Ambiguous {
            search_path: PathBuf::from("/boot/dtb"),
            candidates: vec!["a.dtb".into(), "b.dtb".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a.dtb, b.dtb"));
        assert!(msg.contains("-c <name>"));
    }

    #[test]
    fn timeout_counts_as_tool_failure() {
        let err = OverlayError::Timeout {
            tool: "dtc".into(),
            seconds: 5,
        };
        assert!(err.is_tool_failure());
        let err = OverlayError::NotFound {
            what: "overlay",
            path: PathBuf::from("x.dtbo"),
        };
        assert!(!err.is_tool_failure());
    }

    #[test]
    fn context_keeps_category_downcastable() {
        use anyhow::Context;
        let res: anyhow::Result<()> = Err(OverlayError::NotFound {
            what: "source",
            path: PathBuf::from("a.dts"),
        })
        .context("building a.dts");
        let err = res.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OverlayError>(),
            Some(OverlayError::NotFound { .. })
        ));
    }
}
