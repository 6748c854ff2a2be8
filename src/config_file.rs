//! Line-preserving reader/writer for the boot overlay configuration file.
//!
//! The file is a list of opaque lines plus at most one `fdt_overlays=`
//! directive. Opaque lines are written back byte for byte, in their original
//! order. The directive is parsed into a list of overlay file names and
//! re-rendered on save with single-space separators.
//!
//! Later `fdt_overlays=` lines are kept verbatim while the directive is left
//! alone, but the bootloader honours the last assignment, so any change to
//! the directive removes them.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Prefix that marks the active-overlays directive.
pub const OVERLAYS_DIRECTIVE: &str = "fdt_overlays=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Any line the store does not interpret, kept verbatim.
    Opaque(String),
    /// The active-overlays directive.
    Overlays(Vec<String>),
    /// A repeated `fdt_overlays=` line after the directive, kept verbatim.
    Shadowed(String),
}

/// In-memory view of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    lines: Vec<Line>,
    /// Directive line was CRLF-terminated.
    directive_cr: bool,
    trailing_newline: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            directive_cr: false,
            trailing_newline: true,
        }
    }
}

impl OverlayConfig {
    pub fn parse(text: &str) -> Self {
        if text.is_empty() {
            return Self::default();
        }

        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);

        let mut lines = Vec::new();
        let mut directive_cr = false;
        let mut seen_directive = false;
        for raw in body.split('\n') {
            let (content, cr) = match raw.strip_suffix('\r') {
                Some(stripped) => (stripped, true),
                None => (raw, false),
            };
            match content.strip_prefix(OVERLAYS_DIRECTIVE) {
                Some(value) if !seen_directive => {
                    seen_directive = true;
                    directive_cr = cr;
                    lines.push(Line::Overlays(split_overlays(value)));
                }
                Some(_) => {
                    log::warn!(
                        "repeated '{}' line; only the first one is managed and the rest \
                         are dropped on the next change",
                        OVERLAYS_DIRECTIVE
                    );
                    lines.push(Line::Shadowed(raw.to_string()));
                }
                None => lines.push(Line::Opaque(raw.to_string())),
            }
        }

        Self {
            lines,
            directive_cr,
            trailing_newline,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            match line {
                Line::Opaque(raw) | Line::Shadowed(raw) => out.push_str(raw),
                Line::Overlays(names) => {
                    out.push_str(OVERLAYS_DIRECTIVE);
                    out.push_str(&names.join(" "));
                    if self.directive_cr {
                        out.push('\r');
                    }
                }
            }
        }
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Every line except the directive, in original order.
    pub fn other_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Opaque(raw) | Line::Shadowed(raw) => Some(raw.as_str()),
                Line::Overlays(_) => None,
            })
            .collect()
    }

    /// Parsed directive, or `None` when the file has no directive at all.
    pub fn overlays(&self) -> Option<&[String]> {
        self.lines.iter().find_map(|line| match line {
            Line::Overlays(names) => Some(names.as_slice()),
            Line::Opaque(_) | Line::Shadowed(_) => None,
        })
    }

    /// Replace the directive in place, or append one if absent.
    pub fn set_overlays(&mut self, names: Vec<String>) {
        self.drop_shadowed();
        for line in self.lines.iter_mut() {
            if let Line::Overlays(existing) = line {
                *existing = names;
                return;
            }
        }
        self.lines.push(Line::Overlays(names));
    }

    /// Drop the directive and every repeat of it, leaving other lines
    /// untouched.
    pub fn clear_overlays(&mut self) {
        self.drop_shadowed();
        self.lines.retain(|line| !matches!(line, Line::Overlays(_)));
    }

    fn drop_shadowed(&mut self) {
        let before = self.lines.len();
        self.lines.retain(|line| !matches!(line, Line::Shadowed(_)));
        let dropped = before - self.lines.len();
        if dropped > 0 {
            log::warn!("removing {dropped} repeated '{OVERLAYS_DIRECTIVE}' line(s)");
        }
    }
}

/// Names in first-seen order; repeats are dropped.
fn split_overlays(value: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in value.split_whitespace() {
        if names.iter().any(|n| n == name) {
            log::warn!("'{name}' is listed more than once in '{OVERLAYS_DIRECTIVE}'");
            continue;
        }
        names.push(name.to_string());
    }
    names
}

/// Reads and atomically rewrites the configuration file at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigFileStore {
    path: PathBuf,
}

impl ConfigFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file. A missing file is an empty configuration.
    pub fn load(&self) -> Result<OverlayConfig> {
        if !self.path.exists() {
            return Ok(OverlayConfig::default());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading overlay config '{}'", self.path.display()))?;
        Ok(OverlayConfig::parse(&text))
    }

    /// Rewrite the whole file through a sibling temp file and a rename, so a
    /// concurrent reader sees either the old or the new content.
    pub fn save(&self, config: &OverlayConfig) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("overlays.txt");
        let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));

        let write_tmp = || -> Result<()> {
            let mut f = File::create(&tmp)
                .with_context(|| format!("creating temporary config '{}'", tmp.display()))?;
            f.write_all(config.render().as_bytes())
                .with_context(|| format!("writing temporary config '{}'", tmp.display()))?;
            f.sync_all()
                .with_context(|| format!("syncing temporary config '{}'", tmp.display()))?;
            Ok(())
        };
        if let Err(err) = write_tmp() {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err).with_context(|| {
                format!(
                    "replacing overlay config '{}' with '{}'",
                    self.path.display(),
                    tmp.display()
                )
            });
        }

        // Directory fsync is not supported everywhere (e.g. some FAT drivers).
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
        log::debug!("wrote {}", self.path.display());
        Ok(())
    }
}
