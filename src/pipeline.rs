//! Compile → validate → enable, all or nothing.
//!
//! Every source is compiled and validated in input order. Only when the
//! whole batch validated are the artifacts handed to the registry, in one
//! persisted update. Any failure leaves the configuration file exactly as
//! it was before the run.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::OverlayError;
use crate::lock::ConfigLock;
use crate::locator::DeviceTreeLocator;
use crate::registry::OverlayRegistry;
use crate::tools::{default_output, Compiler, OutputKind, Validator, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Compiled,
    Validated,
    Enabled,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::Pending => "pending",
            ItemState::Compiled => "compiled",
            ItemState::Validated => "validated",
            ItemState::Enabled => "enabled",
            ItemState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationItem {
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub state: ItemState,
}

impl ActivationItem {
    fn new(source: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            artifact: default_output(source, OutputKind::Overlay),
            state: ItemState::Pending,
        }
    }

    /// Already-compiled overlays skip the compile step.
    fn is_prebuilt(&self) -> bool {
        OutputKind::from_path(&self.source) == Some(OutputKind::Overlay)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct ActivationReport {
    pub base: PathBuf,
    pub items: Vec<ActivationItem>,
}

pub struct ActivationPipeline<'a, C, V> {
    compiler: &'a C,
    validator: &'a V,
    locator: &'a DeviceTreeLocator,
    registry: &'a OverlayRegistry,
}

impl<'a, C: Compiler, V: Validator> ActivationPipeline<'a, C, V> {
    pub fn new(
        compiler: &'a C,
        validator: &'a V,
        locator: &'a DeviceTreeLocator,
        registry: &'a OverlayRegistry,
    ) -> Self {
        Self {
            compiler,
            validator,
            locator,
            registry,
        }
    }

    /// Activate `sources` against the active base tree, or `explicit_base`
    /// when given.
    pub fn activate(
        &self,
        lock: &ConfigLock,
        sources: &[PathBuf],
        explicit_base: Option<&str>,
    ) -> Result<ActivationReport> {
        let mut items: Vec<ActivationItem> =
            sources.iter().map(|s| ActivationItem::new(s)).collect();

        let base = self
            .locator
            .require_device_tree(explicit_base)
            .context("resolving the base device tree to validate against")?;
        log::info!("validating against {}", base.display());

        // Stops at the first item that fails; later items stay pending.
        let failure = items.iter_mut().enumerate().find_map(|(idx, item)| {
            self.compile_and_validate(item, &base).err().map(|err| {
                item.state = ItemState::Failed;
                (idx, err)
            })
        });
        if let Some((idx, err)) = failure {
            log_states(&items);
            return Err(err.context(format!(
                "activation aborted at {} ({} of {}); no overlay was enabled",
                items[idx].source.display(),
                idx + 1,
                items.len()
            )));
        }

        let artifacts: Vec<PathBuf> = items.iter().map(|i| i.artifact.clone()).collect();
        if let Err(err) = self.registry.enable_many(lock, &artifacts) {
            log_states(&items);
            return Err(err.context("enabling validated overlays"));
        }
        for item in items.iter_mut() {
            item.state = ItemState::Enabled;
        }

        Ok(ActivationReport { base, items })
    }

    fn compile_and_validate(&self, item: &mut ActivationItem, base: &Path) -> Result<()> {
        if item.is_prebuilt() {
            if !item.source.is_file() {
                return Err(OverlayError::NotFound {
                    what: "overlay artifact",
                    path: item.source.clone(),
                }
                .into());
            }
            item.artifact = item.source.clone();
        } else {
            self.compiler
                .compile(&item.source, &item.artifact, OutputKind::Overlay)?;
        }
        item.state = ItemState::Compiled;
        log::debug!("{} compiled", item.source.display());

        match self.validator.validate(base, &item.artifact)? {
            Verdict::Applies => {
                item.state = ItemState::Validated;
                log::debug!("{} validated", item.artifact.display());
                Ok(())
            }
            Verdict::Rejected { diagnostic } => Err(OverlayError::ValidationFailed {
                overlay: item.artifact.clone(),
                base: base.to_path_buf(),
                diagnostic,
            }
            .into()),
        }
    }
}

fn log_states(items: &[ActivationItem]) {
    for item in items {
        log::warn!("  {}: {}", item.source.display(), item.state);
    }
}
