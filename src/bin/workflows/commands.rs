use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use overlayctl::mount::{Access, BootMount};
use overlayctl::preflight::{check_host_tools, Needs};
use overlayctl::tools::{
    default_output, resolve_output_kind, Compiler, Dtc, FdtOverlay, OutputKind, Validator,
    Verdict,
};
use overlayctl::{
    ActivationPipeline, BootContext, DeviceTreeLocator, OverlayError, OverlayRegistry,
};

use super::parse::{Command, Invocation};

/// Token that makes `disable` clear the whole list.
const DISABLE_ALL: &str = "all";

pub(crate) fn dispatch(inv: &Invocation, ctx: &BootContext) -> Result<()> {
    let command = match inv.command {
        Command::Help => {
            println!("{}", crate::usage());
            return Ok(());
        }
        Command::Status => {
            BootMount::new(ctx).ensure(Access::ReadOnly)?;
            crate::workflows::status(ctx, inv.json)
        }
        Command::Build => {
            check_host_tools(ctx, Needs::Compiler)?;
            build(ctx, &inv.args, inv.output.as_deref())
        }
        Command::Validate => {
            check_host_tools(ctx, Needs::CompilerAndValidator)?;
            BootMount::new(ctx).ensure(Access::ReadOnly)?;
            validate(ctx, &inv.args, inv.base.as_deref())
        }
        Command::Enable => {
            BootMount::new(ctx).ensure(Access::ReadWrite)?;
            enable(ctx, &inv.args)
        }
        Command::Disable => {
            BootMount::new(ctx).ensure(Access::ReadWrite)?;
            disable(ctx, &inv.args)
        }
        Command::Activate => {
            check_host_tools(ctx, Needs::CompilerAndValidator)?;
            BootMount::new(ctx).ensure(Access::ReadWrite)?;
            activate(ctx, &inv.args, inv.base.as_deref())
        }
        Command::Print => {
            check_host_tools(ctx, Needs::Compiler)?;
            BootMount::new(ctx).ensure(Access::ReadOnly)?;
            print(ctx, inv.args.first().map(String::as_str))
        }
    };
    command.with_context(|| format!("overlayctl {} failed", command_name(inv)))
}

fn command_name(inv: &Invocation) -> String {
    std::iter::once(inv.command.name().to_string())
        .chain(inv.args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn build(ctx: &BootContext, sources: &[String], output: Option<&str>) -> Result<()> {
    let dtc = Dtc::new(ctx);
    for source in sources {
        let source = Path::new(source);
        let output = output.map(PathBuf::from);
        let kind = resolve_output_kind(source, output.as_deref(), None)?;
        let output = output.unwrap_or_else(|| default_output(source, kind));
        dtc.compile(source, &output, kind)?;
        println!(
            "[overlayctl:build] {} -> {}",
            source.display(),
            output.display()
        );
    }
    Ok(())
}

fn validate(ctx: &BootContext, files: &[String], base: Option<&str>) -> Result<()> {
    let base = DeviceTreeLocator::new(ctx).require_device_tree(base)?;
    let dtc = Dtc::new(ctx);
    let validator = FdtOverlay::new(ctx);

    for file in files {
        let file = Path::new(file);
        let overlay = if OutputKind::from_path(file) == Some(OutputKind::Overlay) {
            file.to_path_buf()
        } else {
            let out = default_output(file, OutputKind::Overlay);
            dtc.compile(file, &out, OutputKind::Overlay)?;
            out
        };

        match validator.validate(&base, &overlay)? {
            Verdict::Applies => println!(
                "[overlayctl:validate] {} applies to {}",
                overlay.display(),
                base.display()
            ),
            Verdict::Rejected { diagnostic } => {
                return Err(OverlayError::ValidationFailed {
                    overlay,
                    base,
                    diagnostic,
                }
                .into())
            }
        }
    }
    Ok(())
}

fn enable(ctx: &BootContext, artifacts: &[String]) -> Result<()> {
    let registry = OverlayRegistry::new(ctx);
    let lock = registry.lock()?;
    let artifacts: Vec<PathBuf> = artifacts.iter().map(PathBuf::from).collect();
    registry.enable_many(&lock, &artifacts)?;
    print_active(&registry, "enable")
}

fn disable(ctx: &BootContext, names: &[String]) -> Result<()> {
    let registry = OverlayRegistry::new(ctx);
    let lock = registry.lock()?;
    if names.iter().any(|n| n == DISABLE_ALL) {
        registry.disable_all(&lock)?;
    } else {
        registry.disable_many(&lock, names)?;
    }
    print_active(&registry, "disable")
}

fn activate(ctx: &BootContext, sources: &[String], base: Option<&str>) -> Result<()> {
    let registry = OverlayRegistry::new(ctx);
    let locator = DeviceTreeLocator::new(ctx);
    let dtc = Dtc::new(ctx);
    let validator = FdtOverlay::new(ctx);
    let sources: Vec<PathBuf> = sources.iter().map(PathBuf::from).collect();

    let lock = registry.lock()?;
    let report = ActivationPipeline::new(&dtc, &validator, &locator, &registry)
        .activate(&lock, &sources, base)?;
    for item in &report.items {
        println!(
            "[overlayctl:activate] {} -> {} ({})",
            item.source.display(),
            item.artifact.display(),
            item.state
        );
    }
    print_active(&registry, "activate")
}

fn print(ctx: &BootContext, file: Option<&str>) -> Result<()> {
    let binary = match file {
        Some(file) => PathBuf::from(file),
        None => DeviceTreeLocator::new(ctx).require_device_tree(None)?,
    };
    print!("{}", Dtc::new(ctx).dump(&binary)?);
    Ok(())
}

fn print_active(registry: &OverlayRegistry, tag: &str) -> Result<()> {
    let active = registry.list_active()?;
    if active.is_empty() {
        println!("[overlayctl:{tag}] no overlays enabled");
    } else {
        println!("[overlayctl:{tag}] enabled: {}", active.join(" "));
    }
    println!("[overlayctl:{tag}] changes take effect after reboot");
    Ok(())
}
