//! `dtc`: compiles sources and dumps binaries back to source form.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Compiler, OutputKind};
use crate::context::BootContext;
use crate::error::OverlayError;
use crate::process::Cmd;

/// Padding added to base trees so the bootloader has room to apply overlays.
const TREE_PADDING: &str = "4096";

#[derive(Debug, Clone)]
pub struct Dtc {
    program: String,
    include_dirs: Vec<PathBuf>,
    timeout: Duration,
}

impl Dtc {
    pub fn new(ctx: &BootContext) -> Self {
        Self {
            program: ctx.tools.dtc.clone(),
            include_dirs: ctx.tools.include_dirs.clone(),
            timeout: ctx.tools.timeout,
        }
    }

    /// Decompile a binary tree or overlay into readable source.
    pub fn dump(&self, binary: &Path) -> Result<String> {
        if !binary.is_file() {
            return Err(OverlayError::NotFound {
                what: "device tree binary",
                path: binary.to_path_buf(),
            }
            .into());
        }
        let res = Cmd::new(&self.program)
            .args(["-I", "dtb", "-O", "dts"])
            .arg_path(binary)
            .timeout(self.timeout)
            .run()
            .with_context(|| format!("dumping '{}'", binary.display()))?;
        Ok(res.stdout)
    }

    /// Run the C preprocessor so `#include` and macros resolve.
    fn preprocess(&self, source: &Path, output: &Path) -> Result<()> {
        let mut cmd = Cmd::new("cpp").args(["-nostdinc", "-undef", "-x", "assembler-with-cpp"]);
        for dir in &self.include_dirs {
            cmd = cmd.arg(format!("-I{}", dir.display()));
        }
        cmd.arg_path(source)
            .arg("-o")
            .arg_path(output)
            .timeout(self.timeout)
            .run()
            .with_context(|| format!("preprocessing '{}'", source.display()))?;
        Ok(())
    }
}

impl Compiler for Dtc {
    fn compile(&self, source: &Path, output: &Path, kind: OutputKind) -> Result<()> {
        if !source.is_file() {
            return Err(OverlayError::NotFound {
                what: "overlay source",
                path: source.to_path_buf(),
            }
            .into());
        }

        // Keeps the preprocessed file alive until dtc has read it.
        let preprocessed = if self.include_dirs.is_empty() {
            None
        } else {
            let tmp = tempfile::Builder::new()
                .prefix("overlayctl-")
                .suffix(".dts")
                .tempfile()
                .context("creating preprocessor output file")?;
            self.preprocess(source, tmp.path())?;
            Some(tmp)
        };
        let input = preprocessed
            .as_ref()
            .map(|tmp| tmp.path())
            .unwrap_or(source);

        let mut cmd = Cmd::new(&self.program).args(["-@", "-I", "dts", "-O", "dtb"]);
        if kind == OutputKind::Tree {
            cmd = cmd.args(["-p", TREE_PADDING]);
        }
        cmd.arg("-o")
            .arg_path(output)
            .arg_path(input)
            .timeout(self.timeout)
            .run()
            .with_context(|| format!("compiling '{}'", source.display()))?;

        log::debug!("compiled {} -> {}", source.display(), output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in `dtc` that records its arguments and writes the output.
    fn fake_dtc(dir: &Path, body: &str) -> String {
        let path = dir.join("dtc");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn dtc_with(program: String) -> Dtc {
        Dtc {
            program,
            include_dirs: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn compile_passes_output_and_source() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("args");
        let program = fake_dtc(
            tmp.path(),
            &format!(
                "echo \"$@\" > {}\nwhile [ \"$1\" != \"-o\" ]; do shift; done\necho blob > \"$2\"",
                log.display()
            ),
        );
        let src = tmp.path().join("a.dts");
        fs::write(&src, "/plugin/;").unwrap();
        let out = tmp.path().join("a.dtbo");

        dtc_with(program)
            .compile(&src, &out, OutputKind::Overlay)
            .unwrap();

        assert!(out.is_file());
        let args = fs::read_to_string(&log).unwrap();
        assert!(args.starts_with("-@ -I dts -O dtb -o"));
        assert!(!args.contains(" -p "));
    }

    #[test]
    fn tree_output_is_padded() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("args");
        let program = fake_dtc(tmp.path(), &format!("echo \"$@\" > {}", log.display()));
        let src = tmp.path().join("board.dts");
        fs::write(&src, "/ { };").unwrap();

        dtc_with(program)
            .compile(&src, &tmp.path().join("board.dtb"), OutputKind::Tree)
            .unwrap();
        assert!(fs::read_to_string(&log).unwrap().contains("-p 4096"));
    }

    #[test]
    fn compiler_error_is_tool_failure() {
        let tmp = TempDir::new().unwrap();
        let program = fake_dtc(tmp.path(), "echo 'Error: a.dts:3.1-2 syntax error' >&2; exit 1");
        let src = tmp.path().join("a.dts");
        fs::write(&src, "garbage").unwrap();

        let err = dtc_with(program)
            .compile(&src, &tmp.path().join("a.dtbo"), OutputKind::Overlay)
            .unwrap_err();
        match err.downcast_ref::<OverlayError>() {
            Some(OverlayError::ToolFailure { diagnostic, .. }) => {
                assert!(diagnostic.contains("syntax error"));
            }
            other => panic!("expected ToolFailure, got {other:?}"),
        }
    }

    #[test]
    fn missing_source_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = dtc_with("true".into())
            .compile(
                &tmp.path().join("nope.dts"),
                &tmp.path().join("nope.dtbo"),
                OutputKind::Overlay,
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OverlayError>(),
            Some(OverlayError::NotFound { .. })
        ));
    }

    #[test]
    fn dump_returns_stdout() {
        let tmp = TempDir::new().unwrap();
        let program = fake_dtc(tmp.path(), "echo '/dts-v1/;'");
        let bin = tmp.path().join("a.dtb");
        fs::write(&bin, b"\xd0\x0d\xfe\xed").unwrap();
        let text = dtc_with(program).dump(&bin).unwrap();
        assert_eq!(text.trim(), "/dts-v1/;");
    }
}
