//! Active overlay set, persisted through [`ConfigFileStore`].
//!
//! Overlays are identified by file name only. Enabling a name that is
//! already active and disabling one that is not are both successful no-ops.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config_file::ConfigFileStore;
use crate::context::BootContext;
use crate::error::OverlayError;
use crate::lock::ConfigLock;

/// Extension of compiled overlay binaries.
pub const OVERLAY_EXTENSION: &str = "dtbo";

/// Whether the config file carries a directive, and what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveState {
    /// No `fdt_overlays=` line at all.
    Absent,
    /// Directive present; possibly empty.
    Present(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct OverlayRegistry {
    store: ConfigFileStore,
    overlays_dir: PathBuf,
}

impl OverlayRegistry {
    pub fn new(ctx: &BootContext) -> Self {
        Self {
            store: ConfigFileStore::new(&ctx.overlays_file),
            overlays_dir: ctx.overlays_dir.clone(),
        }
    }

    pub fn overlays_dir(&self) -> &Path {
        &self.overlays_dir
    }

    pub fn config_path(&self) -> &Path {
        self.store.path()
    }

    /// Take the lock every mutating call needs.
    pub fn lock(&self) -> Result<ConfigLock> {
        ConfigLock::acquire(self.store.path())
    }

    /// Active overlay names in load order.
    pub fn list_active(&self) -> Result<Vec<String>> {
        let config = self.store.load()?;
        Ok(config.overlays().map(<[String]>::to_vec).unwrap_or_default())
    }

    /// Every configuration line other than the directive.
    pub fn list_other_lines(&self) -> Result<Vec<String>> {
        let config = self.store.load()?;
        Ok(config
            .other_lines()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    pub fn directive_state(&self) -> Result<DirectiveState> {
        let config = self.store.load()?;
        Ok(match config.overlays() {
            Some(names) => DirectiveState::Present(names.to_vec()),
            None => DirectiveState::Absent,
        })
    }

    /// Overlay binaries present in the boot partition, sorted by name.
    pub fn available(&self) -> Result<Vec<String>> {
        if !self.overlays_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.overlays_dir).with_context(|| {
            format!(
                "reading overlays directory '{}'",
                self.overlays_dir.display()
            )
        })? {
            let path = entry?.path();
            if !path.is_file() || !has_extension(&path, OVERLAY_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Copy one artifact into the boot partition and activate it.
    pub fn enable(&self, lock: &ConfigLock, artifact: &Path) -> Result<()> {
        self.enable_many(lock, &[artifact.to_path_buf()])
    }

    /// Copy every artifact, then persist the new list in one save.
    ///
    /// All paths are checked before anything is copied, and the config file
    /// is only written once every copy succeeded.
    pub fn enable_many(&self, _lock: &ConfigLock, artifacts: &[PathBuf]) -> Result<()> {
        let mut names = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if !artifact.is_file() {
                return Err(OverlayError::NotFound {
                    what: "overlay artifact",
                    path: artifact.clone(),
                }
                .into());
            }
            names.push(overlay_name(artifact)?);
        }

        fs::create_dir_all(&self.overlays_dir).with_context(|| {
            format!(
                "creating overlays directory '{}'",
                self.overlays_dir.display()
            )
        })?;
        let dests: Vec<PathBuf> = names.iter().map(|n| self.overlays_dir.join(n)).collect();
        install_artifacts(artifacts, &dests)?;

        let mut config = self.store.load()?;
        let mut active = config.overlays().map(<[String]>::to_vec).unwrap_or_default();
        let mut changed = false;
        for name in names {
            if active.contains(&name) {
                log::info!("{name} is already enabled");
                continue;
            }
            log::info!("enabling {name}");
            active.push(name);
            changed = true;
        }

        if changed {
            config.set_overlays(active);
            self.store.save(&config)?;
        }
        Ok(())
    }

    /// Remove `name` (a file name, or a path whose file name is used).
    pub fn disable(&self, lock: &ConfigLock, name: &str) -> Result<()> {
        self.disable_many(lock, &[name])
    }

    /// Remove every name in one load/save. Names that are not enabled are
    /// skipped; the file is left untouched when nothing changes.
    pub fn disable_many<S: AsRef<str>>(&self, _lock: &ConfigLock, names: &[S]) -> Result<()> {
        let mut config = self.store.load()?;
        let mut active = config.overlays().map(<[String]>::to_vec).unwrap_or_default();
        let mut changed = false;
        for name in names {
            let name = name.as_ref();
            let name = Path::new(name)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(name);
            if !active.iter().any(|n| n == name) {
                log::info!("{name} is not enabled");
                continue;
            }
            log::info!("disabling {name}");
            active.retain(|n| n != name);
            changed = true;
        }

        if changed {
            config.set_overlays(active);
            self.store.save(&config)?;
        }
        Ok(())
    }

    /// Remove the directive, keeping every other line.
    pub fn disable_all(&self, _lock: &ConfigLock) -> Result<()> {
        let mut config = self.store.load()?;
        if config.overlays().is_none() {
            log::info!("no overlays enabled");
            return Ok(());
        }
        log::info!("disabling all overlays");
        config.clear_overlays();
        self.store.save(&config)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// The name under which an artifact is activated.
pub fn overlay_name(artifact: &Path) -> Result<String> {
    let name = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("overlay path '{}' has no file name", artifact.display()))?;
    if name.chars().any(char::is_whitespace) {
        anyhow::bail!(
            "overlay name '{}' contains whitespace, which fdt_overlays= cannot express",
            name
        );
    }
    Ok(name.to_string())
}

/// Temp name an artifact is staged under before it replaces `dest`.
fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

/// Copy every artifact next to its destination first, then rename them all
/// into place. A failed copy leaves the installed binaries untouched.
fn install_artifacts(srcs: &[PathBuf], dests: &[PathBuf]) -> Result<()> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(srcs.len());
    for (src, dest) in srcs.iter().zip(dests) {
        if src == dest {
            continue;
        }
        let tmp = staging_path(dest);
        if let Err(err) = fs::copy(src, &tmp) {
            let _ = fs::remove_file(&tmp);
            for (tmp, _) in &staged {
                let _ = fs::remove_file(tmp);
            }
            return Err(err)
                .with_context(|| format!("copying '{}' to '{}'", src.display(), tmp.display()));
        }
        log::debug!("staged {} as {}", src.display(), tmp.display());
        staged.push((tmp, dest.as_path()));
    }

    let mut pending = staged.iter();
    while let Some((tmp, dest)) = pending.next() {
        if let Err(err) = fs::rename(tmp, dest) {
            let _ = fs::remove_file(tmp);
            for (tmp, _) in pending.by_ref() {
                let _ = fs::remove_file(tmp);
            }
            return Err(err).with_context(|| format!("installing '{}'", dest.display()));
        }
        log::debug!("installed {}", dest.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        build: PathBuf,
        ctx: BootContext,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let boot = tmp.path().join("boot");
        let build = tmp.path().join("build");
        fs::create_dir_all(&boot).unwrap();
        fs::create_dir_all(&build).unwrap();
        let ctx = BootContext::with_boot_mount(&boot);
        Fixture {
            _tmp: tmp,
            build,
            ctx,
        }
    }

    fn artifact(fx: &Fixture, name: &str) -> PathBuf {
        let path = fx.build.join(name);
        fs::write(&path, format!("blob:{name}")).unwrap();
        path
    }

    #[test]
    fn enable_copies_and_activates() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &a).unwrap();

        assert_eq!(reg.list_active().unwrap(), vec!["a.dtbo"]);
        assert_eq!(
            fs::read(fx.ctx.overlays_dir.join("a.dtbo")).unwrap(),
            b"blob:a.dtbo"
        );
        assert_eq!(reg.available().unwrap(), vec!["a.dtbo"]);
    }

    #[test]
    fn enable_twice_is_idempotent() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &a).unwrap();
        let once = reg.list_active().unwrap();
        reg.enable(&lock, &a).unwrap();
        assert_eq!(reg.list_active().unwrap(), once);
    }

    #[test]
    fn enable_missing_artifact_is_not_found() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let lock = reg.lock().unwrap();
        let err = reg
            .enable(&lock, &fx.build.join("missing.dtbo"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OverlayError>(),
            Some(OverlayError::NotFound { .. })
        ));
        assert!(!fx.ctx.overlays_file.exists());
    }

    #[test]
    fn enable_many_checks_everything_before_copying() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let lock = reg.lock().unwrap();
        let res = reg.enable_many(&lock, &[a, fx.build.join("missing.dtbo")]);
        assert!(res.is_err());
        assert!(!fx.ctx.overlays_dir.join("a.dtbo").exists());
        assert!(reg.list_active().unwrap().is_empty());
    }

    #[test]
    fn disable_absent_name_changes_nothing() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &a).unwrap();
        let before = fs::read_to_string(&fx.ctx.overlays_file).unwrap();
        reg.disable(&lock, "b.dtbo").unwrap();
        assert_eq!(fs::read_to_string(&fx.ctx.overlays_file).unwrap(), before);
        assert_eq!(reg.list_active().unwrap(), vec!["a.dtbo"]);
    }

    #[test]
    fn enable_enable_disable_leaves_the_other() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let b = artifact(&fx, "b.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &a).unwrap();
        reg.enable(&lock, &b).unwrap();
        reg.disable(&lock, "a.dtbo").unwrap();
        assert_eq!(reg.list_active().unwrap(), vec!["b.dtbo"]);
    }

    #[test]
    fn disable_accepts_a_path() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &a).unwrap();
        reg.disable(&lock, a.to_str().unwrap()).unwrap();
        assert!(reg.list_active().unwrap().is_empty());
    }

    #[test]
    fn disabling_last_overlay_writes_empty_directive() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &a).unwrap();
        reg.disable(&lock, "a.dtbo").unwrap();
        assert_eq!(
            reg.directive_state().unwrap(),
            DirectiveState::Present(Vec::new())
        );
        assert_eq!(
            fs::read_to_string(&fx.ctx.overlays_file).unwrap(),
            "fdt_overlays=\n"
        );
    }

    #[test]
    fn disable_all_drops_directive_and_keeps_other_lines() {
        let fx = fixture();
        fs::write(
            &fx.ctx.overlays_file,
            "# board tweaks\nfdt_overlays=a.dtbo b.dtbo\nbootdelay=1\n",
        )
        .unwrap();
        let reg = OverlayRegistry::new(&fx.ctx);
        let lock = reg.lock().unwrap();
        reg.disable_all(&lock).unwrap();

        assert!(reg.list_active().unwrap().is_empty());
        assert_eq!(reg.directive_state().unwrap(), DirectiveState::Absent);
        assert_eq!(
            reg.list_other_lines().unwrap(),
            vec!["# board tweaks", "bootdelay=1"]
        );
        let text = fs::read_to_string(&fx.ctx.overlays_file).unwrap();
        assert!(!text.contains("fdt_overlays="));
    }

    #[test]
    fn enable_preserves_unrelated_lines() {
        let fx = fixture();
        fs::write(&fx.ctx.overlays_file, "keep=me\nfdt_overlays=x.dtbo\n").unwrap();
        let reg = OverlayRegistry::new(&fx.ctx);
        let a = artifact(&fx, "a.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &a).unwrap();
        assert_eq!(
            fs::read_to_string(&fx.ctx.overlays_file).unwrap(),
            "keep=me\nfdt_overlays=x.dtbo a.dtbo\n"
        );
    }

    #[test]
    fn names_with_whitespace_are_rejected() {
        assert!(overlay_name(Path::new("/tmp/my overlay.dtbo")).is_err());
        assert_eq!(
            overlay_name(Path::new("/tmp/ok.dtbo")).unwrap(),
            "ok.dtbo"
        );
    }

    #[test]
    fn disable_all_removes_repeated_directives() {
        let fx = fixture();
        fs::write(
            &fx.ctx.overlays_file,
            "keep=1\nfdt_overlays=a.dtbo\nfdt_overlays=b.dtbo\n",
        )
        .unwrap();
        let reg = OverlayRegistry::new(&fx.ctx);
        let lock = reg.lock().unwrap();
        reg.disable_all(&lock).unwrap();

        assert!(reg.list_active().unwrap().is_empty());
        assert_eq!(reg.directive_state().unwrap(), DirectiveState::Absent);
        assert_eq!(fs::read_to_string(&fx.ctx.overlays_file).unwrap(), "keep=1\n");

        reg.disable_all(&lock).unwrap();
        assert_eq!(fs::read_to_string(&fx.ctx.overlays_file).unwrap(), "keep=1\n");
    }

    #[test]
    fn enable_drops_names_listed_twice() {
        let fx = fixture();
        fs::write(&fx.ctx.overlays_file, "fdt_overlays=a.dtbo a.dtbo\n").unwrap();
        let reg = OverlayRegistry::new(&fx.ctx);
        let b = artifact(&fx, "b.dtbo");
        let lock = reg.lock().unwrap();
        reg.enable(&lock, &b).unwrap();
        assert_eq!(
            fs::read_to_string(&fx.ctx.overlays_file).unwrap(),
            "fdt_overlays=a.dtbo b.dtbo\n"
        );
    }

    #[test]
    fn disable_many_saves_once() {
        let fx = fixture();
        fs::write(&fx.ctx.overlays_file, "fdt_overlays=a.dtbo b.dtbo c.dtbo\n").unwrap();
        let reg = OverlayRegistry::new(&fx.ctx);
        let lock = reg.lock().unwrap();
        reg.disable_many(&lock, &["a.dtbo", "missing.dtbo", "/tmp/c.dtbo"])
            .unwrap();
        assert_eq!(reg.list_active().unwrap(), vec!["b.dtbo"]);
    }

    #[test]
    fn disable_many_of_unknown_names_leaves_file_alone() {
        let fx = fixture();
        let text = "fdt_overlays=a.dtbo\nfdt_overlays=b.dtbo\n";
        fs::write(&fx.ctx.overlays_file, text).unwrap();
        let reg = OverlayRegistry::new(&fx.ctx);
        let lock = reg.lock().unwrap();
        reg.disable_many(&lock, &["x.dtbo", "y.dtbo"]).unwrap();
        assert_eq!(fs::read_to_string(&fx.ctx.overlays_file).unwrap(), text);
    }

    #[test]
    fn failed_copy_keeps_installed_binaries() {
        let fx = fixture();
        let reg = OverlayRegistry::new(&fx.ctx);
        let lock = reg.lock().unwrap();
        let a = artifact(&fx, "a.dtbo");
        reg.enable(&lock, &a).unwrap();

        fs::write(&a, "blob:a.dtbo v2").unwrap();
        // A directory on b's staging path makes its copy fail.
        let b = artifact(&fx, "b.dtbo");
        fs::create_dir_all(staging_path(&fx.ctx.overlays_dir.join("b.dtbo"))).unwrap();
        assert!(reg.enable_many(&lock, &[a, b]).is_err());

        assert_eq!(
            fs::read(fx.ctx.overlays_dir.join("a.dtbo")).unwrap(),
            b"blob:a.dtbo"
        );
        assert!(!staging_path(&fx.ctx.overlays_dir.join("a.dtbo")).exists());
        assert!(!fx.ctx.overlays_dir.join("b.dtbo").exists());
        assert_eq!(reg.list_active().unwrap(), vec!["a.dtbo"]);
    }
}
