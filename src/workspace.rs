//! Workspace - Per-Request Transient Files
//!
//! A workspace is a uniquely named base path inside the work directory.
//! Every artifact of one render is `<base>.<ext>`; cleanup removes all of
//! them whether or not they were ever produced.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static CLEANUP_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_cleanup_call_count() -> u32 {
    CLEANUP_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_cleanup_call_count() {
    CLEANUP_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// Every extension the toolchain may leave behind.
pub const ARTIFACT_EXTENSIONS: &[&str] = &["tex", "log", "aux", "dvi", "svg", "png"];

const NAME_PREFIX: &str = "mathrender-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Source,
    Log,
    Aux,
    Intermediate,
    Vector,
    Raster,
}

impl Artifact {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Source => "tex",
            Self::Log => "log",
            Self::Aux => "aux",
            Self::Intermediate => "dvi",
            Self::Vector => "svg",
            Self::Raster => "png",
        }
    }
}

/// Exclusively owned by one render. Not `Clone`: cleanup consumes it.
#[derive(Debug)]
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    /// Reserves a fresh base name by creating the empty base file.
    pub fn create(work_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(work_dir)?;
        // Stages run with the workspace dir as cwd; a relative base would resolve twice.
        let work_dir = fs::canonicalize(work_dir)?;
        loop {
            let base = work_dir.join(format!("{NAME_PREFIX}{}", Uuid::new_v4().simple()));
            match OpenOptions::new().write(true).create_new(true).open(&base) {
                Ok(_) => {
                    debug!(
                        target = "mathrender::workspace",
                        op = "workspace::create",
                        base = %base.display(),
                        "Workspace allocated"
                    );
                    return Ok(Self { base });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn id(&self) -> &str {
        self.base
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    pub fn dir(&self) -> &Path {
        self.base.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        with_extension(&self.base, artifact.extension())
    }

    pub fn exists(&self, artifact: Artifact) -> bool {
        self.path(artifact).is_file()
    }

    pub fn write_source(&self, text: &str) -> io::Result<PathBuf> {
        let path = self.path(Artifact::Source);
        fs::write(&path, text)?;
        Ok(path)
    }

    /// Best-effort removal of the base file and every known artifact.
    pub fn cleanup(self) {
        #[cfg(feature = "test-hooks")]
        CLEANUP_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let _ = fs::remove_file(&self.base);
        for ext in ARTIFACT_EXTENSIONS {
            let _ = fs::remove_file(with_extension(&self.base, ext));
        }
        debug!(
            target = "mathrender::workspace",
            op = "workspace::cleanup",
            base = %self.base.display(),
            "Workspace removed"
        );
    }
}

// `Path::with_extension` would clobber dots in the base name.
fn with_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_reserves_unique_base() {
        let dir = TempDir::new().unwrap();
        let a = Workspace::create(dir.path()).unwrap();
        let b = Workspace::create(dir.path()).unwrap();
        assert_ne!(a.base(), b.base());
        assert!(a.base().is_file());
        assert!(a.id().starts_with(NAME_PREFIX));
        assert_eq!(a.dir(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_relative_work_dir_yields_absolute_base() {
        let relative = PathBuf::from(format!("mathrender-relative-{}", std::process::id()));
        let ws = Workspace::create(&relative).unwrap();
        assert!(ws.base().is_absolute());
        assert!(ws.path(Artifact::Source).is_absolute());
        assert_eq!(ws.dir(), relative.canonicalize().unwrap());

        ws.cleanup();
        fs::remove_dir(&relative).unwrap();
    }

    #[test]
    fn test_artifact_paths_append_extension() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        let dvi = ws.path(Artifact::Intermediate);
        assert_eq!(dvi.file_name().unwrap().to_str().unwrap(), format!("{}.dvi", ws.id()));
        ws.cleanup();
    }

    #[test]
    fn test_cleanup_removes_everything_and_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        ws.write_source("\\documentclass{article}").unwrap();
        fs::write(ws.path(Artifact::Intermediate), b"dvi").unwrap();
        fs::write(ws.path(Artifact::Vector), b"<svg/>").unwrap();

        ws.cleanup();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
