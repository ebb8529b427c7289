//! Compiling a directory of script files
//!
//! Every `.txt` file is one unit named after its file stem. A file that fails
//! to read or compile is logged and reported; the rest still load.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use actscript_core::{Registry, Unit, compile};
use anyhow::Context as _;
use tracing::{debug, info, warn};

/// Extension of script files picked up by the loader and the scanner
pub const SCRIPT_EXTENSION: &str = "txt";

/// A file that could not be loaded
#[derive(Debug)]
pub struct LoadFailure {
    pub unit: String,
    pub path: PathBuf,
    pub error: anyhow::Error,
}

/// Outcome of loading a directory
#[derive(Debug, Default)]
pub struct LoadReport {
    pub units: Vec<Unit>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn script_count(&self) -> usize {
        self.units.iter().map(|u| u.scripts().len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Whether `path` looks like a script file
pub fn is_script_file(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(SCRIPT_EXTENSION)
}

/// Unit name for a script file
pub fn unit_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

/// Read and compile a single script file
pub fn load_file(registry: &Arc<Registry>, path: &Path) -> anyhow::Result<Unit> {
    let unit = unit_name(path)
        .with_context(|| format!("script file {} has no usable name", path.display()))?;
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let compiled = compile(registry, &unit, &source)
        .with_context(|| format!("failed to compile {}", path.display()))?;
    Ok(compiled)
}

/// Compile every script file in `dir`, in file name order
pub fn load_dir(registry: &Arc<Registry>, dir: &Path) -> LoadReport {
    let mut report = LoadReport::default();

    if !dir.exists() {
        info!(
            target: "scripting",
            "Script directory does not exist: {} (this is fine if no scripts are being used)",
            dir.display()
        );
        return report;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                target: "scripting",
                "Failed to read script directory {}: {}",
                dir.display(),
                e
            );
            return report;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_script_file(path))
        .collect();
    paths.sort();

    for path in paths {
        match load_file(registry, &path) {
            Ok(unit) => {
                debug!(
                    target: "scripting",
                    "Loaded {} ({} script(s))",
                    path.display(),
                    unit.scripts().len()
                );
                report.units.push(unit);
            }
            Err(error) => {
                warn!(target: "scripting", "Skipping {}: {:#}", path.display(), error);
                report.failures.push(LoadFailure {
                    unit: unit_name(&path).unwrap_or_default(),
                    path,
                    error,
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use actscript_core::CompileError;
    use tempfile::TempDir;

    fn registry() -> Arc<Registry> {
        Arc::new(actscript_core::builtin_registry().unwrap())
    }

    #[test]
    fn test_loads_only_script_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "Set 1\n").unwrap();
        fs::write(dir.path().join("b.txt"), ";Start\nSet 2\n;Stop\nStop\n").unwrap();
        fs::write(dir.path().join("notes.md"), "NotAnAction\n").unwrap();

        let report = load_dir(&registry(), dir.path());
        assert!(report.is_clean());
        let names: Vec<&str> = report.units.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(report.script_count(), 3);
    }

    #[test]
    fn test_bad_file_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("good.txt"), "Set 1\n").unwrap();
        fs::write(dir.path().join("bad.txt"), "Set 1\nTeleport home\n").unwrap();

        let report = load_dir(&registry(), dir.path());
        assert_eq!(report.units.len(), 1);
        assert_eq!(report.units[0].name(), "good");

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.unit, "bad");
        assert_eq!(
            failure.error.downcast_ref::<CompileError>().map(|e| e.line()),
            Some(2)
        );
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let report = load_dir(&registry(), Path::new("/tmp/actscript_missing_dir_12345"));
        assert!(report.units.is_empty());
        assert!(report.is_clean());
    }
}
