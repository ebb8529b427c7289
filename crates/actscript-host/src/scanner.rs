//! Change detection for hot reloading
//!
//! The scanner compares modification times of the script files in a
//! directory with the previous scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};

use crate::loader::is_script_file;

/// Default time between scans
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Files that differ from the previous scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub changed: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Watches a script directory by polling
pub struct ScriptScanner {
    script_dir: PathBuf,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    known: HashMap<PathBuf, SystemTime>,
}

impl ScriptScanner {
    pub fn new(script_dir: PathBuf) -> Self {
        Self::with_interval(script_dir, DEFAULT_SCAN_INTERVAL)
    }

    /// Create a scanner; files already present are not reported as added
    pub fn with_interval(script_dir: PathBuf, scan_interval: Duration) -> Self {
        let known = snapshot(&script_dir);
        Self {
            script_dir,
            scan_interval,
            last_scan: None,
            known,
        }
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    /// Number of script files seen by the last scan
    pub fn tracked(&self) -> usize {
        self.known.len()
    }

    pub fn should_scan(&self, now: Instant) -> bool {
        match self.last_scan {
            Some(last) => now.saturating_duration_since(last) >= self.scan_interval,
            None => true,
        }
    }

    /// Scan the directory and remember what was found
    pub fn scan_changes(&mut self, now: Instant) -> ScanResult {
        self.last_scan = Some(now);
        let current = snapshot(&self.script_dir);
        let mut result = ScanResult::default();

        for (path, modified) in &current {
            match self.known.get(path) {
                Some(previous) if previous != modified => {
                    debug!(target: "scripting", "Script changed: {}", path.display());
                    result.changed.push(path.clone());
                }
                Some(_) => {}
                None => {
                    debug!(target: "scripting", "Script added: {}", path.display());
                    result.added.push(path.clone());
                }
            }
        }
        for path in self.known.keys() {
            if !current.contains_key(path) {
                debug!(target: "scripting", "Script removed: {}", path.display());
                result.removed.push(path.clone());
            }
        }

        result.changed.sort();
        result.added.sort();
        result.removed.sort();
        self.known = current;
        result
    }
}

/// Modification times of the script files in `dir`
fn snapshot(dir: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut files = HashMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(target: "scripting", "Cannot scan {}: {}", dir.display(), e);
            return files;
        }
    };

    for path in entries.flatten().map(|entry| entry.path()) {
        if !is_script_file(&path) {
            continue;
        }
        match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => {
                files.insert(path, modified);
            }
            Err(e) => {
                warn!(
                    target: "scripting",
                    "Failed to read modification time of {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_should_scan_timing() {
        let dir = TempDir::new().unwrap();
        let mut scanner = ScriptScanner::new(dir.path().to_path_buf());
        let t0 = Instant::now();

        assert!(scanner.should_scan(t0));
        scanner.scan_changes(t0);
        assert!(!scanner.should_scan(t0 + DEFAULT_SCAN_INTERVAL / 2));
        assert!(scanner.should_scan(t0 + DEFAULT_SCAN_INTERVAL));
    }

    #[test]
    fn test_existing_files_are_not_added() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "Stop\n").unwrap();

        let mut scanner = ScriptScanner::new(dir.path().to_path_buf());
        assert_eq!(scanner.tracked(), 1);
        assert!(!scanner.scan_changes(Instant::now()).has_changes());
    }

    #[test]
    fn test_detects_added_changed_removed() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.txt");
        let gone = dir.path().join("gone.txt");
        fs::write(&kept, "Stop\n").unwrap();
        fs::write(&gone, "Stop\n").unwrap();
        let mut scanner = ScriptScanner::new(dir.path().to_path_buf());

        let new = dir.path().join("new.txt");
        fs::write(&new, "Stop\n").unwrap();
        fs::remove_file(&gone).unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        File::options()
            .write(true)
            .open(&kept)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let result = scanner.scan_changes(Instant::now());
        assert_eq!(
            result,
            ScanResult {
                changed: vec![kept],
                added: vec![new],
                removed: vec![gone],
            }
        );
        assert!(!scanner.scan_changes(Instant::now()).has_changes());
    }

    #[test]
    fn test_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        let mut scanner = ScriptScanner::new(dir.path().to_path_buf());

        File::create(dir.path().join("readme.md")).unwrap();
        File::create(dir.path().join("script.wasm")).unwrap();

        assert!(!scanner.scan_changes(Instant::now()).has_changes());
        assert_eq!(scanner.tracked(), 0);
    }

    #[test]
    fn test_missing_directory() {
        let mut scanner = ScriptScanner::new(PathBuf::from("/tmp/actscript_missing_dir_54321"));
        assert!(!scanner.scan_changes(Instant::now()).has_changes());
    }
}
