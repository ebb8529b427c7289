use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use actscript_core::{
    ActorId, CompileError, Execution, LoopEvent, LoopId, Registry, Scheduler, Script, Unit,
    compile, dispatch,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::loader::{self, LoadReport};
use crate::reload::ReloadGeneration;
use crate::scanner::ScriptScanner;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no script named '{0}' is loaded")]
    UnknownScript(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Owns the compiled script library and the loop scheduler
///
/// The host's update loop calls [`ScriptHost::tick`] regularly; scripts are
/// started with [`ScriptHost::run`].
pub struct ScriptHost {
    registry: Arc<Registry>,
    config: HostConfig,
    script_dir: PathBuf,
    /// Unit name -> scripts compiled from it
    units: BTreeMap<String, Vec<Script>>,
    scheduler: Scheduler,
    scanner: Option<ScriptScanner>,
    reload_rx: Option<watch::Receiver<ReloadGeneration>>,
    last_tick: Option<Instant>,
}

impl ScriptHost {
    pub fn new(registry: Arc<Registry>, config: HostConfig) -> Self {
        let script_dir = config.script_dir();
        Self {
            registry,
            config,
            script_dir,
            units: BTreeMap::new(),
            scheduler: Scheduler::new(),
            scanner: None,
            reload_rx: None,
            last_tick: None,
        }
    }

    /// Reload whenever `reload_rx` publishes a new generation
    pub fn with_reload_signal(mut self, reload_rx: watch::Receiver<ReloadGeneration>) -> Self {
        self.reload_rx = Some(reload_rx);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Load every unit in the script directory
    pub fn load_scripts(&mut self) -> LoadReport {
        if !self.config.enabled {
            debug!(target: "scripting", "Scripting disabled, not loading scripts");
            return LoadReport::default();
        }

        debug!(target: "scripting", "Loading scripts from {}", self.script_dir.display());
        let report = loader::load_dir(&self.registry, &self.script_dir);
        for unit in &report.units {
            self.insert(unit.clone());
        }

        if self.config.hot_reload {
            self.scanner = Some(ScriptScanner::with_interval(
                self.script_dir.clone(),
                self.config.hot_reload_interval(),
            ));
        }

        if !self.units.is_empty() {
            info!(target: "scripting", "Loaded {} script(s)", self.script_count());
        }
        report
    }

    /// Recompile the script directory
    ///
    /// Units that compile replace their previous version, units that fail
    /// keep it, and units whose file is gone are dropped. Running loops keep
    /// the scripts they started with.
    pub fn reload_scripts(&mut self) -> LoadReport {
        if !self.config.enabled {
            return LoadReport::default();
        }

        let old_count = self.script_count();
        debug!(target: "scripting", "Reloading scripts from {}", self.script_dir.display());
        let report = loader::load_dir(&self.registry, &self.script_dir);

        let present: BTreeSet<&str> = report
            .units
            .iter()
            .map(|u| u.name())
            .chain(report.failures.iter().map(|f| f.unit.as_str()))
            .collect();
        self.units.retain(|name, _| present.contains(name.as_str()));

        for unit in &report.units {
            self.insert(unit.clone());
        }
        for failure in &report.failures {
            if self.units.contains_key(&failure.unit) {
                warn!(
                    target: "scripting",
                    "Keeping previous version of {} after failed reload",
                    failure.unit
                );
            }
        }

        let new_count = self.script_count();
        if old_count > 0 && new_count == 0 {
            warn!(
                target: "scripting",
                "Script reload resulted in zero scripts (was {}). Check logs for loading errors.",
                old_count
            );
        } else {
            info!(target: "scripting", "Reloaded {} script(s)", new_count);
        }
        report
    }

    /// Add or replace a compiled unit
    pub fn insert(&mut self, unit: Unit) {
        let name = unit.name().to_string();
        debug!(target: "scripting", "Registering unit: {}", name);
        self.units.insert(name, unit.into_scripts());
    }

    /// Compile `source` as unit `name` and add it
    pub fn insert_source(&mut self, name: &str, source: &str) -> Result<(), HostError> {
        let unit = compile(&self.registry, name, source)?;
        self.insert(unit);
        Ok(())
    }

    pub fn script(&self, id: &str) -> Option<&Script> {
        self.units
            .values()
            .flatten()
            .find(|script| script.name() == id)
    }

    /// Names of all loaded scripts, sorted
    pub fn script_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.units.values().flatten().map(|s| s.name()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn script_count(&self) -> usize {
        self.units.values().map(Vec::len).sum()
    }

    /// Run a script for `actor`; a delayed loop is left with the scheduler
    ///
    /// `now` must come from the same clock later passed to [`Self::tick`].
    pub fn run(
        &mut self,
        id: &str,
        actor: Option<ActorId>,
        now: Instant,
    ) -> Result<Execution, HostError> {
        let script = self
            .script(id)
            .ok_or_else(|| HostError::UnknownScript(id.to_string()))?;
        let ctx = script.context(actor);
        Ok(dispatch::execute(ctx, &mut self.scheduler, now))
    }

    /// Advance scheduled loops and pick up reload requests
    pub fn tick(&mut self, now: Instant) -> Vec<(LoopId, LoopEvent)> {
        if let Some(last) = self.last_tick {
            if now.saturating_duration_since(last) < self.config.tick_interval() {
                return Vec::new();
            }
        }
        self.last_tick = Some(now);

        if self.reload_requested(now) {
            self.reload_scripts();
        }

        self.scheduler.tick(now)
    }

    pub fn cancel_loop(&mut self, id: LoopId) -> bool {
        self.scheduler.cancel(id)
    }

    /// Number of delayed loops still waiting to run
    pub fn pending_loops(&self) -> usize {
        self.scheduler.active_count()
    }

    fn reload_requested(&mut self, now: Instant) -> bool {
        let mut requested = false;

        if let Some(rx) = self.reload_rx.as_mut() {
            if rx.has_changed().unwrap_or(false) {
                let generation = *rx.borrow_and_update();
                info!(target: "scripting", "Reload requested (#{})", generation);
                requested = true;
            }
        }

        if let Some(scanner) = self.scanner.as_mut() {
            if scanner.should_scan(now) && scanner.scan_changes(now).has_changes() {
                info!(target: "scripting", "Script files changed, reloading");
                requested = true;
            }
        }

        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actscript_core::Outcome;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn host(dir: &TempDir, hot_reload: bool) -> ScriptHost {
        let config = HostConfig {
            script_dir: Some(dir.path().to_path_buf()),
            hot_reload,
            ..HostConfig::default()
        };
        ScriptHost::new(Arc::new(actscript_core::builtin_registry().unwrap()), config)
    }

    #[test]
    fn test_load_and_run() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("door.txt"), ";Open\nSet 1\n;Close\nStop\n").unwrap();

        let mut host = host(&dir, false);
        let report = host.load_scripts();
        assert!(report.is_clean());
        assert_eq!(host.script_ids(), vec!["door.Close", "door.Open"]);

        let execution = host.run("door.Open", Some(ActorId(1)), Instant::now()).unwrap();
        assert_eq!(execution.outcome, Outcome::Completed);
        let execution = host.run("door.Close", None, Instant::now()).unwrap();
        assert_eq!(execution.outcome, Outcome::Disposed);

        assert!(matches!(
            host.run("door", None, Instant::now()),
            Err(HostError::UnknownScript(id)) if id == "door"
        ));
    }

    #[test]
    fn test_disabled_host_loads_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "Stop\n").unwrap();

        let mut host = host(&dir, false);
        host.config.enabled = false;
        host.load_scripts();
        assert_eq!(host.script_count(), 0);
    }

    #[test]
    fn test_failed_reload_keeps_previous_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("greeter.txt");
        fs::write(&path, "Set hello\n").unwrap();
        fs::write(dir.path().join("other.txt"), "Stop\n").unwrap();

        let mut host = host(&dir, false);
        host.load_scripts();
        assert_eq!(host.script_count(), 2);

        fs::write(&path, "Set hello\nTeleport\n").unwrap();
        let report = host.reload_scripts();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(host.script("greeter").unwrap().action_ids(), vec!["Set"]);

        fs::remove_file(dir.path().join("other.txt")).unwrap();
        host.reload_scripts();
        assert_eq!(host.script_ids(), vec!["greeter"]);
    }

    #[test]
    fn test_insert_source() {
        let dir = TempDir::new().unwrap();
        let mut host = host(&dir, false);

        host.insert_source("inline", "RandomInt 1 3\n").unwrap();
        assert_eq!(host.script_ids(), vec!["inline"]);
        assert!(matches!(
            host.insert_source("broken", "RandomInt one 3\n"),
            Err(HostError::Compile(CompileError::InvalidLiteral { .. }))
        ));
        assert_eq!(host.script_count(), 1);
    }

    #[test]
    fn test_tick_runs_delayed_loops() {
        let dir = TempDir::new().unwrap();
        let mut host = host(&dir, false);
        host.insert_source("pulse", "Repeat 2 1 100\nSet 1\n").unwrap();

        let start = Instant::now();
        let execution = host.run("pulse", None, start).unwrap();
        assert_eq!(execution.outcome, Outcome::Suspended);
        let id = execution.scheduled.unwrap();
        assert_eq!(host.pending_loops(), 1);

        let t0 = start + Duration::from_secs(1);
        assert_eq!(host.tick(t0), vec![(id, LoopEvent::Ran)]);
        // Ticks closer together than the tick interval are skipped
        assert!(host.tick(t0 + Duration::from_millis(10)).is_empty());
        assert_eq!(
            host.tick(t0 + Duration::from_secs(1)),
            vec![(id, LoopEvent::Finished)]
        );
        assert_eq!(host.pending_loops(), 0);
    }

    #[test]
    fn test_loops_follow_the_callers_clock() {
        let dir = TempDir::new().unwrap();
        let mut host = host(&dir, false);
        host.insert_source("pulse", "Repeat 1 1 100\nSet 1\n").unwrap();

        // A simulated clock running well ahead of the system clock
        let start = Instant::now() + Duration::from_secs(3600);
        let id = host.run("pulse", None, start).unwrap().scheduled.unwrap();

        assert!(host.tick(start + Duration::from_millis(50)).is_empty());
        assert_eq!(host.pending_loops(), 1);
        assert_eq!(
            host.tick(start + Duration::from_millis(100)),
            vec![(id, LoopEvent::Finished)]
        );
    }

    #[test]
    fn test_tick_hot_reloads_changed_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("live.txt");
        fs::write(&path, "Set 1\n").unwrap();

        let mut host = host(&dir, true);
        host.load_scripts();

        fs::write(&path, "Set 1\nSet 2\n").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        host.tick(Instant::now());
        assert_eq!(host.script("live").unwrap().len(), 2);
    }

    #[test]
    fn test_tick_honours_reload_signal() {
        let dir = TempDir::new().unwrap();
        let (reload_tx, reload_rx) = watch::channel(0);
        let mut host = host(&dir, false).with_reload_signal(reload_rx);
        host.load_scripts();
        assert_eq!(host.script_count(), 0);

        fs::write(dir.path().join("late.txt"), "Stop\n").unwrap();
        let t0 = Instant::now();
        host.tick(t0);
        assert_eq!(host.script_count(), 0);

        reload_tx.send_modify(|generation| *generation += 1);
        host.tick(t0 + Duration::from_secs(1));
        assert_eq!(host.script_ids(), vec!["late"]);
    }
}
