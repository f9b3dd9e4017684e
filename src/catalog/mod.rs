//! Capability/policy catalog with file-system-based hot-reload.
//!
//! Agent descriptors are loaded from a directory, one file per agent. A
//! [`notify`] watcher (optional) reloads changed files automatically; callers
//! may also reload on demand. Profiles are handed out as `Arc`s, so a profile
//! obtained before a reload stays immutable for the caller.
//!
//! A descriptor that fails to load is logged, remembered in
//! [`Catalog::load_errors`], and treated as absent. It never aborts loading of
//! the remaining agents.

pub mod descriptor;
pub mod pattern;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

pub use descriptor::{
    ActionRule, AgentDependencies, AgentDescriptor, AgentProfile, CapabilityMap, CatalogError,
    ComplianceSettings, PolicyCard, RuleAction, SafetyConstraints, ToolCapability, ToolMetadata,
};
pub use pattern::{glob_match, PatternError, ToolCall, ToolPattern};

use descriptor::{is_descriptor_file, load_profile};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Registry of agent profiles keyed by agent id.
pub struct Catalog {
    /// Agent id → compiled profile.
    agents: RwLock<HashMap<String, Arc<AgentProfile>>>,
    /// Descriptor file → agent id, to handle deletions.
    files: RwLock<HashMap<PathBuf, String>>,
    /// Descriptor file → last load error.
    errors: RwLock<BTreeMap<PathBuf, String>>,
    /// Directory descriptors are loaded from, if any.
    dir: Option<PathBuf>,
    /// File watcher handle (kept alive to maintain notifications).
    _watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("dir", &self.dir)
            .field("agent_count", &self.count())
            .finish()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::empty()
    }
}

impl Catalog {
    /// An in-memory catalog with no directory behind it.
    pub fn empty() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            errors: RwLock::new(BTreeMap::new()),
            dir: None,
            _watcher: None,
        }
    }

    /// Build an in-memory catalog from descriptors.
    ///
    /// # Errors
    ///
    /// Returns the first descriptor that fails to compile.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = AgentDescriptor>,
    ) -> Result<Self, CatalogError> {
        let catalog = Self::empty();
        for descriptor in descriptors {
            catalog.insert(AgentProfile::from_descriptor(descriptor)?);
        }
        Ok(catalog)
    }

    /// Load every descriptor in `dir` without watching for changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn load_dir(dir: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let catalog = Arc::new(Self {
            dir: Some(dir.into()),
            ..Self::empty()
        });
        catalog.reload_all()?;
        Ok(catalog)
    }

    /// Load every descriptor in `dir` and reload files as they change.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or the watcher cannot
    /// be initialised.
    pub fn watch(dir: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let dir = dir.into();
        let (tx, rx) = std::sync::mpsc::channel();

        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                if let Ok(evt) = event {
                    for path in evt.paths {
                        if let Err(e) = tx.send(path) {
                            warn!(error = %e, "failed to send catalog watcher event");
                        }
                    }
                }
            })?;

        // Only watch if the directory exists.
        if dir.is_dir() {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        }

        let catalog = Arc::new(Self {
            dir: Some(dir.clone()),
            _watcher: Some(watcher),
            ..Self::empty()
        });
        catalog.reload_all()?;

        // The thread holds only a weak handle so dropping the catalog stops it.
        let weak = Arc::downgrade(&catalog);
        std::thread::spawn(move || {
            while let Ok(path) = rx.recv() {
                let Some(catalog) = weak.upgrade() else {
                    break;
                };
                if !is_descriptor_file(&path) {
                    continue;
                }
                debug!(path = %path.display(), "catalog file changed");
                catalog.reload_file(&path);
            }
        });

        info!(count = catalog.count(), dir = %dir.display(), "agent catalog initialised");
        Ok(catalog)
    }

    /// Insert or replace a profile. When the profile's file used to define a
    /// different agent that no other file defines, that agent is dropped.
    pub fn insert(&self, profile: AgentProfile) {
        let id = profile.agent_id.clone();
        let mut renamed = None;
        if let Some(path) = &profile.source {
            if let Ok(mut files) = self.files.write() {
                if let Some(old) = files.insert(path.clone(), id.clone()) {
                    if old != id && !files.values().any(|a| *a == old) {
                        renamed = Some(old);
                    }
                }
            }
        }
        match self.agents.write() {
            Ok(mut map) => {
                if let Some(old) = renamed {
                    info!(old = %old, new = %id, "descriptor now defines a different agent");
                    map.remove(&old);
                }
                map.insert(id, Arc::new(profile));
            }
            Err(e) => warn!(error = %e, "catalog lock poisoned in insert"),
        }
    }

    /// Remove an agent.
    pub fn remove(&self, agent_id: &str) -> Option<Arc<AgentProfile>> {
        match self.agents.write() {
            Ok(mut map) => map.remove(agent_id),
            Err(e) => {
                warn!(error = %e, "catalog lock poisoned in remove");
                None
            }
        }
    }

    /// Profile for `agent_id`, if loaded.
    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentProfile>> {
        match self.agents.read() {
            Ok(map) => map.get(agent_id).cloned(),
            Err(e) => {
                warn!(error = %e, "catalog lock poisoned in get");
                None
            }
        }
    }

    /// Whether `agent_id` is loaded.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.get(agent_id).is_some()
    }

    /// Sorted ids of all loaded agents.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.agents.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort();
        ids
    }

    /// Number of loaded agents.
    pub fn count(&self) -> usize {
        match self.agents.read() {
            Ok(map) => map.len(),
            Err(_) => 0,
        }
    }

    /// Descriptor files that failed to load, with their errors.
    pub fn load_errors(&self) -> BTreeMap<PathBuf, String> {
        match self.errors.read() {
            Ok(errors) => errors.clone(),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Directory backing this catalog.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Reload all descriptor files from the catalog directory.
    ///
    /// Agents inserted programmatically are dropped; the directory becomes the
    /// single source of truth.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn reload_all(&self) -> anyhow::Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "catalog directory does not exist");
            return Ok(());
        }

        let mut agents = HashMap::new();
        let mut files = HashMap::new();
        let mut errors = BTreeMap::new();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_descriptor_file(p))
            .collect();
        paths.sort();

        for path in paths {
            match load_profile(&path) {
                Ok(profile) => {
                    if agents.contains_key(&profile.agent_id) {
                        warn!(
                            agent = %profile.agent_id,
                            path = %path.display(),
                            "duplicate agent id, later file wins"
                        );
                    }
                    files.insert(path, profile.agent_id.clone());
                    agents.insert(profile.agent_id.clone(), Arc::new(profile));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid descriptor");
                    errors.insert(path, e.to_string());
                }
            }
        }

        let count = agents.len();
        if let (Ok(mut a), Ok(mut f), Ok(mut e)) =
            (self.agents.write(), self.files.write(), self.errors.write())
        {
            *a = agents;
            *f = files;
            *e = errors;
        } else {
            warn!("catalog lock poisoned in reload_all");
        }

        debug!(count, "catalog reloaded");
        Ok(())
    }

    /// Reload the descriptor for one agent, located as `<dir>/<name>.toml` or
    /// `<dir>/<name>.json`.
    ///
    /// # Errors
    ///
    /// Returns the load error when the file exists but is invalid.
    pub fn reload_agent(&self, name: &str) -> Result<(), CatalogError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        for ext in ["toml", "json"] {
            let path = dir.join(format!("{name}.{ext}"));
            if path.exists() {
                let profile = load_profile(&path)?;
                self.forget_error(&path);
                self.insert(profile);
                return Ok(());
            }
        }
        // Neither file exists: the agent was removed.
        self.remove(name);
        Ok(())
    }

    /// Apply a change to a single file: load it if present, otherwise drop the
    /// agent it used to define.
    fn reload_file(&self, path: &Path) {
        if path.exists() {
            match load_profile(path) {
                Ok(profile) => {
                    info!(agent = %profile.agent_id, "agent descriptor reloaded");
                    self.forget_error(path);
                    self.insert(profile);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to reload descriptor");
                    if let Ok(mut errors) = self.errors.write() {
                        errors.insert(path.to_path_buf(), e.to_string());
                    }
                }
            }
            return;
        }

        let removed = match self.files.write() {
            Ok(mut files) => files.remove(path),
            Err(_) => None,
        };
        self.forget_error(path);
        if let Some(agent) = removed {
            info!(agent = %agent, "agent descriptor removed");
            self.remove(&agent);
        }
    }

    fn forget_error(&self, path: &Path) {
        if let Ok(mut errors) = self.errors.write() {
            errors.remove(path);
        }
    }
}
