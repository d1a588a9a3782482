//! Agent definitions and the file-backed loader.
//!
//! An agent is a persona (identity + menu + rules) that a remote LLM is
//! instructed to adopt.  Definitions live as YAML files in a configured
//! directory; the loader parses them at startup, caches the structured form
//! both in memory (atomic snapshot) and in KV under `agent:{id}` with a
//! one-hour TTL, and can poll for file changes to hot-reload definitions.
//! A parse failure during reload leaves the previously cached entry intact.
//!
//! # Definition file shape
//!
//! ```yaml
//! id: analyst
//! name: Mary
//! title: Business Analyst
//! icon: "📊"
//! persona:
//!   role: Strategic analyst specializing in market research
//!   identity: Data-driven, skeptical of unsupported claims
//!   communication_style: Concise, structured, cites evidence
//!   principles:
//!     - Ground every claim in a source
//! menu:
//!   - command: research
//!     description: Run a structured research workflow
//!     workflow: .bmad/workflows/research.md
//! activation_steps:
//!   - Greet the user in character
//! communication_language: English
//! ```

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::squadron::event::{EventHandler, SquadronEvent};
use crate::squadron::kv::KvStore;

/// TTL for the KV-cached structured form.
const CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum AgentParseError {
    #[error("cannot read agent file: {0}")]
    Io(String),
    #[error("invalid agent yaml: {0}")]
    Yaml(String),
    #[error("invalid agent definition: {0}")]
    Invalid(String),
}

/// Free-text persona block, embedded verbatim into the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Persona {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub communication_style: String,
    #[serde(default)]
    pub principles: Vec<String>,
}

/// One entry of the agent's command menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub command: String,
    pub description: String,
    #[serde(default)]
    pub workflow: Option<String>,
}

fn default_language() -> String {
    "English".to_string()
}

/// Immutable agent definition, identified by a short id (e.g. `"analyst"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
    #[serde(default)]
    pub activation_steps: Vec<String>,
    #[serde(default = "default_language")]
    pub communication_language: String,
}

impl AgentDefinition {
    /// Structural invariants: id, name, and title non-empty (icon may be
    /// empty); listed menu entries carry both a command and a description.
    pub fn validate(&self) -> Result<(), AgentParseError> {
        for (field, value) in [
            ("id", &self.id),
            ("name", &self.name),
            ("title", &self.title),
        ] {
            if value.trim().is_empty() {
                return Err(AgentParseError::Invalid(format!("{} must be non-empty", field)));
            }
        }
        for item in &self.menu {
            if item.command.trim().is_empty() || item.description.trim().is_empty() {
                return Err(AgentParseError::Invalid(format!(
                    "menu entries need command and description (agent '{}')",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Parse a YAML definition and check its invariants.
    pub fn from_yaml(text: &str) -> Result<Self, AgentParseError> {
        let definition: AgentDefinition =
            serde_yaml::from_str(text).map_err(|e| AgentParseError::Yaml(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }
}

/// File-backed loader with an atomically replaceable in-memory snapshot.
pub struct AgentLoader {
    dir: PathBuf,
    kv: Arc<dyn KvStore>,
    cache: RwLock<HashMap<String, Arc<AgentDefinition>>>,
    /// Modification times from the last scan, for the polling reloader.
    mtimes: Mutex<HashMap<PathBuf, SystemTime>>,
    events: Option<Arc<dyn EventHandler>>,
}

impl AgentLoader {
    pub fn new(dir: impl Into<PathBuf>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            dir: dir.into(),
            kv,
            cache: RwLock::new(HashMap::new()),
            mtimes: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    fn is_agent_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    }

    async fn parse_file(path: &Path) -> Result<AgentDefinition, AgentParseError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentParseError::Io(e.to_string()))?;
        AgentDefinition::from_yaml(&text)
    }

    /// Cache the definition in memory and in KV; replaces atomically.
    async fn install(&self, definition: AgentDefinition) {
        let id = definition.id.clone();
        if let Ok(json) = serde_json::to_string(&definition) {
            if let Err(e) = self
                .kv
                .setex(&format!("agent:{}", id), &json, CACHE_TTL)
                .await
            {
                warn!("failed to cache agent '{}' in kv: {}", id, e);
            }
        }
        self.cache.write().await.insert(id, Arc::new(definition));
    }

    /// Scan the directory and ingest every parseable definition file.
    ///
    /// Individual file failures are logged and skipped; a duplicate id keeps
    /// the first definition seen.  Returns the number of agents loaded.
    pub async fn load_all(&self) -> Result<usize, AgentParseError> {
        let mut reader = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| AgentParseError::Io(e.to_string()))?;

        let mut loaded = 0;
        let mut mtimes = self.mtimes.lock().await;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| AgentParseError::Io(e.to_string()))?
        {
            let path = entry.path();
            if !Self::is_agent_file(&path) {
                continue;
            }
            if let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) {
                mtimes.insert(path.clone(), modified);
            }
            match Self::parse_file(&path).await {
                Ok(definition) => {
                    if self.cache.read().await.contains_key(&definition.id) {
                        warn!(
                            "duplicate agent id '{}' in {}, keeping the first definition",
                            definition.id,
                            path.display()
                        );
                        continue;
                    }
                    info!("loaded agent '{}' from {}", definition.id, path.display());
                    self.install(definition).await;
                    loaded += 1;
                }
                Err(e) => error!("skipping {}: {}", path.display(), e),
            }
        }
        Ok(loaded)
    }

    /// Self-consistent snapshot of one definition.
    pub async fn get(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        if let Some(definition) = self.cache.read().await.get(id) {
            return Some(definition.clone());
        }
        // Cold cache: fall back to the KV copy (e.g. another process loaded it).
        let cached = self.kv.get(&format!("agent:{}", id)).await.ok().flatten()?;
        let definition: AgentDefinition = serde_json::from_str(&cached).ok()?;
        let definition = Arc::new(definition);
        self.cache
            .write()
            .await
            .insert(id.to_string(), definition.clone());
        Some(definition)
    }

    /// All loaded definitions, sorted by id.
    pub async fn list(&self) -> Vec<Arc<AgentDefinition>> {
        let cache = self.cache.read().await;
        let mut definitions: Vec<Arc<AgentDefinition>> = cache.values().cloned().collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    /// Loaded agent ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        self.list().await.iter().map(|d| d.id.clone()).collect()
    }

    /// Re-parse files whose modification time changed since the last scan.
    ///
    /// Best-effort: parse failures keep the previous cached entry and only
    /// log.  Returns the number of definitions replaced.
    pub async fn reload_changed(&self) -> usize {
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!("agent reload scan failed: {}", e);
                return 0;
            }
        };

        let mut reloaded = 0;
        let mut mtimes = self.mtimes.lock().await;
        while let Ok(Some(entry)) = reader.next_entry().await {
            let path = entry.path();
            if !Self::is_agent_file(&path) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if mtimes.get(&path) == Some(&modified) {
                continue;
            }
            mtimes.insert(path.clone(), modified);

            match Self::parse_file(&path).await {
                Ok(definition) => {
                    let id = definition.id.clone();
                    info!("reloaded agent '{}' from {}", id, path.display());
                    self.install(definition).await;
                    if let Some(handler) = &self.events {
                        handler
                            .on_event(&SquadronEvent::AgentReloaded { agent_id: id })
                            .await;
                    }
                    reloaded += 1;
                }
                Err(e) => error!(
                    "reload of {} failed, keeping previous definition: {}",
                    path.display(),
                    e
                ),
            }
        }
        reloaded
    }

    /// Spawn a best-effort polling watcher that calls
    /// [`reload_changed`](AgentLoader::reload_changed) on an interval.
    pub fn spawn_watcher(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let loader = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                loader.reload_changed().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::squadron::event::MemoryEventLog;
    use crate::squadron::kv::MemoryKvStore;
    use tempfile::TempDir;

    const ANALYST_YAML: &str = r#"
id: analyst
name: Mary
title: Business Analyst
icon: "A"
persona:
  role: Strategic analyst
  identity: Data-driven
  communication_style: Concise
  principles:
    - Cite evidence
menu:
  - command: research
    description: Run a research workflow
    workflow: .bmad/workflows/research.md
  - command: brief
    description: Produce a project brief
activation_steps:
  - Greet the user in character
communication_language: English
"#;

    async fn loader_with(files: &[(&str, &str)]) -> (TempDir, Arc<AgentLoader>) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            tokio::fs::write(dir.path().join(name), content).await.unwrap();
        }
        let loader = Arc::new(AgentLoader::new(
            dir.path(),
            Arc::new(MemoryKvStore::new()),
        ));
        (dir, loader)
    }

    #[tokio::test]
    async fn loads_and_indexes_agent_files() {
        let (_dir, loader) = loader_with(&[("analyst.yaml", ANALYST_YAML)]).await;
        assert_eq!(loader.load_all().await.unwrap(), 1);

        let agent = loader.get("analyst").await.unwrap();
        assert_eq!(agent.name, "Mary");
        assert_eq!(agent.menu.len(), 2);
        assert_eq!(agent.menu[0].command, "research");
        assert_eq!(loader.ids().await, vec!["analyst"]);
    }

    #[tokio::test]
    async fn skips_unparseable_files_without_failing() {
        let (_dir, loader) =
            loader_with(&[("analyst.yaml", ANALYST_YAML), ("broken.yaml", ": : :")]).await;
        assert_eq!(loader.load_all().await.unwrap(), 1);
        assert!(loader.get("analyst").await.is_some());
    }

    #[tokio::test]
    async fn rejects_definitions_missing_required_fields() {
        let err = AgentDefinition::from_yaml("id: x\nname: ''\ntitle: T").unwrap_err();
        assert!(matches!(err, AgentParseError::Invalid(_)));
    }

    #[tokio::test]
    async fn accepts_empty_menu_and_persona() {
        let definition =
            AgentDefinition::from_yaml("id: min\nname: Min\ntitle: Minimal Agent").unwrap();
        assert!(definition.menu.is_empty());
        assert_eq!(definition.persona, Persona::default());
        assert_eq!(definition.communication_language, "English");
    }

    #[tokio::test]
    async fn reload_replaces_changed_definitions_atomically() {
        let (dir, _) = loader_with(&[]).await;
        tokio::fs::write(dir.path().join("analyst.yaml"), ANALYST_YAML)
            .await
            .unwrap();
        let log = Arc::new(MemoryEventLog::new());
        let loader = Arc::new(
            AgentLoader::new(dir.path(), Arc::new(MemoryKvStore::new()))
                .with_event_handler(log.clone()),
        );
        loader.load_all().await.unwrap();

        // Rewrite with a new display name and a bumped mtime.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let updated = ANALYST_YAML.replace("name: Mary", "name: Marianne");
        tokio::fs::write(dir.path().join("analyst.yaml"), updated)
            .await
            .unwrap();
        filetime_touch(dir.path().join("analyst.yaml")).await;

        assert_eq!(loader.reload_changed().await, 1);
        assert_eq!(loader.get("analyst").await.unwrap().name, "Marianne");
        assert!(log
            .events()
            .await
            .contains(&SquadronEvent::AgentReloaded {
                agent_id: "analyst".to_string()
            }));
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_entry() {
        let (dir, _) = loader_with(&[]).await;
        tokio::fs::write(dir.path().join("analyst.yaml"), ANALYST_YAML)
            .await
            .unwrap();
        let loader = Arc::new(AgentLoader::new(dir.path(), Arc::new(MemoryKvStore::new())));
        loader.load_all().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::fs::write(dir.path().join("analyst.yaml"), "id: [broken")
            .await
            .unwrap();
        filetime_touch(dir.path().join("analyst.yaml")).await;

        assert_eq!(loader.reload_changed().await, 0);
        assert_eq!(loader.get("analyst").await.unwrap().name, "Mary");
    }

    /// Rewriting within the mtime granularity of some filesystems can leave
    /// the timestamp unchanged; force a distinct one.
    async fn filetime_touch(path: PathBuf) {
        let file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.set_modified(SystemTime::now()).ok();
    }
}
