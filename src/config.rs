// config.rs - Task, tool and resource tables
// Purpose: Load tasks.json / tools.json / wordlists.json / payloads.json once
//          and hand the engine a single normalized ReconConfig

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TASKS_FILE: &str = "tasks.json";
pub const TOOLS_FILE: &str = "tools.json";
pub const WORDLISTS_FILE: &str = "wordlists.json";
pub const PAYLOADS_FILE: &str = "payloads.json";
pub const PROFILES_FILE: &str = "profiles.json";

/// Directory (under $HOME) holding per-user wordlist/payload overrides
pub const USER_CONFIG_DIR: &str = ".cyfer_recon";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// TASKS
// ═══════════════════════════════════════════════════════════════════════════

/// How a task's jobs are dispatched relative to the caller's global choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Sequential,
    Concurrent,
    #[default]
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub name: String,
    pub commands: Vec<String>,
    pub run_mode: RunMode,
}

impl Task {
    pub fn new(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            commands,
            run_mode: RunMode::Both,
        }
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }
}

/// The two on-disk task shapes: a bare command list, or a record with a run mode
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskEntry {
    Commands(Vec<String>),
    Detailed {
        commands: Vec<String>,
        #[serde(default)]
        run_mode: RunMode,
    },
}

impl TaskEntry {
    fn into_task(self, name: String) -> Task {
        match self {
            TaskEntry::Commands(commands) => Task::new(name, commands),
            TaskEntry::Detailed { commands, run_mode } => {
                Task::new(name, commands).with_run_mode(run_mode)
            }
        }
    }
}

/// Ordered task table; order follows the source file
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    tasks: Vec<Task>,
}

impl TaskTable {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)?;
        let mut tasks = Vec::with_capacity(map.len());
        for (name, value) in map {
            let entry: TaskEntry = serde_json::from_value(value)?;
            tasks.push(entry.into_task(name));
        }
        Ok(Self { tasks })
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TOOLS
// ═══════════════════════════════════════════════════════════════════════════

/// How to decide whether a tool is installed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ToolCheck {
    /// Binary name looked up on the search path
    Binary(String),
    /// Static resource (wordlist, template pack) expected at a path
    File(PathBuf),
}

impl From<String> for ToolCheck {
    fn from(raw: String) -> Self {
        match raw.strip_prefix("file:") {
            Some(path) => ToolCheck::File(PathBuf::from(path)),
            None => ToolCheck::Binary(raw),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub check: ToolCheck,
    #[serde(default)]
    pub install: String,
    #[serde(default)]
    pub note: Option<String>,
}

pub type ToolTable = HashMap<String, ToolSpec>;

// ═══════════════════════════════════════════════════════════════════════════
// WORDLISTS / PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(untagged)]
enum ResourceEntry {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

/// tool name -> resource files; `shared` applies to tools without their own entry
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    per_tool: HashMap<String, Vec<PathBuf>>,
    shared: Vec<PathBuf>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, ResourceEntry> = serde_json::from_str(raw)?;
        let per_tool = entries
            .into_iter()
            .map(|(tool, entry)| {
                let paths = match entry {
                    ResourceEntry::One(p) => vec![p],
                    ResourceEntry::Many(ps) => ps,
                };
                (tool, paths)
            })
            .collect();
        Ok(Self {
            per_tool,
            shared: Vec::new(),
        })
    }

    pub fn insert(&mut self, tool: impl Into<String>, paths: Vec<PathBuf>) {
        self.per_tool.insert(tool.into(), paths);
    }

    pub fn with_shared(mut self, paths: Vec<PathBuf>) -> Self {
        self.shared = paths;
        self
    }

    /// Shared (CLI-selected) files win over per-tool defaults when present
    pub fn lookup(&self, tool: &str) -> &[PathBuf] {
        if !self.shared.is_empty() {
            return &self.shared;
        }
        self.per_tool.get(tool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Key-by-key override: entries in `other` replace ours
    pub fn merge(&mut self, other: ResourceMap) {
        self.per_tool.extend(other.per_tool);
        if !other.shared.is_empty() {
            self.shared = other.shared;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.per_tool.is_empty() && self.shared.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub wordlists: ResourceMap,
    pub payloads: ResourceMap,
}

// ═══════════════════════════════════════════════════════════════════════════
// PROFILES
// ═══════════════════════════════════════════════════════════════════════════

pub type Profiles = BTreeMap<String, Vec<String>>;

pub fn default_profiles() -> Profiles {
    let mut profiles = Profiles::new();
    profiles.insert(
        "Quick Recon".to_string(),
        vec![
            "Automated Subdomain Enumeration".to_string(),
            "Automated Port Scanning".to_string(),
            "Automated Content Discovery".to_string(),
        ],
    );
    profiles.insert(
        "Full Recon".to_string(),
        [
            "Automated Subdomain Enumeration",
            "Automated Port Scanning",
            "Automating Screenshot Capture",
            "Automated Directory Brute Forcing",
            "Automated JavaScript Analysis",
            "Automated Parameter Discovery",
            "Automated XSS Detection",
            "Automated SQL Injection Testing",
            "Automated SSRF Discovery",
            "Automated LFI and RFI Detection",
            "Automated Open Redirect Detection",
            "Automated Security Headers Check",
            "Automated API Recon",
            "Automated Content Discovery",
            "Automated S3 Bucket Enumeration",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    );
    profiles.insert(
        "API Recon".to_string(),
        vec![
            "Automated API Recon".to_string(),
            "Automated Content Discovery".to_string(),
        ],
    );
    profiles
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADED CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Everything the engine needs, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct ReconConfig {
    pub tasks: TaskTable,
    pub tools: ToolTable,
    pub resources: Resources,
    pub profiles: Profiles,
}

impl ReconConfig {
    /// Load from `config_dir`, then apply wordlist/payload overrides from `user_dir`
    pub fn load(config_dir: &Path, user_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let tasks_path = config_dir.join(TASKS_FILE);
        let tasks = TaskTable::from_json_str(&read(&tasks_path)?)
            .map_err(|source| ConfigError::Parse { path: tasks_path, source })?;

        let tools_path = config_dir.join(TOOLS_FILE);
        let tools: ToolTable = serde_json::from_str(&read(&tools_path)?)
            .map_err(|source| ConfigError::Parse { path: tools_path, source })?;

        let mut wordlists = load_resources(&config_dir.join(WORDLISTS_FILE))?;
        let mut payloads = load_resources(&config_dir.join(PAYLOADS_FILE))?;
        if let Some(user_dir) = user_dir {
            wordlists.merge(load_resources(&user_dir.join(WORDLISTS_FILE))?);
            payloads.merge(load_resources(&user_dir.join(PAYLOADS_FILE))?);
        }

        let mut profiles = default_profiles();
        let profiles_path = config_dir.join(PROFILES_FILE);
        if profiles_path.is_file() {
            let custom: Profiles = serde_json::from_str(&read(&profiles_path)?)
                .map_err(|source| ConfigError::Parse { path: profiles_path, source })?;
            profiles.extend(custom);
        }

        Ok(Self {
            tasks,
            tools,
            resources: Resources { wordlists, payloads },
            profiles,
        })
    }

    pub fn resolve_profile(&self, name: &str) -> Result<Vec<String>, ConfigError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }
}

/// `~/.cyfer_recon`, if a home directory can be determined
pub fn default_user_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(USER_CONFIG_DIR))
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Missing resource files are not an error: they simply contribute nothing
fn load_resources(path: &Path) -> Result<ResourceMap, ConfigError> {
    if !path.is_file() {
        return Ok(ResourceMap::new());
    }
    ResourceMap::from_json_str(&read(path)?).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
