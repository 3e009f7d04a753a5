// tool_checker.rs - External tool availability
// Purpose: Decide which tools referenced by the selected tasks are absent,
//          and optionally run their registered install commands

use colored::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::{TaskTable, ToolCheck, ToolTable};
use crate::templater::pipeline_tools;

/// Project-local directory consulted for `file:` checks by base name
pub const LOCAL_WORDLIST_DIR: &str = "wordlists";

// ═══════════════════════════════════════════════════════════════════════════
// LOOKUP
// ═══════════════════════════════════════════════════════════════════════════

/// Filesystem/search-path queries, swappable in tests
pub trait PathLookup: Send + Sync {
    fn find_binary(&self, name: &str) -> Option<PathBuf>;
    fn file_exists(&self, path: &Path) -> bool;
}

/// `$PATH` first, then the usual install locations for Go/cargo/pip tools
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl PathLookup for SystemLookup {
    fn find_binary(&self, name: &str) -> Option<PathBuf> {
        if name.contains('/') {
            let path = PathBuf::from(name);
            return is_executable(&path).then_some(path);
        }
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
        common_tool_paths()
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Common paths where recon tools end up outside of `$PATH`
pub fn common_tool_paths() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    let gopath = std::env::var("GOPATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.join("go"));

    vec![
        gopath.join("bin"),
        home.join("go/bin"),
        PathBuf::from("/usr/local/go/bin"),
        home.join(".cargo/bin"),
        home.join(".local/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/snap/bin"),
        PathBuf::from("/opt/tools"),
    ]
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CHECKER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTool {
    pub install: String,
    pub note: Option<String>,
}

/// Single-tool predicate the scheduler consults before launching a process
pub trait ToolProbe: Send + Sync {
    fn is_available(&self, tool: &str) -> bool;
}

pub struct ToolChecker<L: PathLookup = SystemLookup> {
    tools: ToolTable,
    lookup: L,
    local_dir: PathBuf,
}

impl ToolChecker<SystemLookup> {
    pub fn system(tools: ToolTable) -> Self {
        Self::new(tools, SystemLookup)
    }
}

impl<L: PathLookup> ToolChecker<L> {
    pub fn new(tools: ToolTable, lookup: L) -> Self {
        Self {
            tools,
            lookup,
            local_dir: PathBuf::from(LOCAL_WORDLIST_DIR),
        }
    }

    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = dir.into();
        self
    }

    /// Registered tools referenced by the selected tasks, counting every pipeline stage
    pub fn required_tools(&self, selected_tasks: &[String], tasks: &TaskTable) -> BTreeSet<String> {
        selected_tasks
            .iter()
            .filter_map(|name| tasks.get(name))
            .flat_map(|task| task.commands.iter())
            .flat_map(|cmd| pipeline_tools(cmd))
            .filter(|tool| self.tools.contains_key(tool))
            .collect()
    }

    /// tool -> install hint for every registered, required tool that is absent.
    /// Tools with no registry entry are never reported.
    pub fn find_missing(&self, selected_tasks: &[String], tasks: &TaskTable) -> BTreeMap<String, MissingTool> {
        self.required_tools(selected_tasks, tasks)
            .into_iter()
            .filter_map(|tool| {
                let spec = &self.tools[&tool];
                if self.check_passes(&spec.check) {
                    None
                } else {
                    let missing = MissingTool {
                        install: spec.install.clone(),
                        note: spec.note.clone(),
                    };
                    Some((tool, missing))
                }
            })
            .collect()
    }

    fn check_passes(&self, check: &ToolCheck) -> bool {
        match check {
            ToolCheck::Binary(name) => self.lookup.find_binary(name).is_some(),
            ToolCheck::File(path) => {
                if self.lookup.file_exists(path) {
                    return true;
                }
                match path.file_name() {
                    Some(base) if base != path.as_os_str() => {
                        self.lookup.file_exists(&self.local_dir.join(base))
                    }
                    _ => false,
                }
            }
        }
    }
}

impl<L: PathLookup> ToolProbe for ToolChecker<L> {
    /// Registered tools use their descriptor; anything else must be a binary
    /// on the search path (or, for a token with `/`, an executable at that
    /// path). `file:` descriptors describe resources, not the executable, so
    /// the token itself is still looked up.
    fn is_available(&self, tool: &str) -> bool {
        match self.tools.get(tool) {
            Some(spec) if matches!(spec.check, ToolCheck::Binary(_)) => self.check_passes(&spec.check),
            _ => self.lookup.find_binary(tool).is_some(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INSTALLER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InstallStatus {
    Installed,
    /// Install command succeeded but the tool still fails its check
    NotFoundAfterInstall,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub tool: String,
    pub command: String,
    pub status: InstallStatus,
}

/// Run each registered install command; one failure never stops the rest
pub async fn install_missing<L: PathLookup>(
    checker: &ToolChecker<L>,
    missing: &BTreeMap<String, MissingTool>,
) -> Vec<InstallOutcome> {
    let mut outcomes = Vec::with_capacity(missing.len());

    for (tool, info) in missing {
        println!("{}", format!("📦 Installing {} with: {}", tool, info.install).cyan().bold());

        let status = if info.install.trim().is_empty() {
            InstallStatus::Failed("no install command registered".to_string())
        } else {
            match Command::new("sh").arg("-c").arg(&info.install).status().await {
                Ok(exit) if exit.success() => {
                    let present = checker
                        .tools
                        .get(tool)
                        .map(|spec| checker.check_passes(&spec.check))
                        .unwrap_or(false);
                    if present {
                        InstallStatus::Installed
                    } else {
                        InstallStatus::NotFoundAfterInstall
                    }
                }
                Ok(exit) => InstallStatus::Failed(format!("exited with {}", exit)),
                Err(e) => InstallStatus::Failed(e.to_string()),
            }
        };

        match &status {
            InstallStatus::Installed => {
                println!("{}", format!("   ✓ {} installed successfully", tool).green());
            }
            InstallStatus::NotFoundAfterInstall => {
                println!(
                    "{}",
                    format!("   ⚠️  {} - command succeeded but tool still not found", tool).yellow()
                );
            }
            InstallStatus::Failed(reason) => {
                println!("{}", format!("   ✗ Failed to install {}: {}", tool, reason).red());
            }
        }

        outcomes.push(InstallOutcome {
            tool: tool.clone(),
            command: info.install.clone(),
            status,
        });
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Task, ToolSpec};
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeLookup {
        binaries: HashSet<String>,
        files: HashSet<PathBuf>,
    }

    impl FakeLookup {
        fn with_binaries(names: &[&str]) -> Self {
            Self {
                binaries: names.iter().map(|s| s.to_string()).collect(),
                files: HashSet::new(),
            }
        }
    }

    impl PathLookup for FakeLookup {
        fn find_binary(&self, name: &str) -> Option<PathBuf> {
            self.binaries
                .contains(name)
                .then(|| PathBuf::from("/usr/bin").join(name))
        }

        fn file_exists(&self, path: &Path) -> bool {
            self.files.contains(path)
        }
    }

    fn spec(check: &str, install: &str) -> ToolSpec {
        ToolSpec {
            check: ToolCheck::from(check.to_string()),
            install: install.to_string(),
            note: None,
        }
    }

    fn subdomain_tasks() -> TaskTable {
        TaskTable::from_tasks(vec![Task::new(
            "Automated Subdomain Enumeration",
            vec![
                "subfinder -d {target} -o {output}/subdomains/subfinder.txt".to_string(),
                "amass enum -passive -d {target} -o {output}/subdomains/amass.txt".to_string(),
                "assetfinder --subs-only {target}".to_string(),
            ],
        )])
    }

    fn tool_table() -> ToolTable {
        let mut tools = ToolTable::new();
        tools.insert("subfinder".into(), spec("subfinder", "install subfinder"));
        tools.insert("amass".into(), spec("amass", "install amass"));
        tools
    }

    fn selected() -> Vec<String> {
        vec!["Automated Subdomain Enumeration".to_string()]
    }

    #[test]
    fn test_all_present() {
        let checker = ToolChecker::new(tool_table(), FakeLookup::with_binaries(&["subfinder", "amass"]));
        assert!(checker.find_missing(&selected(), &subdomain_tasks()).is_empty());
    }

    #[test]
    fn test_binary_not_on_path_is_missing() {
        let checker = ToolChecker::new(tool_table(), FakeLookup::with_binaries(&["subfinder"]));
        let missing = checker.find_missing(&selected(), &subdomain_tasks());

        assert_eq!(missing.len(), 1);
        assert_eq!(missing["amass"].install, "install amass");
        assert!(!missing.contains_key("subfinder"));
    }

    #[test]
    fn test_unregistered_tools_are_ignored() {
        // assetfinder is referenced but has no registry entry
        let checker = ToolChecker::new(tool_table(), FakeLookup::default());
        let missing = checker.find_missing(&selected(), &subdomain_tasks());
        assert!(!missing.contains_key("assetfinder"));
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn test_pipeline_stages_are_required() {
        let tasks = TaskTable::from_tasks(vec![Task::new(
            "Automated XSS Detection",
            vec!["gau {target} | kxss > {output}/xss/kxss.txt".to_string()],
        )]);
        let mut tools = ToolTable::new();
        tools.insert("gau".into(), spec("gau", "install gau"));
        tools.insert("kxss".into(), spec("kxss", "install kxss"));

        let checker = ToolChecker::new(tools, FakeLookup::with_binaries(&["gau"]));
        let missing = checker.find_missing(&["Automated XSS Detection".to_string()], &tasks);
        assert_eq!(missing.keys().collect::<Vec<_>>(), vec!["kxss"]);
    }

    #[test]
    fn test_unknown_selected_task_contributes_nothing() {
        let checker = ToolChecker::new(tool_table(), FakeLookup::default());
        let missing = checker.find_missing(&["Nope".to_string()], &subdomain_tasks());
        assert!(missing.is_empty());
    }

    #[test]
    fn test_file_check_with_local_fallback() {
        let tasks = TaskTable::from_tasks(vec![Task::new(
            "Automated Directory Brute Forcing",
            vec!["seclists-check {target}".to_string()],
        )]);
        let selected = vec!["Automated Directory Brute Forcing".to_string()];
        let mut tools = ToolTable::new();
        tools.insert(
            "seclists-check".into(),
            spec("file:/usr/share/wordlists/common.txt", "apt install seclists"),
        );

        let work = tempfile::tempdir().unwrap();
        let local = work.path().join("wordlists");

        // neither location exists
        let checker = ToolChecker::new(tools.clone(), SystemLookup).with_local_dir(&local);
        if !Path::new("/usr/share/wordlists/common.txt").exists() {
            assert!(checker.find_missing(&selected, &tasks).contains_key("seclists-check"));
        }

        // project-local copy keyed by base name
        std::fs::create_dir_all(&local).unwrap();
        std::fs::write(local.join("common.txt"), "admin\n").unwrap();
        let checker = ToolChecker::new(tools.clone(), SystemLookup).with_local_dir(&local);
        assert!(checker.find_missing(&selected, &tasks).is_empty());

        // declared absolute path
        let mut lookup = FakeLookup::default();
        lookup.files.insert(PathBuf::from("/usr/share/wordlists/common.txt"));
        let checker = ToolChecker::new(tools, lookup).with_local_dir(work.path().join("empty"));
        assert!(checker.find_missing(&selected, &tasks).is_empty());
    }

    #[test]
    fn test_is_available_single_tool() {
        let mut tools = tool_table();
        tools.insert("nuclei".into(), spec("nuclei-bin", "install nuclei"));
        let checker = ToolChecker::new(tools, FakeLookup::with_binaries(&["subfinder", "echo", "nuclei"]));

        assert!(checker.is_available("subfinder"));
        assert!(!checker.is_available("amass"));
        // unregistered: plain lookup of the token
        assert!(checker.is_available("echo"));
        assert!(!checker.is_available("ghost-tool"));
        // registered check name wins over the token
        assert!(!checker.is_available("nuclei"));
    }

    #[test]
    fn test_system_lookup_finds_shell() {
        assert!(SystemLookup.find_binary("sh").is_some());
        assert!(SystemLookup.find_binary("definitely-not-a-real-tool-xyz").is_none());
    }

    #[tokio::test]
    async fn test_install_missing_continues_past_failures() {
        let mut tools = ToolTable::new();
        tools.insert("good".into(), spec("good", "exit 0"));
        tools.insert("bad".into(), spec("bad", "exit 3"));
        tools.insert("ghost".into(), spec("ghost", "true"));
        let checker = ToolChecker::new(tools.clone(), FakeLookup::with_binaries(&["good"]));

        let missing: BTreeMap<String, MissingTool> = ["bad", "ghost", "good"]
            .iter()
            .map(|t| {
                (
                    t.to_string(),
                    MissingTool {
                        install: tools[*t].install.clone(),
                        note: None,
                    },
                )
            })
            .collect();

        let outcomes = install_missing(&checker, &missing).await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].status, InstallStatus::Failed(_)));
        assert_eq!(outcomes[1].status, InstallStatus::NotFoundAfterInstall);
        assert_eq!(outcomes[2].status, InstallStatus::Installed);
    }
}
