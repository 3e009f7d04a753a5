// job_expander.rs - Job expansion
// Purpose: Cross-product targets × selected tasks × commands (× wordlists ×
//          payloads) into the flat, ordered job list the scheduler consumes

use colored::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{Resources, ResourceMap, RunMode, TaskTable};
use crate::targets::target_output_dir;
use crate::templater::{Bindings, PAYLOAD_PLACEHOLDER, WORDLIST_PLACEHOLDER, tool_name};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpandError {
    #[error("unknown task: {0}")]
    UnknownTask(String),
}

/// What to do with a `{wordlist}`/`{payload}` command that has nothing bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingBindingPolicy {
    /// Drop the command at expansion time with a warning
    #[default]
    Skip,
    /// Emit the job unbound; the scheduler skips it when rendering fails
    Defer,
}

/// One unit of scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    /// Position in expansion order
    pub id: usize,
    pub target: String,
    pub task: String,
    pub run_mode: RunMode,
    pub template: String,
    /// Unique per (tool, task) within a target: `<command#>[_<wordlist>][_<payload>]`
    pub index: String,
    pub output_dir: PathBuf,
    pub wordlist: Option<PathBuf>,
    pub payload: Option<PathBuf>,
}

impl Job {
    pub fn bindings(&self) -> Bindings<'_> {
        Bindings {
            target: &self.target,
            output_dir: &self.output_dir,
            wordlist: self.wordlist.as_deref(),
            payload: self.payload.as_deref(),
        }
    }

    pub fn tool(&self) -> String {
        tool_name(&self.template).unwrap_or_default()
    }

    /// First token as written; may be a relative path like `tools/x.sh`
    pub fn program(&self) -> &str {
        self.template.split_whitespace().next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCommand {
    pub target: String,
    pub task: String,
    pub command: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ExpansionPlan {
    pub jobs: Vec<Job>,
    pub skipped: Vec<SkippedCommand>,
}

/// Expand in target-major, task-second, command-third order.
/// Every selected task must exist in `tasks`; nothing is produced otherwise.
pub fn expand(
    targets: &[String],
    selected_tasks: &[String],
    tasks: &TaskTable,
    resources: &Resources,
    policy: MissingBindingPolicy,
    output_root: &Path,
) -> Result<ExpansionPlan, ExpandError> {
    let resolved = selected_tasks
        .iter()
        .map(|name| tasks.get(name).ok_or_else(|| ExpandError::UnknownTask(name.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    let mut plan = ExpansionPlan::default();

    for target in targets {
        let output_dir = target_output_dir(output_root, target);

        for task in &resolved {
            for (cmd_idx, template) in task.commands.iter().enumerate() {
                let Some(tool) = tool_name(template) else {
                    plan.skipped.push(SkippedCommand {
                        target: target.clone(),
                        task: task.name.clone(),
                        command: template.clone(),
                        reason: "empty command template".to_string(),
                    });
                    continue;
                };

                let wordlists = match choices(template, WORDLIST_PLACEHOLDER, &resources.wordlists, &tool, policy) {
                    Some(c) => c,
                    None => {
                        skip_unbound(&mut plan, target, &task.name, template, "wordlist", &tool);
                        continue;
                    }
                };
                let payloads = match choices(template, PAYLOAD_PLACEHOLDER, &resources.payloads, &tool, policy) {
                    Some(c) => c,
                    None => {
                        skip_unbound(&mut plan, target, &task.name, template, "payload", &tool);
                        continue;
                    }
                };

                for (wordlist, wl_suffix) in &wordlists {
                    for (payload, pl_suffix) in &payloads {
                        let index = format!("{}{}{}", cmd_idx + 1, wl_suffix, pl_suffix);
                        plan.jobs.push(Job {
                            id: plan.jobs.len(),
                            target: target.clone(),
                            task: task.name.clone(),
                            run_mode: task.run_mode,
                            template: template.clone(),
                            index,
                            output_dir: output_dir.clone(),
                            wordlist: wordlist.clone(),
                            payload: payload.clone(),
                        });
                    }
                }
            }
        }
    }

    Ok(plan)
}

/// Candidate bindings for one placeholder, each paired with its index suffix.
/// `None` means the command must be skipped.
fn choices(
    template: &str,
    placeholder: &str,
    resources: &ResourceMap,
    tool: &str,
    policy: MissingBindingPolicy,
) -> Option<Vec<(Option<PathBuf>, String)>> {
    if !template.contains(placeholder) {
        return Some(vec![(None, String::new())]);
    }

    let paths = resources.lookup(tool);
    if paths.is_empty() {
        return match policy {
            MissingBindingPolicy::Skip => None,
            MissingBindingPolicy::Defer => Some(vec![(None, String::new())]),
        };
    }

    let suffixes = distinct_stems(paths);
    Some(
        paths
            .iter()
            .zip(suffixes)
            .map(|(p, stem)| (Some(p.clone()), format!("_{}", stem)))
            .collect(),
    )
}

/// File stems, disambiguated when two files share a base name
fn distinct_stems(paths: &[PathBuf]) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let stem = p
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("list")
                .replace(' ', "_");
            if seen.insert(stem.clone()) {
                stem
            } else {
                let alt = format!("{}{}", stem, i + 1);
                seen.insert(alt.clone());
                alt
            }
        })
        .collect()
}

fn skip_unbound(plan: &mut ExpansionPlan, target: &str, task: &str, template: &str, kind: &str, tool: &str) {
    eprintln!(
        "{}",
        format!("[!] No {} configured for {}; skipping: {}", kind, tool, template).yellow()
    );
    plan.skipped.push(SkippedCommand {
        target: target.to_string(),
        task: task.to_string(),
        command: template.to_string(),
        reason: format!("no {} configured for {}", kind, tool),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Task;
    use crate::templater::render;

    fn table() -> TaskTable {
        TaskTable::from_tasks(vec![
            Task::new(
                "Automated Subdomain Enumeration",
                vec![
                    "subfinder -d {target} -o {output}/subdomains/subfinder.txt".to_string(),
                    "amass enum -passive -d {target} -o {output}/subdomains/amass.txt".to_string(),
                ],
            ),
            Task::new(
                "Automated Port Scanning",
                vec!["nmap {target} -oN {output}/ports/nmap.txt".to_string()],
            )
            .with_run_mode(RunMode::Sequential),
            Task::new(
                "Automated Directory Brute Forcing",
                vec!["ffuf -u https://{target}/FUZZ -w {wordlist} -o {output}/ffuf.json".to_string()],
            ),
            Task::new(
                "Automated XSS Detection",
                vec!["dalfox url https://{target} --custom-payload {payload} -w {wordlist}".to_string()],
            ),
        ])
    }

    fn targets() -> Vec<String> {
        vec!["a.com".to_string(), "b.com".to_string()]
    }

    #[test]
    fn test_one_job_per_plain_command() {
        let selected = vec![
            "Automated Subdomain Enumeration".to_string(),
            "Automated Port Scanning".to_string(),
        ];
        let plan = expand(
            &targets(),
            &selected,
            &table(),
            &Resources::default(),
            MissingBindingPolicy::Skip,
            Path::new("/out"),
        )
        .unwrap();

        // 2 targets × (2 + 1) commands
        assert_eq!(plan.jobs.len(), 6);
        assert!(plan.skipped.is_empty());

        let order: Vec<(&str, &str, &str)> = plan
            .jobs
            .iter()
            .map(|j| (j.target.as_str(), j.task.as_str(), j.index.as_str()))
            .collect();
        assert_eq!(order[0], ("a.com", "Automated Subdomain Enumeration", "1"));
        assert_eq!(order[1], ("a.com", "Automated Subdomain Enumeration", "2"));
        assert_eq!(order[2], ("a.com", "Automated Port Scanning", "1"));
        assert_eq!(order[3].0, "b.com");

        assert_eq!(plan.jobs[2].run_mode, RunMode::Sequential);
        assert_eq!(plan.jobs[4].output_dir, PathBuf::from("/out/b.com"));
        assert!(plan.jobs.iter().enumerate().all(|(i, j)| j.id == i));
    }

    #[test]
    fn test_wordlist_fan_out() {
        let mut resources = Resources::default();
        resources.wordlists.insert(
            "ffuf",
            vec![
                PathBuf::from("/w/common.txt"),
                PathBuf::from("/w/big.txt"),
                PathBuf::from("/w/raft small.txt"),
            ],
        );
        let selected = vec!["Automated Directory Brute Forcing".to_string()];
        let plan = expand(
            &["a.com".to_string()],
            &selected,
            &table(),
            &resources,
            MissingBindingPolicy::Skip,
            Path::new("/out"),
        )
        .unwrap();

        assert_eq!(plan.jobs.len(), 3);
        let files: HashSet<PathBuf> = plan
            .jobs
            .iter()
            .map(|j| render(&j.template, &j.task, &j.bindings(), &j.index).unwrap().result_file)
            .collect();
        assert_eq!(files.len(), 3);
        assert!(files.contains(&PathBuf::from(
            "/out/a.com/ffuf_automated_directory_brute_forcing_1_common.json"
        )));
        assert!(files.contains(&PathBuf::from(
            "/out/a.com/ffuf_automated_directory_brute_forcing_1_raft_small.json"
        )));
    }

    #[test]
    fn test_duplicate_wordlist_names_stay_distinct() {
        let stems = distinct_stems(&[PathBuf::from("/a/common.txt"), PathBuf::from("/b/common.txt")]);
        assert_eq!(stems, vec!["common", "common2"]);
    }

    #[test]
    fn test_missing_wordlist_skip_policy() {
        let selected = vec!["Automated Directory Brute Forcing".to_string()];
        let plan = expand(
            &targets(),
            &selected,
            &table(),
            &Resources::default(),
            MissingBindingPolicy::Skip,
            Path::new("/out"),
        )
        .unwrap();

        assert!(plan.jobs.is_empty());
        assert_eq!(plan.skipped.len(), 2);
        assert!(plan.skipped[0].reason.contains("wordlist"));
    }

    #[test]
    fn test_missing_wordlist_defer_policy() {
        let selected = vec!["Automated Directory Brute Forcing".to_string()];
        let plan = expand(
            &["a.com".to_string()],
            &selected,
            &table(),
            &Resources::default(),
            MissingBindingPolicy::Defer,
            Path::new("/out"),
        )
        .unwrap();

        assert_eq!(plan.jobs.len(), 1);
        assert!(plan.jobs[0].wordlist.is_none());
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_wordlist_and_payload_cross_product() {
        let mut resources = Resources::default();
        resources
            .wordlists
            .insert("dalfox", vec![PathBuf::from("/w/params.txt"), PathBuf::from("/w/more.txt")]);
        resources.payloads.insert(
            "dalfox",
            vec![PathBuf::from("/p/xss.txt"), PathBuf::from("/p/polyglots.txt")],
        );
        let selected = vec!["Automated XSS Detection".to_string()];
        let plan = expand(
            &["a.com".to_string()],
            &selected,
            &table(),
            &resources,
            MissingBindingPolicy::Skip,
            Path::new("/out"),
        )
        .unwrap();

        assert_eq!(plan.jobs.len(), 4);
        let indexes: HashSet<&str> = plan.jobs.iter().map(|j| j.index.as_str()).collect();
        assert_eq!(indexes.len(), 4);
        assert!(indexes.contains("1_params_xss"));
    }

    #[test]
    fn test_output_dir_never_leaves_root() {
        let selected = vec!["Automated Port Scanning".to_string()];
        let plan = expand(
            &["10.0.0.0/24".to_string(), "../../escape.com".to_string(), "/etc/cron.d".to_string()],
            &selected,
            &table(),
            &Resources::default(),
            MissingBindingPolicy::Skip,
            Path::new("/root/out"),
        )
        .unwrap();

        let dirs: Vec<&Path> = plan.jobs.iter().map(|j| j.output_dir.as_path()).collect();
        assert_eq!(dirs[0], Path::new("/root/out/10.0.0.0_24"));
        for dir in dirs {
            assert_eq!(dir.parent(), Some(Path::new("/root/out")));
        }
    }

    #[test]
    fn test_unknown_task_fails_closed() {
        let selected = vec![
            "Automated Port Scanning".to_string(),
            "Automated Time Travel".to_string(),
        ];
        let err = expand(
            &targets(),
            &selected,
            &table(),
            &Resources::default(),
            MissingBindingPolicy::Skip,
            Path::new("/out"),
        )
        .unwrap_err();
        assert_eq!(err, ExpandError::UnknownTask("Automated Time Travel".to_string()));
    }
}
