// targets.rs - Target collection and output layout
// Parses target lists (file or delimited string), drops malformed entries
// and prepares the per-target output tree before any job runs

use anyhow::{Context, Result};
use colored::*;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::config::Task;

/// Subfolders every target directory gets regardless of the selected tasks
pub const BASE_SUBFOLDERS: &[&str] = &["subdomains", "ports", "screenshots", "logs"];

lazy_static! {
    static ref OUTPUT_SUBFOLDER: Regex = Regex::new(r"\{output\}/([\w\-]+)/").unwrap();
    /// Hostname, IPv4/IPv6 address, optionally with a CIDR suffix
    static ref TARGET_CHARSET: Regex = Regex::new(r"^[A-Za-z0-9:][A-Za-z0-9._:-]*(/\d{1,3})?$").unwrap();
}

/// A target is usable if it looks like a hostname or an IP/CIDR.
/// Targets are pasted into `sh -c` lines and joined onto the output root,
/// so shell metacharacters, spaces and `..` segments are rejected.
pub fn is_valid_target(target: &str) -> bool {
    TARGET_CHARSET.is_match(target)
        && !target.contains("..")
        && (target.contains('.') || target.contains(':') || target.chars().all(|c| c.is_ascii_digit()))
}

/// Directory name for a target: `10.0.0.0/24` -> `10.0.0.0_24`
pub fn target_dir_name(target: &str) -> String {
    let name = target.replace(['/', '\\'], "_");
    match name.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => name,
    }
}

/// `<output_root>/<target_dir_name>`, always a direct child of the root
pub fn target_output_dir(output_root: &Path, target: &str) -> PathBuf {
    output_root.join(target_dir_name(target))
}

/// Split a comma/space separated target string
pub fn parse_target_list(raw: &str) -> Vec<String> {
    raw.replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// One target per line; blank lines and `#` comments are skipped
pub fn load_targets(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).context(format!("Failed to open targets file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut targets = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.context(format!("Failed to read line {} of {}", line_num + 1, path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        targets.push(trimmed.to_string());
    }
    Ok(targets)
}

pub fn save_targets(targets: &[String], path: &Path) -> Result<()> {
    let mut file = File::create(path).context(format!("Failed to write {}", path.display()))?;
    for target in targets {
        writeln!(file, "{}", target)?;
    }
    Ok(())
}

/// Resolve `--targets`: an existing file path is read, anything else is split
pub fn collect_targets(raw: &str) -> Result<Vec<String>> {
    let path = Path::new(raw);
    if path.is_file() {
        load_targets(path)
    } else {
        Ok(parse_target_list(raw))
    }
}

/// Keep valid targets, warning about each dropped one
pub fn validate_targets(targets: Vec<String>) -> Vec<String> {
    targets
        .into_iter()
        .filter(|t| {
            let ok = is_valid_target(t);
            if !ok {
                eprintln!("{}", format!("[!] Skipping invalid target: {}", t).yellow());
            }
            ok
        })
        .collect()
}

/// Folders referenced as `{output}/<name>/` by any command of the given tasks
pub fn referenced_output_folders<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> BTreeSet<String> {
    let mut folders = BTreeSet::new();
    for task in tasks {
        for cmd in &task.commands {
            for cap in OUTPUT_SUBFOLDER.captures_iter(cmd) {
                folders.insert(cap[1].to_string());
            }
        }
    }
    folders
}

/// Create `<output_root>/<target>` plus the base and task-referenced subfolders
pub fn prepare_output_dirs(output_root: &Path, target: &str, extra_folders: &BTreeSet<String>) -> Result<PathBuf> {
    let target_dir = target_output_dir(output_root, target);
    fs::create_dir_all(&target_dir)
        .context(format!("Failed to create output directory: {}", target_dir.display()))?;

    let extras = extra_folders.iter().map(String::as_str);
    for sub in BASE_SUBFOLDERS.iter().copied().chain(extras) {
        let dir = target_dir.join(sub);
        fs::create_dir_all(&dir).context(format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(target_dir)
}
