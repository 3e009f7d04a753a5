// postprocess.rs - Subdomain result merging and liveness filtering
// Purpose: Collapse every subdomain tool's output for a target into one
//          deduplicated list, then keep only the hosts that respond

use anyhow::{Context, Result, bail};
use colored::*;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::job_scheduler::CommandLauncher;
use crate::tool_checker::ToolProbe;

/// Task names starting with this (case-insensitive) feed the subdomain merge
pub const SUBDOMAIN_TASK_PREFIX: &str = "automated subdomain enumeration";
pub const ALL_SUBDOMAINS_FILE: &str = "all_subdomains.txt";
pub const LIVE_SUBDOMAINS_FILE: &str = "live_subdomains.txt";
pub const HTTPX_STATUS_CODES: &str = "200,301,302,403,401";

pub fn is_subdomain_task(task: &str) -> bool {
    task.to_lowercase().starts_with(SUBDOMAIN_TASK_PREFIX)
}

/// Merge line-oriented result files into `output`, one unique entity per line.
/// Missing sources are skipped. Returns the number of unique entities.
pub fn merge_and_filter(sources: &[PathBuf], output: &Path, sort: bool) -> io::Result<usize> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for source in sources {
        let content = match fs::read_to_string(source) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if seen.insert(line.to_string()) {
                ordered.push(line.to_string());
            }
        }
    }

    let entities: Vec<String> = if sort {
        ordered.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
    } else {
        ordered
    };

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut body = entities.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(output, body)?;

    Ok(entities.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessTool {
    #[default]
    Httpx,
    Dnsx,
}

impl LivenessTool {
    pub fn binary(self) -> &'static str {
        match self {
            LivenessTool::Httpx => "httpx",
            LivenessTool::Dnsx => "dnsx",
        }
    }

    pub fn fallback(self) -> Self {
        match self {
            LivenessTool::Httpx => LivenessTool::Dnsx,
            LivenessTool::Dnsx => LivenessTool::Httpx,
        }
    }

    pub fn command(self, input: &Path, output: &Path) -> String {
        let input = shell_quote(&input.display().to_string());
        let output = shell_quote(&output.display().to_string());
        match self {
            LivenessTool::Httpx => format!(
                "httpx -l {} -silent -mc {} -o {}",
                input, HTTPX_STATUS_CODES, output
            ),
            LivenessTool::Dnsx => format!("dnsx -l {} -silent -o {}", input, output),
        }
    }
}

impl fmt::Display for LivenessTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl FromStr for LivenessTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "httpx" => Ok(LivenessTool::Httpx),
            "dnsx" => Ok(LivenessTool::Dnsx),
            other => Err(format!("unknown live check tool '{}' (expected httpx or dnsx)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessOutcome {
    Checked { tool: LivenessTool, count: usize },
    /// Neither checker was installed
    Skipped,
}

/// Run the preferred checker (or the other one) over `unique`, writing
/// responsive hosts to `output`
pub async fn check_liveness(
    unique: &Path,
    output: &Path,
    preferred: LivenessTool,
    probe: &dyn ToolProbe,
    launcher: &dyn CommandLauncher,
) -> Result<LivenessOutcome> {
    let Some(tool) = [preferred, preferred.fallback()]
        .into_iter()
        .find(|t| probe.is_available(t.binary()))
    else {
        println!(
            "{}",
            "[!] Neither httpx nor dnsx is installed, skipping live check".yellow()
        );
        return Ok(LivenessOutcome::Skipped);
    };

    if tool != preferred {
        println!(
            "{}",
            format!("[!] {} not found, falling back to {}", preferred, tool).yellow()
        );
    }

    let command = tool.command(unique, output);
    println!("{}", format!("[*] Checking live hosts with {}...", tool).cyan());

    let result = launcher
        .launch(&command)
        .await
        .with_context(|| format!("Failed to launch {}", tool))?;
    if !result.success() {
        bail!(
            "{} exited with {}: {}",
            tool,
            result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            result.stderr.trim()
        );
    }

    let count = match fs::read_to_string(output) {
        Ok(content) => content.lines().filter(|l| !l.trim().is_empty()).count(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", output.display())),
    };

    Ok(LivenessOutcome::Checked { tool, count })
}

#[derive(Debug, Clone, Copy)]
pub struct LiveCheckOptions {
    pub skip: bool,
    pub preferred: LivenessTool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdomainSummary {
    pub all_file: PathBuf,
    pub unique: usize,
    /// `None` when the check was disabled or there was nothing to check
    pub live: Option<LivenessOutcome>,
}

/// Merge a target's subdomain results into `subdomains/all_subdomains.txt`
/// and, unless disabled, filter them into `subdomains/live_subdomains.txt`
pub async fn postprocess_subdomains(
    target_dir: &Path,
    sources: &[PathBuf],
    options: LiveCheckOptions,
    probe: &dyn ToolProbe,
    launcher: &dyn CommandLauncher,
) -> Result<SubdomainSummary> {
    let subdomains_dir = target_dir.join("subdomains");
    let all_file = subdomains_dir.join(ALL_SUBDOMAINS_FILE);

    let unique = merge_and_filter(sources, &all_file, true)
        .with_context(|| format!("Failed to merge subdomains into {}", all_file.display()))?;
    println!(
        "{}",
        format!("[+] {} unique subdomain(s) -> {}", unique, all_file.display()).green()
    );

    if options.skip || unique == 0 {
        return Ok(SubdomainSummary {
            all_file,
            unique,
            live: None,
        });
    }

    let live_file = subdomains_dir.join(LIVE_SUBDOMAINS_FILE);
    let live = check_liveness(&all_file, &live_file, options.preferred, probe, launcher).await?;
    if let LivenessOutcome::Checked { count, .. } = &live {
        println!(
            "{}",
            format!("[+] {} live subdomain(s) -> {}", count, live_file.display()).green()
        );
    }

    Ok(SubdomainSummary {
        all_file,
        unique,
        live: Some(live),
    })
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
