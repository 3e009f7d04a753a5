// report_generator.rs - Run summary and failure report for Cyfer Recon
// Writes cyfer_recon_summary.md and failures.json, and prints the console table

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::job_scheduler::{FailureRecord, RunStatus};
use crate::metrics::{RunMetrics, kind_label};
use crate::targets::target_output_dir;

pub const SUMMARY_FILE: &str = "cyfer_recon_summary.md";
pub const FAILURES_FILE: &str = "failures.json";
pub const METRICS_FILE: &str = "run_metrics.json";

/// One line of the summary
#[derive(Debug, Clone)]
pub struct TargetSummary {
    pub target: String,
    pub tasks: Vec<String>,
    pub output_dir: PathBuf,
    pub status: RunStatus,
    pub unique_subdomains: Option<usize>,
    pub live_subdomains: Option<usize>,
}

/// Rebuild per-target lines from saved metrics
pub fn summaries_from_metrics(metrics: &RunMetrics, output_root: &Path) -> Vec<TargetSummary> {
    metrics
        .targets
        .iter()
        .map(|(target, stats)| TargetSummary {
            target: target.clone(),
            tasks: metrics.tasks.clone(),
            output_dir: target_output_dir(output_root, target),
            status: if stats.failed > 0 {
                RunStatus::CompletedWithFailures
            } else {
                RunStatus::Succeeded
            },
            unique_subdomains: stats.unique_subdomains,
            live_subdomains: stats.live_subdomains,
        })
        .collect()
}

/// Markdown body of `cyfer_recon_summary.md`
pub fn render_markdown(entries: &[TargetSummary], failures: &[FailureRecord]) -> String {
    let mut md = String::from("# Cyfer Recon Summary\n\n");

    for entry in entries {
        md.push_str(&format!(
            "- **{}**: {} -> `{}` ({})",
            entry.target,
            entry.tasks.join(", "),
            entry.output_dir.display(),
            status_label(entry.status)
        ));
        if let Some(unique) = entry.unique_subdomains {
            md.push_str(&format!(", {} subdomain(s)", unique));
        }
        if let Some(live) = entry.live_subdomains {
            md.push_str(&format!(", {} live", live));
        }
        md.push('\n');
    }

    if !failures.is_empty() {
        md.push_str(&format!("\n## Failures ({})\n\n", failures.len()));
        md.push_str("| Target | Task | Tool | Kind | Exit | Error |\n");
        md.push_str("|---|---|---|---|---|---|\n");
        for f in failures {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                f.target,
                f.task,
                f.tool,
                kind_label(f.kind),
                f.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                escape_cell(&f.stderr_tail)
            ));
        }
    }

    md
}

pub fn write_markdown_summary(path: &Path, entries: &[TargetSummary], failures: &[FailureRecord]) -> Result<()> {
    fs::write(path, render_markdown(entries, failures))
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn save_failures_json(path: &Path, failures: &[FailureRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(failures)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Missing file means no failures were recorded
pub fn load_failures_json(path: &Path) -> Result<Vec<FailureRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid failures file {}", path.display()))
}

/// Console table printed at the end of a run
pub fn print_summary_table(entries: &[TargetSummary], failures: &[FailureRecord]) {
    println!();
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan());
    println!("{}", "                       RECON SUMMARY".cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan());

    for entry in entries {
        let status = match entry.status {
            RunStatus::Succeeded => "OK".green().bold(),
            RunStatus::CompletedWithFailures => "FAILURES".red().bold(),
        };
        println!(
            "  {:<30} {:<10} {}",
            entry.target,
            status,
            entry.output_dir.display().to_string().dimmed()
        );
    }

    if !failures.is_empty() {
        println!();
        println!("{}", format!("[-] {} failed job(s):", failures.len()).red().bold());
        for f in failures {
            println!(
                "    {} {} {} ({}) {}",
                f.target.yellow(),
                f.task,
                f.tool.bold(),
                kind_label(f.kind),
                f.stderr_tail.dimmed()
            );
        }
    }
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan());
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Succeeded => "succeeded",
        RunStatus::CompletedWithFailures => "completed with failures",
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
