use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

use crate::job_scheduler::{FailureKind, JobOutcome, RunReport};
use crate::postprocess::{LivenessOutcome, SubdomainSummary};

/// Unified metrics for one recon run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,

    pub tasks: Vec<String>,
    pub total_jobs: usize,
    pub finished: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub jobs_by_tool: BTreeMap<String, usize>,

    pub targets: BTreeMap<String, TargetMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub jobs: usize,
    pub finished: usize,
    pub failed: usize,
    pub skipped: usize,
    // Subdomain post-processing (when it ran)
    pub unique_subdomains: Option<usize>,
    pub live_subdomains: Option<usize>,
}

impl RunMetrics {
    pub fn new(run_id: impl Into<String>, tasks: Vec<String>) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: 0.0,
            tasks,
            total_jobs: 0,
            finished: 0,
            failed: 0,
            skipped: 0,
            failures_by_kind: BTreeMap::new(),
            jobs_by_tool: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }

    /// Fresh id for a run
    pub fn generate_run_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Fold a finished batch into the counters
    pub fn record_report(&mut self, report: &RunReport) {
        for result in &report.results {
            self.total_jobs += 1;
            *self.jobs_by_tool.entry(result.tool.clone()).or_insert(0) += 1;
            let target = self.targets.entry(result.target.clone()).or_default();
            target.jobs += 1;

            match &result.outcome {
                JobOutcome::Finished => {
                    self.finished += 1;
                    target.finished += 1;
                }
                JobOutcome::Failed(kind) => {
                    self.failed += 1;
                    target.failed += 1;
                    *self.failures_by_kind.entry(kind_label(*kind).to_string()).or_insert(0) += 1;
                }
                JobOutcome::Skipped(_) => {
                    self.skipped += 1;
                    target.skipped += 1;
                }
            }
        }

        for skipped in &report.skipped {
            self.skipped += 1;
            self.targets.entry(skipped.target.clone()).or_default().skipped += 1;
        }
    }

    pub fn record_subdomains(&mut self, target: &str, summary: &SubdomainSummary) {
        let entry = self.targets.entry(target.to_string()).or_default();
        entry.unique_subdomains = Some(summary.unique);
        entry.live_subdomains = match summary.live {
            Some(LivenessOutcome::Checked { count, .. }) => Some(count),
            _ => None,
        };
    }

    /// Close the run and compute its duration
    pub fn finalize(&mut self) {
        let end = Utc::now();
        self.duration_seconds = (end - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.end_time = Some(end);
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Plain-text summary of the run
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Run ID: {}\nTasks: {}\nDuration: {:.2}s\n\
             \nJobs:\n\
             - Total: {}\n\
             - Finished: {}\n\
             - Failed: {}\n\
             - Skipped: {}\n",
            self.run_id,
            self.tasks.join(", "),
            self.duration_seconds,
            self.total_jobs,
            self.finished,
            self.failed,
            self.skipped
        );

        if !self.failures_by_kind.is_empty() {
            summary.push_str("\nFailures:\n");
            for (kind, count) in &self.failures_by_kind {
                summary.push_str(&format!("- {}: {}\n", kind, count));
            }
        }

        for (name, target) in &self.targets {
            summary.push_str(&format!(
                "\n{}: {} job(s), {} failed",
                name, target.jobs, target.failed
            ));
            if let Some(unique) = target.unique_subdomains {
                summary.push_str(&format!(", {} subdomain(s)", unique));
            }
            if let Some(live) = target.live_subdomains {
                summary.push_str(&format!(", {} live", live));
            }
            summary.push('\n');
        }

        summary
    }
}

pub fn kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::ToolMissing => "tool missing",
        FailureKind::NonZeroExit => "non-zero exit",
        FailureKind::LaunchError => "launch error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_expander::SkippedCommand;
    use crate::job_scheduler::JobResult;
    use crate::postprocess::LivenessTool;
    use std::path::PathBuf;

    fn result(id: usize, target: &str, tool: &str, outcome: JobOutcome) -> JobResult {
        JobResult {
            job_id: id,
            target: target.to_string(),
            task: "Recon".to_string(),
            tool: tool.to_string(),
            command: tool.to_string(),
            outcome,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            result_file: None,
        }
    }

    fn report() -> RunReport {
        RunReport {
            results: vec![
                result(0, "a.com", "subfinder", JobOutcome::Finished),
                result(1, "a.com", "nmap", JobOutcome::Failed(FailureKind::ToolMissing)),
                result(2, "b.com", "subfinder", JobOutcome::Finished),
                result(3, "b.com", "ffuf", JobOutcome::Skipped("no wordlist".to_string())),
            ],
            failures: Vec::new(),
            skipped: vec![SkippedCommand {
                target: "b.com".to_string(),
                task: "Dirs".to_string(),
                command: "dirsearch -w {wordlist}".to_string(),
                reason: "no wordlist".to_string(),
            }],
        }
    }

    #[test]
    fn test_record_report_counts() {
        let mut metrics = RunMetrics::new("run-1", vec!["Recon".to_string()]);
        metrics.record_report(&report());

        assert_eq!(metrics.total_jobs, 4);
        assert_eq!(metrics.finished, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.skipped, 2);
        assert_eq!(metrics.jobs_by_tool["subfinder"], 2);
        assert_eq!(metrics.failures_by_kind["tool missing"], 1);
        assert_eq!(metrics.targets["a.com"].failed, 1);
        assert_eq!(metrics.targets["b.com"].skipped, 2);
    }

    #[test]
    fn test_subdomain_counts_and_summary() {
        let mut metrics = RunMetrics::new("run-2", vec!["Automated Subdomain Enumeration".to_string()]);
        metrics.record_report(&report());
        metrics.record_subdomains(
            "a.com",
            &SubdomainSummary {
                all_file: PathBuf::from("/o/a.com/subdomains/all_subdomains.txt"),
                unique: 12,
                live: Some(LivenessOutcome::Checked { tool: LivenessTool::Httpx, count: 5 }),
            },
        );
        metrics.finalize();

        let summary = metrics.summary();
        assert!(summary.contains("Run ID: run-2"));
        assert!(summary.contains("a.com: 2 job(s), 1 failed, 12 subdomain(s), 5 live"));
        assert!(summary.contains("- tool missing: 1"));
        assert!(metrics.end_time.is_some());
        assert!(metrics.duration_seconds >= 0.0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_metrics.json");
        let mut metrics = RunMetrics::new(RunMetrics::generate_run_id(), vec!["Recon".to_string()]);
        metrics.record_report(&report());
        metrics.save_to_file(&path).unwrap();

        let loaded = RunMetrics::load_from_file(&path).unwrap();
        assert_eq!(loaded.run_id, metrics.run_id);
        assert_eq!(loaded.total_jobs, 4);
        assert_eq!(loaded.targets.len(), 2);
    }
}
