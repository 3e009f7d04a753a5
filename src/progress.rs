// progress.rs - Live job status and structured run events
// Purpose: Track which jobs are running, render them as progress bars and
//          append every state change to progress.jsonl

use chrono::{DateTime, Utc};
use colored::*;
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::job_expander::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Finished,
    Error,
}

/// One line of progress.jsonl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub target: Option<String>,
    pub task: Option<String>,
    pub event_type: EventType,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventType {
    RunStarted { total_jobs: usize },
    JobStarted { job_id: usize, tool: String },
    JobFinished { job_id: usize, tool: String },
    JobFailed { job_id: usize, tool: String, exit_code: Option<i32>, error: String },
    JobSkipped { job_id: usize, reason: String },
    RunCompleted { finished: usize, failed: usize, skipped: usize },
}

struct ActiveJob {
    status: JobStatus,
    bar: Option<ProgressBar>,
}

struct Display {
    multi: MultiProgress,
    overall: ProgressBar,
}

/// Shared, internally synchronized view of every in-flight job
pub struct JobBoard {
    run_id: String,
    active: DashMap<usize, ActiveJob>,
    finished: AtomicUsize,
    errored: AtomicUsize,
    skipped: AtomicUsize,
    display: Option<Display>,
    event_log: Option<Mutex<fs::File>>,
    events: Mutex<Vec<ProgressEvent>>,
}

impl JobBoard {
    /// Board with no terminal output and no event file
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            active: DashMap::new(),
            finished: AtomicUsize::new(0),
            errored: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            display: None,
            event_log: None,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Enable the "All Jobs" bar plus one spinner per running tool
    pub fn with_display(mut self, total_jobs: usize) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_jobs as u64));
        overall.set_style(
            ProgressStyle::with_template("{prefix:>12.cyan.bold} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        overall.set_prefix("All Jobs");
        self.display = Some(Display { multi, overall });
        self
    }

    /// Append events to `path` (JSONL). The file is opened once and held;
    /// each event is a single line write.
    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => self.event_log = Some(Mutex::new(file)),
            Err(e) => eprintln!(
                "{}",
                format!("[!] Progress log {} unavailable: {}", path.display(), e).yellow()
            ),
        }
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    // ───────────────────────────────────────────────────────────────────────
    // State transitions
    // ───────────────────────────────────────────────────────────────────────

    pub fn run_started(&self, total_jobs: usize) {
        self.record(
            None,
            EventType::RunStarted { total_jobs },
            format!("Starting {} job(s)", total_jobs),
        );
    }

    pub fn job_started(&self, job: &Job, tool: &str) {
        let bar = self.display.as_ref().map(|d| {
            let bar = d.multi.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::with_template("{spinner:.blue} {prefix:>12.bold} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_prefix(tool.to_string());
            bar.set_message(format!("{} ({})", job.target, job.task));
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        self.active.insert(
            job.id,
            ActiveJob {
                status: JobStatus::Running,
                bar,
            },
        );
        self.record(
            Some(job),
            EventType::JobStarted { job_id: job.id, tool: tool.to_string() },
            format!("🔧 {} started for {}", tool, job.target),
        );
    }

    pub fn job_finished(&self, job: &Job, tool: &str) {
        self.complete(job.id, JobStatus::Finished);
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.record(
            Some(job),
            EventType::JobFinished { job_id: job.id, tool: tool.to_string() },
            format!("✅ {} finished for {}", tool, job.target),
        );
    }

    pub fn job_errored(&self, job: &Job, tool: &str, exit_code: Option<i32>, error: &str) {
        self.complete(job.id, JobStatus::Error);
        self.errored.fetch_add(1, Ordering::SeqCst);
        self.record(
            Some(job),
            EventType::JobFailed {
                job_id: job.id,
                tool: tool.to_string(),
                exit_code,
                error: error.to_string(),
            },
            format!("❌ {} failed for {}: {}", tool, job.target, error),
        );
    }

    /// Skipped jobs never become active
    pub fn job_skipped(&self, job: &Job, reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = &self.display {
            d.overall.inc(1);
        }
        self.record(
            Some(job),
            EventType::JobSkipped { job_id: job.id, reason: reason.to_string() },
            format!("⏭️  skipped {} for {}: {}", job.task, job.target, reason),
        );
    }

    pub fn run_completed(&self) {
        let finished = self.finished_count();
        let failed = self.error_count();
        let skipped = self.skipped_count();
        if let Some(d) = &self.display {
            d.overall.finish();
        }
        self.record(
            None,
            EventType::RunCompleted { finished, failed, skipped },
            format!("Run complete: {} finished, {} failed, {} skipped", finished, failed, skipped),
        );
    }

    /// Set the terminal status, then drop the entry
    fn complete(&self, job_id: usize, status: JobStatus) {
        if let Some(mut entry) = self.active.get_mut(&job_id) {
            entry.status = status;
            if let Some(bar) = &entry.bar {
                bar.finish_and_clear();
            }
        }
        if let Some((_, entry)) = self.active.remove(&job_id) {
            if let (Some(d), Some(bar)) = (&self.display, entry.bar) {
                d.multi.remove(&bar);
            }
        }
        if let Some(d) = &self.display {
            d.overall.inc(1);
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Queries
    // ───────────────────────────────────────────────────────────────────────

    pub fn status(&self, job_id: usize) -> Option<JobStatus> {
        self.active.get(&job_id).map(|e| e.status)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> usize {
        self.errored.load(Ordering::SeqCst)
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Console
    // ───────────────────────────────────────────────────────────────────────

    /// Print above the bars when they are active
    pub fn println(&self, line: impl AsRef<str>) {
        match &self.display {
            Some(d) => {
                let _ = d.multi.println(line.as_ref());
            }
            None => println!("{}", line.as_ref()),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.println(format!("[*] {}", msg.as_ref()).cyan().to_string());
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        self.println(format!("[+] {}", msg.as_ref()).green().to_string());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.println(format!("[!] {}", msg.as_ref()).yellow().to_string());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.println(format!("[-] {}", msg.as_ref()).red().to_string());
    }

    // ───────────────────────────────────────────────────────────────────────
    // Event log
    // ───────────────────────────────────────────────────────────────────────

    fn record(&self, job: Option<&Job>, event_type: EventType, message: String) {
        let event = ProgressEvent {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            target: job.map(|j| j.target.clone()),
            task: job.map(|j| j.task.clone()),
            event_type,
            message,
        };

        if let (Some(log), Ok(json)) = (&self.event_log, serde_json::to_string(&event)) {
            if let Ok(mut file) = log.lock() {
                let _ = file.write_all(format!("{}\n", json).as_bytes());
            }
        }

        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Read events back from a progress.jsonl file, skipping malformed lines
    pub fn read_events_from_file(path: &Path) -> Vec<ProgressEvent> {
        fs::read_to_string(path)
            .map(|content| {
                content
                    .lines()
                    .filter_map(|line| serde_json::from_str::<ProgressEvent>(line).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}
