// job_scheduler.rs - Job execution with bounded parallelism
// Purpose: Run expanded jobs sequentially or through a semaphore-bounded pool,
//          gate each on tool availability, and reconcile outcomes into a
//          failure ledger without ever aborting the batch

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::config::RunMode;
use crate::job_expander::{Job, SkippedCommand};
use crate::progress::JobBoard;
use crate::templater::{CommandRenderer, RenderedCommand, TemplateError, TemplateRenderer, task_slug};
use crate::tool_checker::ToolProbe;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyMode {
    Sequential,
    Concurrent,
}

/// Where a job's captured output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePolicy {
    /// Append to `<output>/logs/<task>.log`
    #[default]
    Log,
    /// Write stdout to the job's result file when the command doesn't
    ResultFile,
    Both,
}

impl CapturePolicy {
    fn writes_log(self) -> bool {
        matches!(self, CapturePolicy::Log | CapturePolicy::Both)
    }

    fn writes_result(self) -> bool {
        matches!(self, CapturePolicy::ResultFile | CapturePolicy::Both)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Global mode; tasks with an explicit run mode override it
    pub mode: ConcurrencyMode,
    /// Upper bound on simultaneously running external processes
    pub max_concurrency: usize,
    pub capture: CapturePolicy,
    /// Shell used to interpret rendered command lines
    pub shell: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ConcurrencyMode::Concurrent,
            max_concurrency: num_cpus::get(),
            capture: CapturePolicy::Log,
            shell: "sh".to_string(),
        }
    }
}

impl ExecutionConfig {
    /// One job at a time, in expansion order
    pub fn sequential() -> Self {
        Self {
            mode: ConcurrencyMode::Sequential,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_concurrency = workers.max(1);
        self
    }

    pub fn with_capture(mut self, capture: CapturePolicy) -> Self {
        self.capture = capture;
        self
    }
}

/// A task's run mode wins unless it defers (`Both`) to the global mode
pub fn effective_mode(global: ConcurrencyMode, run_mode: RunMode) -> ConcurrencyMode {
    match run_mode {
        RunMode::Sequential => ConcurrencyMode::Sequential,
        RunMode::Concurrent => ConcurrencyMode::Concurrent,
        RunMode::Both => global,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PROCESS LAUNCHING
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandLauncher: Send + Sync {
    /// Run `command` to completion and capture its streams
    async fn launch(&self, command: &str) -> std::io::Result<ProcessOutput>;
}

pub struct ShellLauncher {
    shell: String,
}

impl ShellLauncher {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

#[async_trait]
impl CommandLauncher for ShellLauncher {
    async fn launch(&self, command: &str) -> std::io::Result<ProcessOutput> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Pre-flight found no executable; nothing was launched
    ToolMissing,
    NonZeroExit,
    /// The OS refused to spawn the process
    LaunchError,
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub target: String,
    pub task: String,
    pub tool: String,
    pub command: String,
    pub kind: FailureKind,
    pub exit_code: Option<i32>,
    /// Last non-empty stderr line (or the launch error message)
    pub stderr_tail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    Finished,
    Failed(FailureKind),
    /// Never launched because a placeholder had no binding
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: usize,
    pub target: String,
    pub task: String,
    pub tool: String,
    pub command: String,
    pub outcome: JobOutcome,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub result_file: Option<PathBuf>,
}

/// Append-only, shareable across workers
#[derive(Debug, Clone, Default)]
pub struct FailureLedger {
    records: Arc<Mutex<Vec<FailureRecord>>>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: FailureRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn snapshot(&self) -> Vec<FailureRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives each failure as it is recorded; must never block or fail the job
pub trait FailureSink: Send + Sync {
    fn notify(&self, record: &FailureRecord);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Succeeded,
    CompletedWithFailures,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// One entry per job, ordered by job id
    pub results: Vec<JobResult>,
    pub failures: Vec<FailureRecord>,
    /// Commands dropped before scheduling (expansion-time skips)
    pub skipped: Vec<SkippedCommand>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        if self.failures.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::CompletedWithFailures
        }
    }

    pub fn target_status(&self, target: &str) -> RunStatus {
        if self.failures.iter().any(|f| f.target == target) {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn finished_count(&self) -> usize {
        self.count(|o| *o == JobOutcome::Finished)
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_)))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Skipped(_))) + self.skipped.len()
    }

    /// Result files of launched jobs for `target` whose task matches `task_filter`
    pub fn result_files(&self, target: &str, task_filter: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        self.results
            .iter()
            .filter(|r| r.target == target && task_filter(&r.task))
            .filter(|r| !matches!(r.outcome, JobOutcome::Skipped(_)))
            .filter_map(|r| r.result_file.clone())
            .collect()
    }
}

/// One rendered line of a dry run
#[derive(Debug, Clone)]
pub struct DryRunLine {
    pub job_id: usize,
    pub target: String,
    pub task: String,
    pub command: Result<String, TemplateError>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

pub struct JobScheduler {
    config: ExecutionConfig,
    renderer: Arc<dyn CommandRenderer>,
    probe: Arc<dyn ToolProbe>,
    launcher: Arc<dyn CommandLauncher>,
    board: Arc<JobBoard>,
    sink: Option<Arc<dyn FailureSink>>,
}

impl JobScheduler {
    pub fn new(config: ExecutionConfig, probe: Arc<dyn ToolProbe>, board: Arc<JobBoard>) -> Self {
        let launcher = Arc::new(ShellLauncher::new(config.shell.clone()));
        Self {
            config,
            renderer: Arc::new(TemplateRenderer),
            probe,
            launcher,
            board,
            sink: None,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn CommandLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn CommandRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn board(&self) -> &Arc<JobBoard> {
        &self.board
    }

    /// Split into (concurrent, sequential), preserving relative order in each
    pub fn partition<J: std::borrow::Borrow<Job>>(&self, jobs: impl IntoIterator<Item = J>) -> (Vec<J>, Vec<J>) {
        jobs.into_iter().partition(|job| {
            let job = <J as std::borrow::Borrow<Job>>::borrow(job);
            effective_mode(self.config.mode, job.run_mode) == ConcurrencyMode::Concurrent
        })
    }

    /// Render every job in dispatch order without launching anything
    pub fn dry_run(&self, jobs: &[Job]) -> Vec<DryRunLine> {
        let (concurrent, sequential) = self.partition(jobs.iter());
        concurrent
            .into_iter()
            .chain(sequential)
            .map(|job| DryRunLine {
                job_id: job.id,
                target: job.target.clone(),
                task: job.task.clone(),
                command: self
                    .renderer
                    .render(&job.template, &job.task, &job.bindings(), &job.index)
                    .map(|r| r.command),
            })
            .collect()
    }

    /// Drive every job to a terminal state. Never fails: per-job problems end
    /// up in the report's failure list.
    pub async fn run(&self, jobs: Vec<Job>) -> RunReport {
        let total = jobs.len();
        let ledger = FailureLedger::new();
        let worker = Arc::new(JobWorker {
            capture: self.config.capture,
            renderer: Arc::clone(&self.renderer),
            probe: Arc::clone(&self.probe),
            launcher: Arc::clone(&self.launcher),
            board: Arc::clone(&self.board),
            sink: self.sink.clone(),
            ledger: ledger.clone(),
        });

        let (concurrent, sequential) = self.partition(jobs);
        self.board.run_started(total);

        let mut results = Vec::with_capacity(total);

        if !concurrent.is_empty() {
            let workers = self.config.max_concurrency.max(1);
            self.board.info(format!(
                "Dispatching {} job(s) across {} worker(s)",
                concurrent.len(),
                workers
            ));

            let semaphore = Arc::new(Semaphore::new(workers));
            let mut handles = Vec::with_capacity(concurrent.len());

            for job in concurrent {
                let semaphore = Arc::clone(&semaphore);
                let worker = Arc::clone(&worker);
                let fallback = job.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    worker.execute(job).await
                });
                handles.push((fallback, handle));
            }

            // Pool shutdown: wait for every in-flight job
            for (job, handle) in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => results.push(worker.aborted(&job, &e.to_string())),
                }
            }
        }

        if !sequential.is_empty() {
            self.board.info(format!("Running {} job(s) sequentially", sequential.len()));
            for job in sequential {
                results.push(worker.execute(job).await);
            }
        }

        results.sort_by_key(|r| r.job_id);
        self.board.run_completed();

        RunReport {
            results,
            failures: ledger.snapshot(),
            skipped: Vec::new(),
        }
    }
}

/// Per-job execution, shared by every pool task
struct JobWorker {
    capture: CapturePolicy,
    renderer: Arc<dyn CommandRenderer>,
    probe: Arc<dyn ToolProbe>,
    launcher: Arc<dyn CommandLauncher>,
    board: Arc<JobBoard>,
    sink: Option<Arc<dyn FailureSink>>,
    ledger: FailureLedger,
}

impl JobWorker {
    async fn execute(&self, job: Job) -> JobResult {
        let tool = job.tool();

        let rendered = match self
            .renderer
            .render(&job.template, &job.task, &job.bindings(), &job.index)
        {
            Ok(rendered) => rendered,
            Err(e) => {
                let reason = e.to_string();
                self.board.warn(format!("Skipping {} for {}: {}", job.task, job.target, reason));
                self.board.job_skipped(&job, &reason);
                return JobResult {
                    job_id: job.id,
                    target: job.target,
                    task: job.task,
                    tool,
                    command: job.template,
                    outcome: JobOutcome::Skipped(reason),
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    result_file: None,
                };
            }
        };

        // Never Running unless a process is actually launched
        if !self.probe.is_available(job.program()) {
            let message = format!("{}: command not found", job.program());
            let output = ProcessOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: message,
            };
            return self.fail(&job, &tool, &rendered, FailureKind::ToolMissing, output);
        }

        self.board.job_started(&job, &tool);

        match self.launcher.launch(&rendered.command).await {
            Err(e) => {
                let output = ProcessOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                };
                self.fail(&job, &tool, &rendered, FailureKind::LaunchError, output)
            }
            Ok(output) => {
                if self.capture.writes_log() {
                    self.append_log(&job, &rendered, &output).await;
                }
                if self.capture.writes_result() && !rendered.has_output_designation {
                    if let Err(e) = fs::write(&rendered.result_file, &output.stdout).await {
                        self.board.warn(format!(
                            "Could not write {}: {}",
                            rendered.result_file.display(),
                            e
                        ));
                    }
                }

                if output.success() {
                    self.board.job_finished(&job, &tool);
                    self.result(&job, tool, rendered, JobOutcome::Finished, output)
                } else {
                    self.fail(&job, &tool, &rendered, FailureKind::NonZeroExit, output)
                }
            }
        }
    }

    fn fail(
        &self,
        job: &Job,
        tool: &str,
        rendered: &RenderedCommand,
        kind: FailureKind,
        output: ProcessOutput,
    ) -> JobResult {
        let record = FailureRecord {
            target: job.target.clone(),
            task: job.task.clone(),
            tool: tool.to_string(),
            command: rendered.command.clone(),
            kind,
            exit_code: output.exit_code,
            stderr_tail: last_line(&output.stderr),
        };

        self.board.job_errored(job, tool, output.exit_code, &record.stderr_tail);
        self.board.error(match output.exit_code {
            Some(code) => format!("{} failed for {} (exit {})", tool, job.target, code),
            None => format!("{} failed for {}: {}", tool, job.target, record.stderr_tail),
        });

        if let Some(sink) = &self.sink {
            sink.notify(&record);
        }
        self.ledger.record(record);

        self.result(job, tool.to_string(), rendered.clone(), JobOutcome::Failed(kind), output)
    }

    /// Stand-in result for a pool task that died without reporting
    fn aborted(&self, job: &Job, reason: &str) -> JobResult {
        let rendered = RenderedCommand {
            tool: job.tool(),
            command: job.template.clone(),
            result_file: job.output_dir.clone(),
            has_output_designation: false,
        };
        let output = ProcessOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("worker aborted: {}", reason),
        };
        let tool = rendered.tool.clone();
        let mut result = self.fail(job, &tool, &rendered, FailureKind::LaunchError, output);
        result.result_file = None;
        result
    }

    fn result(
        &self,
        job: &Job,
        tool: String,
        rendered: RenderedCommand,
        outcome: JobOutcome,
        output: ProcessOutput,
    ) -> JobResult {
        JobResult {
            job_id: job.id,
            target: job.target.clone(),
            task: job.task.clone(),
            tool,
            command: rendered.command,
            outcome,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            result_file: Some(rendered.result_file),
        }
    }

    /// One write per job so concurrent appends to the same task log stay whole
    async fn append_log(&self, job: &Job, rendered: &RenderedCommand, output: &ProcessOutput) {
        let logs_dir = job.output_dir.join("logs");
        let log_file = logs_dir.join(format!("{}.log", task_slug(&job.task)));
        let entry = format!("$ {}\n{}\n{}\n", rendered.command, output.stdout, output.stderr);

        let written = async {
            fs::create_dir_all(&logs_dir).await?;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .await?;
            file.write_all(entry.as_bytes()).await
        }
        .await;
        if let Err(e) = written {
            self.board.warn(format!("Could not write log {}: {}", log_file.display(), e));
        }
    }
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}
