// main.rs - Cyfer Recon - Recon tool orchestrator
// Purpose: Load the task/tool tables, expand targets x tasks into jobs, run them
//          through the scheduler, then merge subdomain results and report

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cyfer_recon::config::{ReconConfig, ResourceMap, default_user_dir};
use cyfer_recon::discord_notifier::DiscordNotifier;
use cyfer_recon::job_expander::{MissingBindingPolicy, expand};
use cyfer_recon::job_scheduler::{
    CapturePolicy, CommandLauncher, ExecutionConfig, JobScheduler, RunReport, RunStatus, ShellLauncher,
};
use cyfer_recon::metrics::RunMetrics;
use cyfer_recon::postprocess::{LiveCheckOptions, LivenessTool, is_subdomain_task, postprocess_subdomains};
use cyfer_recon::progress::JobBoard;
use cyfer_recon::report_generator::{
    FAILURES_FILE, METRICS_FILE, SUMMARY_FILE, TargetSummary, print_summary_table, save_failures_json,
    write_markdown_summary,
};
use cyfer_recon::targets::{
    collect_targets, prepare_output_dirs, referenced_output_folders, save_targets, target_output_dir,
    validate_targets,
};
use cyfer_recon::tool_checker::{InstallStatus, MissingTool, ToolChecker, install_missing};

const EXIT_OK: i32 = 0;
const EXIT_FAILURES: i32 = 1;
const EXIT_PRECONDITION: i32 = 2;

const PROGRESS_FILE: &str = "progress.jsonl";
const TARGETS_FILE: &str = "cyfer_recon_targets.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CaptureArg {
    Log,
    Result,
    Both,
}

impl From<CaptureArg> for CapturePolicy {
    fn from(arg: CaptureArg) -> Self {
        match arg {
            CaptureArg::Log => CapturePolicy::Log,
            CaptureArg::Result => CapturePolicy::ResultFile,
            CaptureArg::Both => CapturePolicy::Both,
        }
    }
}

/// Cyfer Recon - run recon tool suites against many targets
#[derive(Parser, Debug)]
#[command(
    name = "cyfer-recon",
    version,
    about = "Orchestrate external recon tools across targets and tasks",
    long_about = r#"
╔═══════════════════════════════════════════════════════════════════════════════╗
║                     CYFER RECON - Recon Tool Orchestrator                     ║
╚═══════════════════════════════════════════════════════════════════════════════╝

Tasks are named lists of command templates (config/tasks.json). Each template
may use {target}, {output}, {wordlist} and {payload}. Every (target, task,
command) becomes a job; jobs run sequentially or through a bounded pool.

EXAMPLES:

  Run two tasks against a target list:
    cyfer-recon -t targets.txt --tasks "Automated Subdomain Enumeration" --tasks "Port Scanning"

  Use a profile with 8 workers:
    cyfer-recon -t example.com,test.org --profile "Quick Recon" --workers 8

  Preview the rendered commands:
    cyfer-recon -t example.com --profile "Full Recon" --dry-run

  Check which tools a profile needs:
    cyfer-recon --profile "API Recon" --check-tools

═══════════════════════════════════════════════════════════════════════════════

OUTPUT FILES:

  {output-dir}/
  ├── {target}/
  │   ├── subdomains/            # incl. all_subdomains.txt, live_subdomains.txt
  │   ├── ports/
  │   ├── screenshots/
  │   └── logs/                  # one <task>.log per task
  ├── cyfer_recon_summary.md
  ├── cyfer_recon_targets.txt    # validated target list
  ├── failures.json
  ├── run_metrics.json
  └── progress.jsonl

EXIT CODES:  0 all jobs succeeded | 1 some jobs failed | 2 precondition not met
"#
)]
struct Args {
    // ═══════════════════════════════════════════════════════════════════════════
    // TARGET OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Targets file, or a comma/space separated list
    #[arg(short, long, value_name = "FILE|LIST", help_heading = "Targets")]
    targets: Option<String>,

    // ═══════════════════════════════════════════════════════════════════════════
    // TASK SELECTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Task to run (repeatable)
    #[arg(long = "tasks", value_name = "TASK", help_heading = "Task Selection")]
    tasks: Vec<String>,

    /// Named task profile (e.g. "Quick Recon")
    #[arg(long, value_name = "NAME", help_heading = "Task Selection", conflicts_with = "tasks")]
    profile: Option<String>,

    /// Print the task table and profiles, then exit
    #[arg(long, help_heading = "Task Selection")]
    list_tasks: bool,

    // ═══════════════════════════════════════════════════════════════════════════
    // RESOURCES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Wordlist bound for every tool (repeatable, overrides config)
    #[arg(long, value_name = "FILE", help_heading = "Resources")]
    wordlist: Vec<PathBuf>,

    /// Payload file bound for every tool (repeatable, overrides config)
    #[arg(long, value_name = "FILE", help_heading = "Resources")]
    payload: Vec<PathBuf>,

    /// Keep commands with unbound {wordlist}/{payload} and skip them at dispatch
    #[arg(long, help_heading = "Resources")]
    defer_missing_bindings: bool,

    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run every job one at a time
    #[arg(long, help_heading = "Execution")]
    sequential: bool,

    /// Concurrent worker count (default: number of CPUs)
    #[arg(long, value_name = "NUM", help_heading = "Execution")]
    workers: Option<usize>,

    /// Render the commands without running anything
    #[arg(long, help_heading = "Execution")]
    dry_run: bool,

    /// Where captured stdout/stderr goes
    #[arg(long, value_enum, default_value = "log", help_heading = "Execution")]
    capture: CaptureArg,

    // ═══════════════════════════════════════════════════════════════════════════
    // POST-PROCESSING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Don't filter merged subdomains through httpx/dnsx
    #[arg(long, help_heading = "Post-processing")]
    skip_live_check: bool,

    /// Preferred liveness checker: httpx or dnsx
    #[arg(long, default_value = "httpx", value_name = "TOOL", help_heading = "Post-processing")]
    live_check_tool: LivenessTool,

    // ═══════════════════════════════════════════════════════════════════════════
    // TOOL MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Report tool availability for the selected (or all) tasks, then exit
    #[arg(long, help_heading = "Tool Management")]
    check_tools: bool,

    /// Run the install command of every missing tool before starting
    #[arg(long, help_heading = "Tool Management")]
    setup_tools: bool,

    // ═══════════════════════════════════════════════════════════════════════════
    // OUTPUT & NOTIFICATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Output root
    #[arg(short, long, default_value = ".", value_name = "DIR", help_heading = "Output")]
    output_dir: PathBuf,

    /// Directory holding tasks.json, tools.json and friends
    #[arg(long, default_value = "config", value_name = "DIR", help_heading = "Output")]
    config_dir: PathBuf,

    /// Discord webhook URL for failure alerts and the run summary
    #[arg(long, value_name = "URL", help_heading = "Notifications")]
    discord_webhook: Option<String>,
}

/// Main entry point
#[tokio::main]
async fn main() {
    let args = Args::parse();

    print_banner();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format!("[ERROR] {:#}", e).red().bold());
            EXIT_PRECONDITION
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════════
    let user_dir = default_user_dir();
    let mut config = ReconConfig::load(&args.config_dir, user_dir.as_deref())
        .with_context(|| format!("Failed to load config from {}", args.config_dir.display()))?;

    if !args.wordlist.is_empty() {
        config.resources.wordlists = ResourceMap::new().with_shared(args.wordlist.clone());
    }
    if !args.payload.is_empty() {
        config.resources.payloads = ResourceMap::new().with_shared(args.payload.clone());
    }

    if args.list_tasks {
        list_tasks(&config);
        return Ok(EXIT_OK);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TASK SELECTION
    // ═══════════════════════════════════════════════════════════════════════════
    let selected: Vec<String> = match &args.profile {
        Some(profile) => config.resolve_profile(profile)?,
        None => args.tasks.clone(),
    };

    if let Some(unknown) = selected.iter().find(|t| config.tasks.get(t).is_none()) {
        eprintln!("{}", format!("[ERROR] Unknown task: {}", unknown).red().bold());
        eprintln!("{}", "Use --list-tasks to see the available tasks".yellow());
        return Ok(EXIT_PRECONDITION);
    }

    let checker = ToolChecker::system(config.tools.clone());

    if args.check_tools {
        let scope: Vec<String> = if selected.is_empty() {
            config.tasks.names().map(String::from).collect()
        } else {
            selected.clone()
        };
        let missing = checker.find_missing(&scope, &config.tasks);
        return Ok(report_tool_status(&checker, &scope, &config, &missing));
    }

    if selected.is_empty() {
        eprintln!("{}", "[ERROR] No tasks selected. Use --tasks or --profile".red().bold());
        return Ok(EXIT_PRECONDITION);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TARGETS
    // ═══════════════════════════════════════════════════════════════════════════
    let Some(raw_targets) = &args.targets else {
        eprintln!("{}", "[ERROR] Please specify --targets".red().bold());
        eprintln!("{}", "Usage:".yellow());
        eprintln!("  cyfer-recon -t targets.txt --profile \"Quick Recon\"");
        eprintln!("  cyfer-recon -t example.com,test.org --tasks \"Port Scanning\"");
        return Ok(EXIT_PRECONDITION);
    };
    let targets = validate_targets(collect_targets(raw_targets)?);
    if targets.is_empty() {
        eprintln!("{}", "[ERROR] No valid targets".red().bold());
        return Ok(EXIT_PRECONDITION);
    }

    println!("{}", format!("[*] Targets: {}", targets.join(", ")).cyan().bold());
    println!("{}", format!("[*] Tasks:   {}", selected.join(", ")).cyan().bold());

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPANSION
    // ═══════════════════════════════════════════════════════════════════════════
    let output_root = absolute(&args.output_dir)?;
    let policy = if args.defer_missing_bindings {
        MissingBindingPolicy::Defer
    } else {
        MissingBindingPolicy::Skip
    };
    let plan = expand(&targets, &selected, &config.tasks, &config.resources, policy, &output_root)?;

    let mut exec = if args.sequential {
        ExecutionConfig::sequential()
    } else {
        ExecutionConfig::default()
    }
    .with_capture(args.capture.into());
    if let Some(workers) = args.workers {
        exec = exec.with_workers(workers);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DRY RUN
    // ═══════════════════════════════════════════════════════════════════════════
    if args.dry_run {
        println!("{}", "[*] Dry run: commands that would be executed".yellow().bold());
        let scheduler = JobScheduler::new(exec, Arc::new(checker), Arc::new(JobBoard::new("dry-run")));
        for line in scheduler.dry_run(&plan.jobs) {
            match line.command {
                Ok(cmd) => println!("{} for {}: {}", line.task.cyan(), line.target.green(), cmd),
                Err(e) => println!(
                    "{} for {}: {}",
                    line.task.cyan(),
                    line.target.green(),
                    format!("(skipped: {})", e).yellow()
                ),
            }
        }
        for skipped in &plan.skipped {
            println!(
                "{} for {}: {}",
                skipped.task.cyan(),
                skipped.target.green(),
                format!("(skipped: {})", skipped.reason).yellow()
            );
        }
        return Ok(EXIT_OK);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TOOL PRE-FLIGHT
    // ═══════════════════════════════════════════════════════════════════════════
    let mut missing = checker.find_missing(&selected, &config.tasks);
    if !missing.is_empty() && args.setup_tools {
        println!("{}", format!("[*] Installing {} missing tool(s)...", missing.len()).cyan().bold());
        let outcomes = install_missing(&checker, &missing).await;
        let installed = outcomes.iter().filter(|o| o.status == InstallStatus::Installed).count();
        println!("{}", format!("[+] {}/{} tool(s) installed", installed, outcomes.len()).green());
        missing = checker.find_missing(&selected, &config.tasks);
    }
    if !missing.is_empty() {
        print_missing_tools(&missing);
        return Ok(EXIT_PRECONDITION);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXECUTION
    // ═══════════════════════════════════════════════════════════════════════════
    let folders = referenced_output_folders(selected.iter().filter_map(|t| config.tasks.get(t)));
    for target in &targets {
        prepare_output_dirs(&output_root, target, &folders)?;
    }
    save_targets(&targets, &output_root.join(TARGETS_FILE))?;

    let run_id = RunMetrics::generate_run_id();
    let mut metrics = RunMetrics::new(run_id.clone(), selected.clone());
    let board = Arc::new(
        JobBoard::new(run_id)
            .with_display(plan.jobs.len())
            .with_event_log(output_root.join(PROGRESS_FILE)),
    );

    let checker = Arc::new(checker);
    let launcher: Arc<dyn CommandLauncher> = Arc::new(ShellLauncher::new(exec.shell.clone()));
    let mut scheduler =
        JobScheduler::new(exec, checker.clone(), board.clone()).with_launcher(launcher.clone());

    let notifier = match &args.discord_webhook {
        Some(url) => Some(Arc::new(DiscordNotifier::new(url.clone())?)),
        None => None,
    };
    if let Some(notifier) = &notifier {
        scheduler = scheduler.with_failure_sink(notifier.clone());
    }

    let mut report = scheduler.run(plan.jobs).await;
    report.skipped = plan.skipped;

    // ═══════════════════════════════════════════════════════════════════════════
    // POST-PROCESSING
    // ═══════════════════════════════════════════════════════════════════════════
    if selected.iter().any(|t| is_subdomain_task(t)) {
        let options = LiveCheckOptions {
            skip: args.skip_live_check,
            preferred: args.live_check_tool,
        };
        for target in &targets {
            println!("{}", format!("[*] Merging subdomain results for {}", target).cyan());
            let sources = report.result_files(target, is_subdomain_task);
            let target_dir = target_output_dir(&output_root, target);
            match postprocess_subdomains(&target_dir, &sources, options, checker.as_ref(), launcher.as_ref()).await {
                Ok(summary) => metrics.record_subdomains(target, &summary),
                Err(e) => {
                    eprintln!("{}", format!("[!] Subdomain post-processing skipped for {}: {:#}", target, e).yellow());
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REPORTING
    // ═══════════════════════════════════════════════════════════════════════════
    metrics.record_report(&report);
    metrics.finalize();
    metrics.save_to_file(&output_root.join(METRICS_FILE))?;
    save_failures_json(&output_root.join(FAILURES_FILE), &report.failures)?;

    let entries: Vec<TargetSummary> = targets
        .iter()
        .map(|target| {
            let target_stats = metrics.targets.get(target);
            TargetSummary {
                target: target.clone(),
                tasks: selected.clone(),
                output_dir: target_output_dir(&output_root, target),
                status: report.target_status(target),
                unique_subdomains: target_stats.and_then(|t| t.unique_subdomains),
                live_subdomains: target_stats.and_then(|t| t.live_subdomains),
            }
        })
        .collect();

    let summary_path = output_root.join(SUMMARY_FILE);
    write_markdown_summary(&summary_path, &entries, &report.failures)?;
    print_summary_table(&entries, &report.failures);
    println!("{}", metrics.summary().dimmed());

    if let Some(notifier) = &notifier {
        notifier.flush().await;
        if let Err(e) = notifier.notify_run_complete(&report, &targets).await {
            eprintln!("{}", format!("[!] {:#}", e).yellow());
        }
    }

    println!(
        "{}",
        format!("[+] Recon complete! Summary saved to {}", summary_path.display()).green().bold()
    );

    Ok(exit_code(&report))
}

fn exit_code(report: &RunReport) -> i32 {
    match report.status() {
        RunStatus::Succeeded => EXIT_OK,
        RunStatus::CompletedWithFailures => EXIT_FAILURES,
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

/// Print application banner
fn print_banner() {
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "   ██████╗██╗   ██╗███████╗███████╗██████╗ ".cyan().bold());
    println!("{}", "  ██╔════╝╚██╗ ██╔╝██╔════╝██╔════╝██╔══██╗".cyan().bold());
    println!("{}", "  ██║      ╚████╔╝ █████╗  █████╗  ██████╔╝".cyan().bold());
    println!("{}", "  ██║       ╚██╔╝  ██╔══╝  ██╔══╝  ██╔══██╗".cyan().bold());
    println!("{}", "  ╚██████╗   ██║   ██║     ███████╗██║  ██║".cyan().bold());
    println!("{}", "   ╚═════╝   ╚═╝   ╚═╝     ╚══════╝╚═╝  ╚═╝".cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", format!("  Cyfer Recon v{} - Recon Tool Orchestrator", env!("CARGO_PKG_VERSION")).white().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}

fn list_tasks(config: &ReconConfig) {
    println!("{}", "[*] Available tasks:".cyan().bold());
    for task in config.tasks.iter() {
        println!(
            "  {} {}",
            task.name.green().bold(),
            format!("({} command(s), {:?})", task.commands.len(), task.run_mode).dimmed()
        );
    }
    println!();
    println!("{}", "[*] Profiles:".cyan().bold());
    for (name, tasks) in &config.profiles {
        println!("  {}: {}", name.green().bold(), tasks.join(", "));
    }
}

fn report_tool_status(
    checker: &ToolChecker,
    scope: &[String],
    config: &ReconConfig,
    missing: &BTreeMap<String, MissingTool>,
) -> i32 {
    println!("{}", "[*] Checking tool availability...".cyan().bold());
    for tool in checker.required_tools(scope, &config.tasks) {
        if missing.contains_key(&tool) {
            println!("  {} {}", "✗".red(), tool.red());
        } else {
            println!("  {} {}", "✓".green(), tool);
        }
    }

    if missing.is_empty() {
        println!("{}", "[+] All registered tools are installed".green().bold());
        EXIT_OK
    } else {
        println!();
        print_missing_tools(missing);
        EXIT_PRECONDITION
    }
}

fn print_missing_tools(missing: &BTreeMap<String, MissingTool>) {
    eprintln!(
        "{}",
        "[-] The following required tool(s) are missing. Install them or rerun with --setup-tools:"
            .red()
            .bold()
    );
    for (tool, info) in missing {
        eprintln!("  {}", tool.bold());
        eprintln!("    {} {}", "Install:".yellow(), info.install);
        if let Some(note) = &info.note {
            eprintln!("    {} {}", "Note:".blue(), note);
        }
    }
}
