// Regenerate cyfer_recon_summary.md from a saved run
use std::path::Path;
use cyfer_recon::metrics::RunMetrics;
use cyfer_recon::report_generator::{
    FAILURES_FILE, METRICS_FILE, SUMMARY_FILE, load_failures_json, summaries_from_metrics, write_markdown_summary,
};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: regen_summary <output_directory>");
        eprintln!("Example: regen_summary /path/to/recon-output");
        std::process::exit(1);
    }

    let output_dir = Path::new(&args[1]);

    if !output_dir.exists() {
        eprintln!("Error: Directory not found: {}", output_dir.display());
        std::process::exit(1);
    }

    let metrics = match RunMetrics::load_from_file(&output_dir.join(METRICS_FILE)) {
        Ok(metrics) => metrics,
        Err(e) => {
            eprintln!("Error reading {}: {}", METRICS_FILE, e);
            std::process::exit(1);
        }
    };
    let failures = match load_failures_json(&output_dir.join(FAILURES_FILE)) {
        Ok(failures) => failures,
        Err(e) => {
            eprintln!("Error reading {}: {}", FAILURES_FILE, e);
            std::process::exit(1);
        }
    };

    println!("Regenerating summary for run: {}", metrics.run_id);
    println!("Output directory: {}", output_dir.display());

    let entries = summaries_from_metrics(&metrics, output_dir);
    let summary_path = output_dir.join(SUMMARY_FILE);
    match write_markdown_summary(&summary_path, &entries, &failures) {
        Ok(()) => {
            println!("Summary generated successfully!");
            println!("Output: {}", summary_path.display());
        }
        Err(e) => {
            eprintln!("Error generating summary: {}", e);
            std::process::exit(1);
        }
    }
}
