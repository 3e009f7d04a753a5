// discord_notifier.rs - Discord Webhook Integration for recon runs
// Purpose: Push job failures and the end-of-run summary to a Discord channel
// Features:
//  - Rich embeds with color coding
//  - Fire-and-forget failure alerts (never block or fail a job)
//  - Run summary with per-status counts

use anyhow::{Context, Result};
use colored::*;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::job_scheduler::{FailureKind, FailureRecord, FailureSink, RunReport, RunStatus};

/// Discord embed color codes
const COLOR_SUCCESS: u32 = 0x00ff00;  // Green
const COLOR_WARNING: u32 = 0xffaa00;  // Orange
const COLOR_CRITICAL: u32 = 0xff0000; // Red

const FOOTER: &str = "Cyfer Recon";
/// Discord rejects field values longer than this
const MAX_FIELD_LEN: usize = 1024;

/// Build the webhook body for a single embed
pub fn build_payload(title: &str, description: &str, color: u32, fields: &[(String, String, bool)]) -> Value {
    let field_objects: Vec<Value> = fields
        .iter()
        .map(|(name, value, inline)| {
            json!({
                "name": name,
                "value": truncate(value, MAX_FIELD_LEN),
                "inline": inline
            })
        })
        .collect();

    json!({
        "embeds": [{
            "title": title,
            "description": description,
            "color": color,
            "fields": field_objects,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "footer": { "text": FOOTER }
        }]
    })
}

/// Send a prepared payload to the webhook
pub async fn send_discord_notification(client: &Client, webhook_url: &str, payload: &Value) -> Result<()> {
    let response = client
        .post(webhook_url)
        .json(payload)
        .send()
        .await
        .context("Failed to send Discord notification")?;

    if response.status().is_success() {
        Ok(())
    } else {
        let error_text = response.text().await.unwrap_or_default();
        eprintln!("{}", format!("[!] Discord notification failed: {}", error_text).yellow());
        Err(anyhow::anyhow!("Discord webhook returned error"))
    }
}

pub fn failure_payload(record: &FailureRecord) -> Value {
    let (title, color) = match record.kind {
        FailureKind::ToolMissing => ("🧰 Tool Missing", COLOR_WARNING),
        FailureKind::NonZeroExit => ("❌ Job Failed", COLOR_CRITICAL),
        FailureKind::LaunchError => ("💥 Launch Error", COLOR_CRITICAL),
    };
    let description = format!("**{}** failed on **{}**", record.task, record.target);

    let mut fields = vec![
        ("Tool".to_string(), record.tool.clone(), true),
        (
            "Exit Code".to_string(),
            record.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            true,
        ),
        ("Command".to_string(), format!("`{}`", record.command), false),
    ];
    if !record.stderr_tail.is_empty() {
        fields.push(("Error".to_string(), record.stderr_tail.clone(), false));
    }

    build_payload(title, &description, color, &fields)
}

pub fn summary_payload(report: &RunReport, targets: &[String]) -> Value {
    let (title, color) = match report.status() {
        RunStatus::Succeeded => ("📊 Recon Complete", COLOR_SUCCESS),
        RunStatus::CompletedWithFailures => ("📊 Recon Complete (with failures)", COLOR_WARNING),
    };
    let description = format!("Recon finished for **{}** target(s)", targets.len());

    let fields = vec![
        ("Jobs".to_string(), report.results.len().to_string(), true),
        ("Finished".to_string(), report.finished_count().to_string(), true),
        ("Failed".to_string(), report.failed_count().to_string(), true),
        ("Skipped".to_string(), report.skipped_count().to_string(), true),
        ("Targets".to_string(), targets.join(", "), false),
    ];

    build_payload(title, &description, color, &fields)
}

/// Failure sink posting each record to a webhook on the current tokio runtime
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub async fn notify_run_complete(&self, report: &RunReport, targets: &[String]) -> Result<()> {
        send_discord_notification(&self.client, &self.webhook_url, &summary_payload(report, targets)).await?;
        println!("{}", "[+] Discord notification sent successfully".green());
        Ok(())
    }

    /// Wait for every alert still in flight
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl FailureSink for DiscordNotifier {
    fn notify(&self, record: &FailureRecord) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let url = self.webhook_url.clone();
        let payload = failure_payload(record);

        let handle = runtime.spawn(async move {
            if let Err(e) = send_discord_notification(&client, &url, &payload).await {
                eprintln!("{}", format!("[!] {}", e).yellow());
            }
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(handle);
        }
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_scheduler::{JobOutcome, JobResult};

    fn record(kind: FailureKind, exit_code: Option<i32>) -> FailureRecord {
        FailureRecord {
            target: "example.com".to_string(),
            task: "Port Scan".to_string(),
            tool: "nmap".to_string(),
            command: "nmap example.com".to_string(),
            kind,
            exit_code,
            stderr_tail: "permission denied".to_string(),
        }
    }

    #[test]
    fn test_failure_payload_format() {
        let payload = failure_payload(&record(FailureKind::NonZeroExit, Some(2)));
        let embed = &payload["embeds"][0];

        assert_eq!(embed["title"], "❌ Job Failed");
        assert_eq!(embed["color"], COLOR_CRITICAL);
        assert_eq!(embed["fields"][0]["value"], "nmap");
        assert_eq!(embed["fields"][1]["value"], "2");
        assert_eq!(embed["fields"][3]["value"], "permission denied");
        assert_eq!(embed["footer"]["text"], FOOTER);
    }

    #[test]
    fn test_missing_tool_uses_warning_color() {
        let payload = failure_payload(&record(FailureKind::ToolMissing, None));
        assert_eq!(payload["embeds"][0]["color"], COLOR_WARNING);
        assert_eq!(payload["embeds"][0]["fields"][1]["value"], "-");
    }

    #[test]
    fn test_summary_payload_counts() {
        let result = |id, outcome| JobResult {
            job_id: id,
            target: "example.com".to_string(),
            task: "Port Scan".to_string(),
            tool: "nmap".to_string(),
            command: "nmap example.com".to_string(),
            outcome,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            result_file: None,
        };
        let report = RunReport {
            results: vec![
                result(0, JobOutcome::Finished),
                result(1, JobOutcome::Failed(FailureKind::NonZeroExit)),
            ],
            failures: vec![record(FailureKind::NonZeroExit, Some(1))],
            skipped: Vec::new(),
        };

        let payload = summary_payload(&report, &["example.com".to_string()]);
        let embed = &payload["embeds"][0];
        assert_eq!(embed["color"], COLOR_WARNING);
        assert_eq!(embed["fields"][0]["value"], "2");
        assert_eq!(embed["fields"][2]["value"], "1");
    }

    #[test]
    fn test_long_fields_are_truncated() {
        let long = "x".repeat(2000);
        let payload = build_payload("t", "d", COLOR_SUCCESS, &[("Error".to_string(), long, false)]);
        let value = payload["embeds"][0]["fields"][0]["value"].as_str().unwrap();
        assert_eq!(value.chars().count(), MAX_FIELD_LEN);
    }

    #[test]
    fn test_notify_outside_runtime_is_noop() {
        let notifier = DiscordNotifier::new("http://127.0.0.1:9/webhook").unwrap();
        notifier.notify(&record(FailureKind::LaunchError, None));
        assert!(notifier.pending.lock().unwrap().is_empty());
    }
}
