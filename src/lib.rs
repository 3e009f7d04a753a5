// lib.rs - Cyfer Recon library
// Exposes the recon engine modules for the main binary and bin/regen_summary

pub mod config;
pub mod discord_notifier;
pub mod job_expander;
pub mod job_scheduler;
pub mod metrics;
pub mod postprocess;
pub mod progress;
pub mod report_generator;
pub mod targets;
pub mod templater;
pub mod tool_checker;
