//! `permsync status`: drift between the model and the materialized state.
//!
//! Reads the store directly, so it works whether or not the daemon is up.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use permsync_core::types::PermissionEntry;
use permsync_sync::drift::{check_all, format_datetime_age};
use permsync_sync::{DriftReport, DriftSignal};

/// Arguments for `permsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show instances whose id starts with this prefix.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let mut reports = check_all(&home).context("failed to classify instances")?;
        if let Some(prefix) = self.prefix.as_deref() {
            reports.retain(|report| report.instance.0.starts_with(prefix));
        }

        if self.json {
            return print_json(&reports);
        }
        print_table(&reports);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    instances: Vec<InstanceStatusJson>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    instances: usize,
    in_sync: usize,
    needs_sync: usize,
}

#[derive(Serialize)]
struct InstanceStatusJson {
    instance: String,
    status: &'static str,
    detail: String,
    model_updated_at: Option<String>,
    applied_at: Option<String>,
    last_applied_age: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "instance")]
    instance: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "last applied")]
    last_applied: String,
}

fn needs_sync(report: &DriftReport) -> bool {
    !matches!(report.signal, DriftSignal::InSync)
}

fn print_json(reports: &[DriftReport]) -> Result<()> {
    let needs_sync_count = reports.iter().filter(|r| needs_sync(r)).count();
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            instances: reports.len(),
            in_sync: reports.len() - needs_sync_count,
            needs_sync: needs_sync_count,
        },
        instances: reports
            .iter()
            .map(|report| InstanceStatusJson {
                instance: report.instance.to_string(),
                status: signal_key(&report.signal),
                detail: signal_detail(&report.signal),
                model_updated_at: report.model_updated_at.map(|at| at.to_rfc3339()),
                applied_at: report.applied_at.map(|at| at.to_rfc3339()),
                last_applied_age: last_applied_age(report),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(reports: &[DriftReport]) {
    let needs_sync_count = reports.iter().filter(|r| needs_sync(r)).count();
    println!(
        "permsync v{} | {} instances | {} need sync",
        env!("CARGO_PKG_VERSION"),
        reports.len(),
        needs_sync_count,
    );

    if reports.is_empty() {
        println!("No instances in ~/.permsync/model.");
        return;
    }

    let separator = "■".repeat(60).bright_black().to_string();
    println!("{separator}");
    println!(
        "Indicators: {} IN SYNC  {} DRIFTED  {} NEVER APPLIED  {} ORPHANED",
        signal_indicator(&DriftSignal::InSync),
        signal_indicator(&DriftSignal::Drifted {
            added: Vec::new(),
            removed: Vec::new(),
        }),
        signal_indicator(&DriftSignal::NeverApplied),
        signal_indicator(&DriftSignal::Orphaned),
    );
    println!("{separator}");

    let rows: Vec<StatusTableRow> = reports
        .iter()
        .map(|report| StatusTableRow {
            instance: report.instance.to_string(),
            status: report.signal.label().to_uppercase(),
            detail: signal_detail(&report.signal),
            last_applied: last_applied_age(report),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if needs_sync_count > 0 {
        println!("Run 'permsync sync check' with the daemon running to review and apply.");
    }
}

fn last_applied_age(report: &DriftReport) -> String {
    report
        .applied_at
        .map(format_datetime_age)
        .unwrap_or_else(|| "never".to_string())
}

fn signal_key(signal: &DriftSignal) -> &'static str {
    match signal {
        DriftSignal::NeverApplied => "never_applied",
        DriftSignal::InSync => "in_sync",
        DriftSignal::Drifted { .. } => "drifted",
        DriftSignal::Orphaned => "orphaned",
    }
}

fn signal_indicator(signal: &DriftSignal) -> String {
    match signal {
        DriftSignal::NeverApplied => "■".bright_black().bold().to_string(),
        DriftSignal::InSync => "■".green().bold().to_string(),
        DriftSignal::Drifted { .. } => "■".yellow().bold().to_string(),
        DriftSignal::Orphaned => "■".magenta().bold().to_string(),
    }
}

fn signal_detail(signal: &DriftSignal) -> String {
    match signal {
        DriftSignal::NeverApplied => "no materialized state".to_string(),
        DriftSignal::InSync => "up to date".to_string(),
        DriftSignal::Drifted { added, removed } => {
            let mut parts = Vec::new();
            if !added.is_empty() {
                parts.push(format!("+{}", summarize_entries(added)));
            }
            if !removed.is_empty() {
                parts.push(format!("-{}", summarize_entries(removed)));
            }
            parts.join("  ")
        }
        DriftSignal::Orphaned => "model removed".to_string(),
    }
}

fn summarize_entries(entries: &[PermissionEntry]) -> String {
    let mut names: Vec<String> = entries.iter().take(2).map(ToString::to_string).collect();
    if entries.len() > names.len() {
        names.push(format!("+{} more", entries.len() - names.len()));
    }
    names.join(", ")
}
