//! `permsync sync`: drive the daemon's coordinator over the Unix socket.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use permsync_daemon::{request, DaemonError, DaemonRequest};

#[derive(Subcommand, Debug)]
pub enum SyncCommand {
    /// Start a permission check over every known instance.
    Check,
    /// Show the current execution and the changes found so far.
    Info,
    /// Block until the current check finishes and print the affected instances.
    Wait,
    /// Cancel a running check, or discard a finished one.
    Cancel,
    /// Apply the changes found by the finished check.
    Confirm,
    /// Compute and apply changes for the given instances right away.
    Custom(CustomArgs),
    /// Show the status of an apply job.
    Job(JobArgs),
}

#[derive(Args, Debug)]
pub struct CustomArgs {
    /// Instance ids to synchronize.
    #[arg(required = true)]
    pub instances: Vec<String>,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    /// Job id returned by `confirm` or `custom`.
    pub job_id: String,
}

pub fn run(command: SyncCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    let req = match command {
        SyncCommand::Check => DaemonRequest::new("sync"),
        SyncCommand::Info => DaemonRequest::new("sync_info"),
        SyncCommand::Wait => DaemonRequest::new("sync_wait"),
        SyncCommand::Cancel => DaemonRequest::new("sync_cancel"),
        SyncCommand::Confirm => DaemonRequest::new("sync_confirm"),
        SyncCommand::Custom(args) => DaemonRequest::new("sync_custom").with_instances(args.instances),
        SyncCommand::Job(args) => DaemonRequest::new("sync_job").with_job_id(args.job_id),
    };

    let data = match request(&home, &req) {
        Ok(data) => data,
        Err(DaemonError::DaemonNotRunning { socket }) => bail!(
            "daemon is not running (no socket at {}); start it with `permsync daemon start`",
            socket.display()
        ),
        Err(DaemonError::Remote { code, message }) => bail!("{message} ({code})"),
        Err(err) => return Err(err).with_context(|| format!("'{}' request failed", req.cmd)),
    };

    print_payload(&data)
}

fn print_payload(data: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(data).context("failed to render response JSON")?
    );
    Ok(())
}
