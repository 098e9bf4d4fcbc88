//! `permsync diff <instance>`: unified diff of what a synchronization would apply.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use permsync_core::config::load_config_at;
use permsync_core::types::InstanceId;
use permsync_sync::diff_instance_at;

/// Arguments for `permsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Instance id to diff.
    pub instance: String,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let config = load_config_at(&home).context("failed to load ~/.permsync/config.yaml")?;
        let instance = InstanceId::from(self.instance.as_str());

        let diff = diff_instance_at(&home, &instance, config.diff_context_lines)
            .with_context(|| format!("diff failed for '{instance}'"))?;

        let Some(diff) = diff else {
            println!("No differences for '{instance}'.");
            return Ok(());
        };

        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}
