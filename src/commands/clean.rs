//! Clean command - removes a workload's build outputs.
//!
//! With `-j` only that job's outputs go. Distro base images are shared
//! between workloads and are never removed.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::{Target, Workspace};
use crate::cache;
use crate::config::Config;
use crate::graph::node_id;

/// Execute the clean command. Returns the number of files removed.
pub fn cmd_clean(config: &Config, target: &Target) -> Result<usize> {
    let workspace = Workspace::load(config, target)?;
    let state = config.node_state_dir();

    let workload = workspace.workload(config, target)?;
    let selected = match &target.job {
        Some(job) => vec![workload.job(job)?],
        None => workspace.selected(config, target)?,
    };

    let mut removed = 0;
    for workload in selected {
        let outputs = [
            Some(workload.bin.clone()),
            Some(workload.initramfs_bin()),
            workload.img.clone(),
        ];
        for output in outputs.into_iter().flatten() {
            removed += remove_if_exists(&output)? as usize;
            removed += remove_if_exists(&cache::hash_file_for(&state, &node_id(&output)))? as usize;
        }
    }

    println!("Removed {} file(s)", removed);
    Ok(removed)
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    println!("  Removing {}", path.display());
    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(true)
}
