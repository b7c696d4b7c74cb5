//! CLI command handlers.
//!
//! Each submodule handles one CLI command:
//! - `build` - build a workload and its jobs
//! - `launch` - boot a workload or job under QEMU or spike
//! - `show` - print the build graph or the tool configuration
//! - `clean` - remove a workload's outputs

pub mod build;
pub mod clean;
pub mod launch;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use launch::cmd_launch;
pub use show::cmd_show;

use anyhow::Result;
use std::path::PathBuf;

use crate::config::Config;
use crate::graph::{build_graph, BuildGraph};
use crate::workload::{load_workloads, WorkloadConfig, WorkloadSet};

/// The workload a command acts on.
#[derive(Debug, Clone)]
pub struct Target {
    /// Workload JSON file, absolute or relative to the workload directory.
    pub cfg_file: PathBuf,
    /// Short job name; `None` means every job (build, clean) or the parent
    /// workload itself (launch).
    pub job: Option<String>,
    pub initramfs: bool,
}

/// Loaded workloads plus the graph built from them.
pub struct Workspace {
    pub set: WorkloadSet,
    pub graph: BuildGraph,
}

impl Workspace {
    /// Load every workload, apply `--initramfs` to the target, build the graph.
    pub fn load(config: &Config, target: &Target) -> Result<Self> {
        let mut set = load_workloads(config, &config.workload_dir)?;
        if target.initramfs {
            set.force_initramfs(&target.cfg_file, &config.workload_dir)?;
        }
        let graph = build_graph(&set);
        tracing::debug!(nodes = graph.len(), "build graph ready");
        Ok(Self { set, graph })
    }

    pub fn workload(&self, config: &Config, target: &Target) -> Result<&WorkloadConfig> {
        self.set.get(&target.cfg_file, &config.workload_dir)
    }

    /// The target workload followed by the requested jobs.
    pub fn selected(&self, config: &Config, target: &Target) -> Result<Vec<&WorkloadConfig>> {
        let workload = self.workload(config, target)?;
        let mut selected = vec![workload];
        match &target.job {
            Some(job) => selected.push(workload.job(job)?),
            None => selected.extend(workload.jobs.values()),
        }
        Ok(selected)
    }
}
