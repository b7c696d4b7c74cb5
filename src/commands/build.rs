//! Build command - builds a workload and its jobs.

use anyhow::Result;

use super::{Target, Workspace};
use crate::error::MarshalError;
use crate::executor::{BuildEnv, Executor, RunReport};
use crate::graph::{node_id, BuildGraph};
use crate::timing::Timer;
use crate::workload::WorkloadConfig;

/// Execute the build command.
pub fn cmd_build(env: BuildEnv, target: &Target) -> Result<RunReport> {
    let workspace = Workspace::load(env.config, target)?;
    let selected = workspace.selected(env.config, target)?;

    let mut ids = Vec::new();
    for config in &selected {
        ids.extend(build_targets(&workspace.graph, config)?);
    }

    let timer = Timer::start("Total build");
    let report = Executor::new(env).run(&workspace.graph, &ids)?;
    timer.finish();

    println!(
        "\n{} built, {} up to date",
        report.built.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Node ids to request for one workload: binaries first, then the image.
pub fn build_targets(graph: &BuildGraph, config: &WorkloadConfig) -> Result<Vec<String>> {
    let mut ids = Vec::new();

    let bin = node_id(&config.bin);
    if graph.get(&bin).is_none() {
        return Err(MarshalError::config(format!(
            "workload '{}' cannot build a binary: it needs a linux-config or a 'bare' base",
            config.name
        ))
        .into());
    }
    ids.push(bin);

    if config.initramfs {
        let initramfs = node_id(&config.initramfs_bin());
        if graph.get(&initramfs).is_none() {
            return Err(MarshalError::config(format!(
                "initramfs requested for '{}', which has no image",
                config.name
            ))
            .into());
        }
        ids.push(initramfs);
    }

    if let Some(img) = &config.img {
        ids.push(node_id(img));
    }
    Ok(ids)
}
