//! Graph executor.
//!
//! Runs the part of a [`BuildGraph`] needed for the requested targets, in
//! dependency order, skipping nodes that are up to date. Nodes run one at a
//! time; the first failure stops the run.

use anyhow::{Context, Result};
use std::collections::BTreeSet;

use crate::binary::BinaryBuilder;
use crate::cache;
use crate::config::Config;
use crate::error::MarshalError;
use crate::graph::{BuildGraph, BuildNode, NodeAction};
use crate::image;
use crate::launch::Emulator;
use crate::overlay::ImageMounter;
use crate::timing::Timer;

/// Everything a node action may touch.
#[derive(Clone, Copy)]
pub struct BuildEnv<'a> {
    pub config: &'a Config,
    pub mounter: &'a dyn ImageMounter,
    pub emulator: &'a dyn Emulator,
    pub binaries: &'a dyn BinaryBuilder,
}

/// Which nodes ran and which were current.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub built: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct Executor<'a> {
    env: BuildEnv<'a>,
}

impl<'a> Executor<'a> {
    pub fn new(env: BuildEnv<'a>) -> Self {
        Self { env }
    }

    /// Bring `targets` (node ids) and everything they depend on up to date.
    pub fn run(&self, graph: &BuildGraph, targets: &[String]) -> Result<RunReport> {
        let order = plan(graph, targets)?;
        tracing::debug!(nodes = order.len(), "execution plan ready");

        let mut report = RunReport::default();
        for node in order {
            if self.is_up_to_date(graph, node)? {
                println!("  [SKIP] {} {} (up to date)", node.kind, node.id);
                report.skipped.push(node.id.clone());
                continue;
            }

            println!("Building {} {}", node.kind, node.id);
            let timer = Timer::start(format!("{} {}", node.kind, node.id));
            self.execute(node)
                .with_context(|| format!("Failed to build {} {}", node.kind, node.id))?;
            self.record(node)?;
            timer.finish();
            report.built.push(node.id.clone());
        }
        Ok(report)
    }

    /// Whether `node` can be skipped.
    ///
    /// A path dependency that is missing and that no node produces can never
    /// be satisfied, so it is reported instead of treated as stale.
    pub fn is_up_to_date(&self, graph: &BuildGraph, node: &BuildNode) -> Result<bool> {
        if let Some(builder) = &node.uptodate {
            return Ok(builder.up_to_date());
        }

        for dep in node.dep_paths() {
            if !dep.exists() && graph.producer_of(dep).is_none() {
                return Err(MarshalError::missing(format!("Dependency of {}", node.id), dep).into());
            }
        }

        let Some(current) = cache::hash_file_deps(&node.file_deps) else {
            return Ok(false);
        };
        Ok(!cache::needs_rebuild(
            &current,
            &self.record_path(node),
            &node.targets,
        ))
    }

    fn execute(&self, node: &BuildNode) -> Result<()> {
        match &node.action {
            NodeAction::BaseImage(builder) => builder.build_base_image(),
            NodeAction::Binary { config, initramfs } => {
                self.env.binaries.build(&self.env, config, *initramfs)
            }
            NodeAction::Image(config) => image::make_image(&self.env, config),
        }
    }

    fn record(&self, node: &BuildNode) -> Result<()> {
        if node.uptodate.is_some() {
            return Ok(());
        }
        match cache::hash_file_deps(&node.file_deps) {
            Some(hash) => cache::write_cached_hash(&self.record_path(node), &hash),
            None => {
                let missing = node
                    .dep_paths()
                    .find(|p| !p.exists())
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                Err(MarshalError::config(format!(
                    "{} finished but its dependency {} is unreadable",
                    node.id, missing
                ))
                .into())
            }
        }
    }

    fn record_path(&self, node: &BuildNode) -> std::path::PathBuf {
        cache::hash_file_for(&self.env.config.node_state_dir(), &node.id)
    }
}

/// Nodes needed for `targets`, dependencies first.
///
/// A node depends on its task deps and on the producers of its path deps.
/// Unknown targets or task deps and dependency cycles are configuration
/// errors.
pub fn plan<'g>(graph: &'g BuildGraph, targets: &[String]) -> Result<Vec<&'g BuildNode>> {
    let mut order = Vec::new();
    let mut done = BTreeSet::new();
    let mut visiting = Vec::new();

    for target in targets {
        let node = graph
            .get(target)
            .ok_or_else(|| MarshalError::config(format!("no rule to build '{}'", target)))?;
        visit(graph, node, &mut visiting, &mut done, &mut order)?;
    }
    Ok(order)
}

fn visit<'g>(
    graph: &'g BuildGraph,
    node: &'g BuildNode,
    visiting: &mut Vec<&'g str>,
    done: &mut BTreeSet<&'g str>,
    order: &mut Vec<&'g BuildNode>,
) -> Result<()> {
    if done.contains(node.id.as_str()) {
        return Ok(());
    }
    if let Some(pos) = visiting.iter().position(|id| *id == node.id) {
        let mut cycle: Vec<&str> = visiting[pos..].to_vec();
        cycle.push(node.id.as_str());
        return Err(MarshalError::config(format!(
            "dependency cycle: {}",
            cycle.join(" -> ")
        ))
        .into());
    }

    visiting.push(node.id.as_str());
    for dep in dependencies(graph, node)? {
        visit(graph, dep, visiting, done, order)?;
    }
    visiting.pop();

    done.insert(node.id.as_str());
    order.push(node);
    Ok(())
}

fn dependencies<'g>(graph: &'g BuildGraph, node: &BuildNode) -> Result<Vec<&'g BuildNode>> {
    let mut ids = BTreeSet::new();
    for task in &node.task_deps {
        let dep = graph.get(task).ok_or_else(|| {
            MarshalError::config(format!(
                "no rule to build '{}', required by '{}'",
                task, node.id
            ))
        })?;
        ids.insert(dep.id.as_str());
    }
    for path in node.dep_paths() {
        if let Some(dep) = graph.producer_of(path) {
            ids.insert(dep.id.as_str());
        }
    }
    Ok(ids.into_iter().filter_map(|id| graph.get(id)).collect())
}
