//! Show command - displays information.

use anyhow::Result;

use super::{Target, Workspace};
use crate::executor::{BuildEnv, Executor};
use crate::graph::{BuildGraph, FileDep};

/// Show target for the show command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    /// Every node with its status and dependencies
    Graph,
    /// Tool configuration
    Config,
}

/// Execute the show command.
pub fn cmd_show(env: BuildEnv, what: ShowTarget, target: &Target) -> Result<()> {
    match what {
        ShowTarget::Config => env.config.print(),
        ShowTarget::Graph => {
            let workspace = Workspace::load(env.config, target)?;
            print_graph(&Executor::new(env), &workspace.graph);
        }
    }
    Ok(())
}

pub fn print_graph(executor: &Executor, graph: &BuildGraph) {
    println!("Build graph ({} nodes):", graph.len());
    for node in graph.nodes() {
        let status = match executor.is_up_to_date(graph, node) {
            Ok(true) => "ok",
            Ok(false) => "stale",
            Err(_) => "missing deps",
        };
        println!("  [{}] {} {}", status, node.kind, node.id);
        for task in &node.task_deps {
            println!("      after {}", task);
        }
        for dep in &node.file_deps {
            match dep {
                FileDep::Path(p) => println!("      file  {}", p.display()),
                FileDep::Config(digest) => {
                    println!("      config {}", &digest[..12.min(digest.len())])
                }
            }
        }
    }
}
