//! Build dependency graph.
//!
//! [`build_graph`] turns every resolved descriptor into [`BuildNode`]s. The
//! graph is built once per invocation and does not depend on which target was
//! requested; the executor picks the subset it needs.
//!
//! ```text
//! distro base image ──► image ──► initramfs binary
//!                         ▲
//!        binary ──────────┘ (only when the image has an init script)
//! ```
//!
//! Node ids equal their primary output path, so a node that consumes another
//! node's output names it as a task dependency with the same string.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::distro::DistroBuilder;
use crate::workload::{WorkloadConfig, WorkloadSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKind {
    BaseImage,
    Binary,
    InitramfsBinary,
    Image,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::BaseImage => "base image",
            NodeKind::Binary => "binary",
            NodeKind::InitramfsBinary => "initramfs binary",
            NodeKind::Image => "image",
        })
    }
}

/// A file-level input of a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileDep {
    Path(PathBuf),
    /// Digest of a resolved workload descriptor.
    Config(String),
}

/// What running a node does.
#[derive(Clone)]
pub enum NodeAction {
    BaseImage(Arc<dyn DistroBuilder>),
    Binary {
        config: Arc<WorkloadConfig>,
        initramfs: bool,
    },
    Image(Arc<WorkloadConfig>),
}

impl fmt::Debug for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAction::BaseImage(b) => write!(f, "BaseImage({})", b.distro()),
            NodeAction::Binary { config, initramfs } => {
                write!(f, "Binary({}, initramfs={})", config.name, initramfs)
            }
            NodeAction::Image(config) => write!(f, "Image({})", config.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildNode {
    pub id: String,
    pub kind: NodeKind,
    pub targets: Vec<PathBuf>,
    pub file_deps: BTreeSet<FileDep>,
    pub task_deps: BTreeSet<String>,
    pub action: NodeAction,
    /// Delegated up-to-date check; `None` means hash-based.
    pub uptodate: Option<Arc<dyn DistroBuilder>>,
}

impl BuildNode {
    pub fn new(kind: NodeKind, target: &Path, action: NodeAction) -> Self {
        Self {
            id: node_id(target),
            kind,
            targets: vec![target.to_path_buf()],
            file_deps: BTreeSet::new(),
            task_deps: BTreeSet::new(),
            action,
            uptodate: None,
        }
    }

    /// Path-valued file deps.
    pub fn dep_paths(&self) -> impl Iterator<Item = &Path> {
        self.file_deps.iter().filter_map(|d| match d {
            FileDep::Path(p) => Some(p.as_path()),
            FileDep::Config(_) => None,
        })
    }
}

/// Node id for an output path.
pub fn node_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Immutable set of build nodes keyed by id.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    nodes: BTreeMap<String, BuildNode>,
}

impl BuildGraph {
    /// Graph over `nodes`. Later nodes with an id already present are dropped.
    pub fn from_nodes(nodes: impl IntoIterator<Item = BuildNode>) -> Self {
        let mut graph = Self::default();
        for node in nodes {
            graph.insert(node);
        }
        graph
    }

    pub fn get(&self, id: &str) -> Option<&BuildNode> {
        self.nodes.get(id)
    }

    /// Node producing `path`, if any.
    pub fn producer_of(&self, path: &Path) -> Option<&BuildNode> {
        self.nodes.get(&node_id(path))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BuildNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.values().filter(|n| n.kind == kind).count()
    }

    fn insert(&mut self, node: BuildNode) {
        if let Some(existing) = self.nodes.get(&node.id) {
            tracing::warn!(
                "{} and {} both produce {}; keeping the first",
                existing.kind,
                node.kind,
                node.id
            );
            return;
        }
        self.nodes.insert(node.id.clone(), node);
    }
}

/// Build the complete graph for every distro, workload and job in `set`.
pub fn build_graph(set: &WorkloadSet) -> BuildGraph {
    let mut graph = BuildGraph::default();

    for distro in &set.distros {
        if let Some(img) = &distro.img {
            let mut node = BuildNode::new(
                NodeKind::BaseImage,
                img,
                NodeAction::BaseImage(distro.builder.clone()),
            );
            node.uptodate = Some(distro.builder.clone());
            graph.insert(node);
        }
    }

    for config in set.workloads_and_jobs() {
        for node in workload_nodes(config) {
            graph.insert(node);
        }
    }

    graph
}

/// Nodes contributed by one workload or job.
///
/// A workload without an image that cannot build a binary contributes none.
pub fn workload_nodes(config: &WorkloadConfig) -> Vec<BuildNode> {
    let mut nodes = Vec::new();
    let shared = Arc::new(WorkloadConfig {
        jobs: BTreeMap::new(),
        ..config.clone()
    });

    if config.can_build_binary() {
        let mut bin = BuildNode::new(
            NodeKind::Binary,
            &config.bin,
            NodeAction::Binary {
                config: shared.clone(),
                initramfs: false,
            },
        );
        if let Some(kcfg) = &config.linux_config {
            bin.file_deps.insert(FileDep::Path(kcfg.clone()));
        }
        nodes.push(bin);
    }

    let Some(img) = &config.img else {
        return nodes;
    };

    // The initramfs payload is embedded in the binary, so this binary
    // depends on the image rather than the other way round.
    if config.initramfs {
        let mut initramfs = BuildNode::new(
            NodeKind::InitramfsBinary,
            &config.initramfs_bin(),
            NodeAction::Binary {
                config: shared.clone(),
                initramfs: true,
            },
        );
        initramfs.file_deps.insert(FileDep::Path(img.clone()));
        if let Some(kcfg) = &config.linux_config {
            initramfs.file_deps.insert(FileDep::Path(kcfg.clone()));
        }
        initramfs.task_deps.insert(node_id(img));
        nodes.push(initramfs);
    }

    let mut image = BuildNode::new(NodeKind::Image, img, NodeAction::Image(shared.clone()));
    if let Some(base) = &config.base_img {
        image.file_deps.insert(FileDep::Path(base.clone()));
        image.task_deps.insert(node_id(base));
    }
    for spec in &config.files {
        for file in overlay_source_files(&spec.src) {
            image.file_deps.insert(FileDep::Path(file));
        }
    }
    if let Some(init) = &config.init {
        image.file_deps.insert(FileDep::Path(init.clone()));
        image.task_deps.insert(node_id(&config.bin));
    }
    if let Some(script) = config.run.as_ref().and_then(|r| r.script()) {
        image.file_deps.insert(FileDep::Path(script.to_path_buf()));
    }
    image.file_deps.insert(FileDep::Config(shared.digest()));
    nodes.push(image);

    nodes
}

/// Files an overlay source contributes as dependencies.
///
/// Globs are tracked at their root: the longest leading part of the path
/// without glob characters, expanded like a directory.
pub fn overlay_source_files(src: &Path) -> Vec<PathBuf> {
    let root = glob_root(src);
    if root.is_dir() {
        let mut files: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::warn!("skipping unreadable overlay entry: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    } else {
        vec![root]
    }
}

/// Leading part of `path` before the first component containing a glob
/// metacharacter.
pub fn glob_root(path: &Path) -> PathBuf {
    let mut root = PathBuf::new();
    for component in path.components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().contains(['*', '?', '[']) {
                break;
            }
        }
        root.push(component);
    }
    root
}
