//! Resolved workload descriptors.
//!
//! A [`WorkloadConfig`] is the fully-resolved description of one buildable
//! unit: a distro base, a workload loaded from JSON, or a job nested under a
//! workload. Descriptors are produced once by [`loader`] and then only read.
//! The single exception is the `--initramfs` flag, applied with
//! [`WorkloadSet::force_initramfs`] before the graph is built.

pub mod loader;

pub use loader::load_workloads;

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::distro::DistroBuilder;
use crate::error::MarshalError;

/// Base distribution a workload derives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    /// No root filesystem; binary only.
    Bare,
    Buildroot,
    Fedora,
}

impl Distro {
    pub const ALL: [Distro; 3] = [Distro::Bare, Distro::Buildroot, Distro::Fedora];

    /// Name used in workload files (`"base": "br"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Distro::Bare => "bare",
            Distro::Buildroot => "br",
            Distro::Fedora => "fedora",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file overlay entry: copy `src` to the absolute image path `dst`.
///
/// `src` may name a file, a directory (copied recursively) or a shell glob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSpec {
    pub src: PathBuf,
    pub dst: PathBuf,
}

impl FileSpec {
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// What to run on every boot of the delivered image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunSpec {
    /// Inline shell command, wrapped in a generated script at build time.
    Command(String),
    /// Script file installed as-is.
    Script(PathBuf),
}

impl RunSpec {
    /// Script path when `run` names a file. Only these are file deps.
    pub fn script(&self) -> Option<&Path> {
        match self {
            RunSpec::Script(p) => Some(p),
            RunSpec::Command(_) => None,
        }
    }
}

#[derive(Clone, Serialize)]
pub struct WorkloadConfig {
    /// Unique name; jobs are `<parent>-<job>`.
    pub name: String,
    pub bin: PathBuf,
    pub img: Option<PathBuf>,
    /// Image `img` is seeded from.
    pub base_img: Option<PathBuf>,
    pub linux_config: Option<PathBuf>,
    /// Only selects the binary variant; left out of the digest.
    #[serde(skip)]
    pub initramfs: bool,
    pub distro: Distro,
    pub files: Vec<FileSpec>,
    pub host_init: Option<PathBuf>,
    pub init: Option<PathBuf>,
    pub run: Option<RunSpec>,
    pub jobs: BTreeMap<String, WorkloadConfig>,
    pub workdir: PathBuf,
    pub cfg_file: Option<PathBuf>,
    #[serde(skip)]
    pub builder: Arc<dyn DistroBuilder>,
}

impl fmt::Debug for WorkloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadConfig")
            .field("name", &self.name)
            .field("distro", &self.distro)
            .field("bin", &self.bin)
            .field("img", &self.img)
            .field("base_img", &self.base_img)
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl WorkloadConfig {
    /// Whether a binary node can exist for this workload: it either has a
    /// kernel config, or it is bare and the binary is prebuilt.
    pub fn can_build_binary(&self) -> bool {
        self.linux_config.is_some() || self.distro == Distro::Bare
    }

    /// Path of the initramfs variant of the binary.
    pub fn initramfs_bin(&self) -> PathBuf {
        let mut s = self.bin.clone().into_os_string();
        s.push("-initramfs");
        PathBuf::from(s)
    }

    /// Binary path for the requested variant.
    pub fn bin_path(&self, initramfs: bool) -> PathBuf {
        if initramfs {
            self.initramfs_bin()
        } else {
            self.bin.clone()
        }
    }

    /// SHA-256 over the serialized descriptor.
    ///
    /// Used as the config-identity dependency of image nodes: any change to
    /// a resolved field changes the digest and forces a rebuild. The
    /// `initramfs` flag is not part of it, since it never changes the image.
    pub fn digest(&self) -> String {
        // Serializing plain data into a Vec cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }

    /// Look up a job by its short name.
    pub fn job(&self, short_name: &str) -> Result<&WorkloadConfig> {
        if self.jobs.is_empty() {
            return Err(MarshalError::config(format!(
                "job '{}' requested, but workload '{}' defines no jobs",
                short_name, self.name
            ))
            .into());
        }
        self.jobs.get(short_name).ok_or_else(|| {
            MarshalError::config(format!(
                "workload '{}' has no job named '{}' (known: {})",
                self.name,
                short_name,
                self.jobs.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
            .into()
        })
    }
}

/// Every resolved descriptor for one invocation.
#[derive(Debug, Clone, Default)]
pub struct WorkloadSet {
    /// Distro base descriptors (leaf images).
    pub distros: Vec<WorkloadConfig>,
    /// Workloads keyed by the absolute path of their JSON file.
    pub workloads: BTreeMap<PathBuf, WorkloadConfig>,
}

impl WorkloadSet {
    /// Find a workload by config file. Relative names resolve against
    /// `workload_dir` when they don't exist relative to the cwd.
    pub fn get(&self, cfg_file: &Path, workload_dir: &Path) -> Result<&WorkloadConfig> {
        let key = self.resolve_key(cfg_file, workload_dir);
        self.workloads.get(&key).ok_or_else(|| {
            MarshalError::config(format!(
                "no workload loaded from {} (looked in {})",
                cfg_file.display(),
                workload_dir.display()
            ))
            .into()
        })
    }

    fn resolve_key(&self, cfg_file: &Path, workload_dir: &Path) -> PathBuf {
        let candidates = [
            cfg_file.to_path_buf(),
            std::env::current_dir()
                .map(|d| d.join(cfg_file))
                .unwrap_or_default(),
            workload_dir.join(cfg_file),
        ];
        candidates
            .into_iter()
            .find(|c| self.workloads.contains_key(c))
            .unwrap_or_else(|| cfg_file.to_path_buf())
    }

    /// Apply `--initramfs` to the target workload and all its jobs.
    pub fn force_initramfs(&mut self, cfg_file: &Path, workload_dir: &Path) -> Result<()> {
        let key = self.resolve_key(cfg_file, workload_dir);
        let target = self.workloads.get_mut(&key).ok_or_else(|| {
            MarshalError::config(format!("no workload loaded from {}", cfg_file.display()))
        })?;
        target.initramfs = true;
        for job in target.jobs.values_mut() {
            job.initramfs = true;
        }
        Ok(())
    }

    /// Every workload and every job, flattened (distros excluded).
    pub fn workloads_and_jobs(&self) -> impl Iterator<Item = &WorkloadConfig> {
        self.workloads
            .values()
            .flat_map(|w| std::iter::once(w).chain(w.jobs.values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::Bare;

    fn bare(name: &str) -> WorkloadConfig {
        WorkloadConfig {
            name: name.to_string(),
            bin: PathBuf::from(format!("/images/{}-bin", name)),
            img: None,
            base_img: None,
            linux_config: None,
            initramfs: false,
            distro: Distro::Bare,
            files: Vec::new(),
            host_init: None,
            init: None,
            run: None,
            jobs: BTreeMap::new(),
            workdir: PathBuf::from("/workloads"),
            cfg_file: None,
            builder: Arc::new(Bare),
        }
    }

    #[test]
    fn test_distro_names() {
        assert_eq!(Distro::from_name("br"), Some(Distro::Buildroot));
        assert_eq!(Distro::from_name("fedora"), Some(Distro::Fedora));
        assert_eq!(Distro::from_name("bare"), Some(Distro::Bare));
        assert_eq!(Distro::from_name("ubuntu"), None);
    }

    #[test]
    fn test_initramfs_bin_suffix() {
        let w = bare("hello");
        assert_eq!(w.initramfs_bin(), PathBuf::from("/images/hello-bin-initramfs"));
        assert_eq!(w.bin_path(false), PathBuf::from("/images/hello-bin"));
    }

    #[test]
    fn test_digest_tracks_fields() {
        let a = bare("hello");
        let mut b = bare("hello");
        assert_eq!(a.digest(), b.digest());
        b.run = Some(RunSpec::Command("echo hi".into()));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_ignores_initramfs_flag() {
        let a = bare("hello");
        let mut b = bare("hello");
        b.initramfs = true;
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_job_lookup_without_jobs() {
        let w = bare("hello");
        let err = w.job("one").unwrap_err();
        assert!(err.to_string().contains("defines no jobs"));
    }
}
