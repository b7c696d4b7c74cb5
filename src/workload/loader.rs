//! Workload file loading and resolution.
//!
//! Every `*.json` in the workload directory is one workload. A workload names
//! its `base`: a distro (`bare`, `br`, `fedora`) or another workload file.
//! Resolution walks the base chain, so a child inherits its parent's distro,
//! builder and kernel config, and is seeded from its parent's image.
//!
//! ```json
//! {
//!   "name": "net-test",
//!   "base": "br-base.json",
//!   "files": [["config", "/etc/net"]],
//!   "init": "setup.sh",
//!   "command": "/usr/bin/run-tests",
//!   "jobs": [{ "name": "client" }, { "name": "server", "run": "server.sh" }]
//! }
//! ```
//!
//! Relative paths resolve against the workload's directory,
//! `<json dir>/<name>`. Jobs resolve against their parent's directory and are
//! renamed `<parent>-<job>`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::{Distro, FileSpec, RunSpec, WorkloadConfig, WorkloadSet};
use crate::config::Config;
use crate::distro::builder_for;
use crate::error::MarshalError;

/// On-disk workload description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawWorkload {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub linux_config: Option<PathBuf>,
    #[serde(default)]
    pub host_init: Option<PathBuf>,
    /// Copied to `/` before `files`.
    #[serde(default)]
    pub overlay: Option<PathBuf>,
    #[serde(default)]
    pub files: Vec<(PathBuf, PathBuf)>,
    #[serde(default)]
    pub init: Option<PathBuf>,
    #[serde(default)]
    pub run: Option<PathBuf>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub initramfs: bool,
    #[serde(default)]
    pub jobs: Vec<RawWorkload>,
}

impl RawWorkload {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read workload {}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| {
            MarshalError::config(format!("invalid workload {}: {}", path.display(), e)).into()
        })
    }
}

/// Load and resolve every workload in `workload_dir`.
pub fn load_workloads(config: &Config, workload_dir: &Path) -> Result<WorkloadSet> {
    let distros: Vec<WorkloadConfig> = Distro::ALL
        .into_iter()
        .map(|d| distro_config(config, d))
        .collect();

    let mut raw = BTreeMap::new();
    if workload_dir.exists() {
        let mut entries: Vec<PathBuf> = fs::read_dir(workload_dir)
            .with_context(|| format!("Failed to list {}", workload_dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json") && p.is_file())
            .collect();
        entries.sort();
        for path in entries {
            let parsed = RawWorkload::from_file(&path)?;
            raw.insert(path, parsed);
        }
    } else {
        tracing::warn!("workload directory {} does not exist", workload_dir.display());
    }

    let mut resolver = Resolver {
        config,
        workload_dir,
        raw: &raw,
        distros: distros
            .iter()
            .map(|d| (d.distro.as_str().to_string(), d.clone()))
            .collect(),
        resolved: BTreeMap::new(),
        in_progress: HashSet::new(),
    };
    for path in raw.keys() {
        resolver.resolve(path)?;
    }

    let set = WorkloadSet {
        distros,
        workloads: resolver.resolved,
    };
    check_unique_names(&set)?;

    tracing::debug!(
        workloads = set.workloads.len(),
        dir = %workload_dir.display(),
        "loaded workloads"
    );
    Ok(set)
}

/// Synthesized descriptor for a distro base.
pub fn distro_config(config: &Config, distro: Distro) -> WorkloadConfig {
    let builder = builder_for(distro, config);
    WorkloadConfig {
        name: distro.as_str().to_string(),
        bin: config.images_dir.join(format!("{}-bin", distro.as_str())),
        img: builder.base_image().map(Path::to_path_buf),
        base_img: None,
        linux_config: config.default_linux_config(distro),
        initramfs: false,
        distro,
        files: Vec::new(),
        host_init: None,
        init: None,
        run: None,
        jobs: BTreeMap::new(),
        workdir: config.root.clone(),
        cfg_file: None,
        builder,
    }
}

struct Resolver<'a> {
    config: &'a Config,
    workload_dir: &'a Path,
    raw: &'a BTreeMap<PathBuf, RawWorkload>,
    distros: HashMap<String, WorkloadConfig>,
    resolved: BTreeMap<PathBuf, WorkloadConfig>,
    in_progress: HashSet<PathBuf>,
}

impl Resolver<'_> {
    fn resolve(&mut self, path: &Path) -> Result<WorkloadConfig> {
        if let Some(done) = self.resolved.get(path) {
            return Ok(done.clone());
        }
        if !self.in_progress.insert(path.to_path_buf()) {
            return Err(MarshalError::config(format!(
                "workload {} inherits from itself",
                path.display()
            ))
            .into());
        }

        let raws = self.raw;
        let raw = &raws[path];
        let base = raw.base.as_deref().ok_or_else(|| {
            MarshalError::config(format!("workload {} has no 'base'", path.display()))
        })?;

        let parent = match self.distros.get(base).cloned() {
            Some(d) => d,
            None => {
                let base_path = self.workload_dir.join(base);
                if !raws.contains_key(&base_path) {
                    return Err(MarshalError::config(format!(
                        "workload {} has unknown base '{}'",
                        path.display(),
                        base
                    ))
                    .into());
                }
                self.resolve(&base_path)?
            }
        };

        let json_dir = path.parent().unwrap_or(self.workload_dir);
        let workdir = json_dir.join(&raw.name);
        let mut resolved = inherit(self.config, &parent, raw, &raw.name, &workdir)?;
        resolved.cfg_file = Some(path.to_path_buf());

        for job in &raw.jobs {
            let job_name = format!("{}-{}", raw.name, job.name);
            let mut job_cfg = inherit(self.config, &resolved, job, &job_name, &resolved.workdir)?;
            job_cfg.cfg_file = Some(path.to_path_buf());
            if resolved.jobs.insert(job.name.clone(), job_cfg).is_some() {
                return Err(MarshalError::config(format!(
                    "workload '{}' defines job '{}' twice",
                    raw.name, job.name
                ))
                .into());
            }
        }

        self.in_progress.remove(path);
        self.resolved.insert(path.to_path_buf(), resolved.clone());
        Ok(resolved)
    }
}

/// Build the descriptor for `raw` deriving from `parent`.
fn inherit(
    config: &Config,
    parent: &WorkloadConfig,
    raw: &RawWorkload,
    name: &str,
    workdir: &Path,
) -> Result<WorkloadConfig> {
    let resolve = |p: &Path| -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            workdir.join(p)
        }
    };

    let img = parent
        .img
        .as_ref()
        .map(|_| config.images_dir.join(format!("{}.img", name)));

    let mut files = Vec::new();
    if let Some(overlay) = &raw.overlay {
        files.push(FileSpec::new(resolve(overlay).join("*"), "/"));
    }
    for (src, dst) in &raw.files {
        if !dst.is_absolute() {
            return Err(MarshalError::config(format!(
                "workload '{}': file destination {} must be absolute",
                name,
                dst.display()
            ))
            .into());
        }
        files.push(FileSpec::new(resolve(src), dst.clone()));
    }
    let has_image_settings = !files.is_empty()
        || raw.init.is_some()
        || raw.run.is_some()
        || raw.command.is_some();
    if img.is_none() && has_image_settings {
        tracing::warn!(
            "workload '{}' has no disk image; files, init and run settings are ignored",
            name
        );
    }

    let run = match (&raw.run, &raw.command) {
        (Some(_), Some(_)) => {
            return Err(MarshalError::config(format!(
                "workload '{}' sets both 'run' and 'command'; pick one",
                name
            ))
            .into())
        }
        (Some(script), None) => Some(RunSpec::Script(resolve(script))),
        (None, Some(cmd)) => Some(RunSpec::Command(cmd.clone())),
        (None, None) => None,
    };

    Ok(WorkloadConfig {
        name: name.to_string(),
        bin: config.images_dir.join(format!("{}-bin", name)),
        base_img: parent.img.clone(),
        img,
        linux_config: raw
            .linux_config
            .as_deref()
            .map(resolve)
            .or_else(|| parent.linux_config.clone()),
        initramfs: raw.initramfs,
        distro: parent.distro,
        files,
        host_init: raw.host_init.as_deref().map(resolve),
        init: raw.init.as_deref().map(resolve),
        run,
        jobs: BTreeMap::new(),
        workdir: workdir.to_path_buf(),
        cfg_file: None,
        builder: parent.builder.clone(),
    })
}

fn check_unique_names(set: &WorkloadSet) -> Result<()> {
    let mut seen: HashMap<&str, String> = HashMap::new();
    let all = set
        .distros
        .iter()
        .map(|d| (d, "distro".to_string()))
        .chain(set.workloads_and_jobs().map(|w| {
            let origin = w
                .cfg_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            (w, origin)
        }));

    for (w, origin) in all {
        if let Some(first) = seen.insert(w.name.as_str(), origin.clone()) {
            return Err(MarshalError::config(format!(
                "workload name '{}' is defined by both {} and {}",
                w.name, first, origin
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_workload_parses_kebab_case() {
        let raw: RawWorkload = serde_json::from_str(
            r#"{
                "name": "w",
                "base": "br",
                "linux-config": "kcfg",
                "host-init": "prep.sh",
                "files": [["a", "/etc/a"]],
                "jobs": [{"name": "j", "command": "echo hi"}]
            }"#,
        )
        .unwrap();
        assert_eq!(raw.linux_config, Some(PathBuf::from("kcfg")));
        assert_eq!(raw.host_init, Some(PathBuf::from("prep.sh")));
        assert_eq!(raw.files, vec![(PathBuf::from("a"), PathBuf::from("/etc/a"))]);
        assert_eq!(raw.jobs[0].command.as_deref(), Some("echo hi"));
        assert!(raw.jobs[0].base.is_none());
    }

    #[test]
    fn test_distro_config_bare_has_no_image() {
        let cfg = Config::with_root(Path::new("/work"));
        let bare = distro_config(&cfg, Distro::Bare);
        assert!(bare.img.is_none());
        assert!(bare.linux_config.is_none());

        let br = distro_config(&cfg, Distro::Buildroot);
        assert_eq!(br.img, Some(PathBuf::from("/work/images/br-base.img")));
    }
}
