//! Tool configuration for marshal.
//!
//! Reads settings from a `.env` file in the project root and from the process
//! environment. Environment variables take precedence over `.env`.
//!
//! | Variable           | Default                        |
//! |--------------------|--------------------------------|
//! | `MARSHAL_ROOT`     | current directory              |
//! | `MARSHAL_WORKLOADS`| `<root>/workloads`             |
//! | `MARSHAL_IMAGES`   | `<root>/images`                |
//! | `MARSHAL_STATE`    | `<root>/.marshal`              |
//! | `MARSHAL_MNT`      | `<root>/disk-mount`            |
//! | `LINUX_SOURCE`     | `<root>/riscv-linux`           |
//! | `RISCV_PK_SOURCE`  | `<root>/riscv-pk`              |
//! | `BUILDROOT_SOURCE` | `<root>/wlutil/br/buildroot`   |
//! | `FEDORA_SOURCE`    | `<root>/wlutil/fedora`         |
//! | `MARSHAL_JOBS`     | available parallelism          |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::workload::Distro;

#[derive(Debug, Clone)]
pub struct Config {
    /// Project root; relative paths below resolve against it.
    pub root: PathBuf,
    /// Directory scanned for workload JSON files.
    pub workload_dir: PathBuf,
    /// Where binaries and disk images are written.
    pub images_dir: PathBuf,
    /// Executor hash files, generated overlays and run scripts.
    pub state_dir: PathBuf,
    /// The single mount point used for image mutation.
    pub mount_point: PathBuf,
    pub linux_source: PathBuf,
    pub pk_source: PathBuf,
    pub buildroot_source: PathBuf,
    pub fedora_source: PathBuf,
    /// Parallel jobs passed to `make`.
    pub jobs: usize,
}

impl Config {
    /// Defaults rooted at `root`, ignoring the environment.
    pub fn with_root(root: &Path) -> Self {
        Self::from_vars(root, &HashMap::new())
    }

    /// Load configuration from `<root>/.env` and the environment.
    pub fn load(root: &Path) -> Self {
        let mut vars = HashMap::new();

        let env_path = root.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                vars.insert(key, value);
                            }
                            Err(e) => tracing::warn!(
                                "skipping malformed line in {}: {}",
                                env_path.display(),
                                e
                            ),
                        }
                    }
                }
                Err(e) => tracing::warn!("failed to read {}: {}", env_path.display(), e),
            }
        }

        vars.extend(std::env::vars());

        let root = vars
            .get("MARSHAL_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| root.to_path_buf());
        Self::from_vars(&root, &vars)
    }

    fn from_vars(root: &Path, vars: &HashMap<String, String>) -> Self {
        let path = |key: &str, default: &str| -> PathBuf {
            match vars.get(key) {
                Some(v) => {
                    let p = PathBuf::from(v);
                    if p.is_absolute() {
                        p
                    } else {
                        root.join(p)
                    }
                }
                None => root.join(default),
            }
        };

        let jobs = vars
            .get("MARSHAL_JOBS")
            .and_then(|j| j.parse().ok())
            .filter(|&j: &usize| j > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            });

        Self {
            root: root.to_path_buf(),
            workload_dir: path("MARSHAL_WORKLOADS", "workloads"),
            images_dir: path("MARSHAL_IMAGES", "images"),
            state_dir: path("MARSHAL_STATE", ".marshal"),
            mount_point: path("MARSHAL_MNT", "disk-mount"),
            linux_source: path("LINUX_SOURCE", "riscv-linux"),
            pk_source: path("RISCV_PK_SOURCE", "riscv-pk"),
            buildroot_source: path("BUILDROOT_SOURCE", "wlutil/br/buildroot"),
            fedora_source: path("FEDORA_SOURCE", "wlutil/fedora"),
            jobs,
        }
    }

    /// Kernel config shipped for a distro's base workload.
    pub fn default_linux_config(&self, distro: Distro) -> Option<PathBuf> {
        match distro {
            Distro::Bare => None,
            other => Some(
                self.root
                    .join("wlutil")
                    .join(other.as_str())
                    .join("linux-config"),
            ),
        }
    }

    /// Directory for executor hash files.
    pub fn node_state_dir(&self) -> PathBuf {
        self.state_dir.join("nodes")
    }

    /// Directory for generated boot-script overlays.
    pub fn overlay_dir(&self) -> PathBuf {
        self.state_dir.join("overlays")
    }

    /// Directory for wrapper scripts generated from inline run commands.
    pub fn script_dir(&self) -> PathBuf {
        self.state_dir.join("scripts")
    }

    pub fn has_linux_source(&self) -> bool {
        self.linux_source.join("Makefile").exists()
    }

    pub fn print(&self) {
        println!("Configuration:");
        println!("  MARSHAL_ROOT:      {}", self.root.display());
        println!("  MARSHAL_WORKLOADS: {}", self.workload_dir.display());
        println!("  MARSHAL_IMAGES:    {}", self.images_dir.display());
        println!("  MARSHAL_STATE:     {}", self.state_dir.display());
        println!("  MARSHAL_MNT:       {}", self.mount_point.display());
        println!("  LINUX_SOURCE:      {}", self.linux_source.display());
        println!("  RISCV_PK_SOURCE:   {}", self.pk_source.display());
        println!("  BUILDROOT_SOURCE:  {}", self.buildroot_source.display());
        println!("  FEDORA_SOURCE:     {}", self.fedora_source.display());
        println!("  MARSHAL_JOBS:      {}", self.jobs);
        if self.has_linux_source() {
            println!("  Linux source: FOUND");
        } else {
            println!("  Linux source: NOT FOUND");
        }
    }
}
