//! Distro builders.
//!
//! Each base distribution knows how to produce its base disk image and how to
//! hook a script into its boot sequence. The hook is delivered as an overlay
//! directory that the image pipeline copies onto `/`:
//!
//! ```text
//! <overlay>/marshal/run.sh     the workload script (or a no-op)
//! <overlay>/<distro hook>      S99run for buildroot, a systemd unit for fedora
//! ```
//!
//! Overlays only add or replace files, so "removing" a hook means installing
//! the no-op variant over it.

mod bare;
mod buildroot;
mod fedora;

pub use bare::Bare;
pub use buildroot::Buildroot;
pub use fedora::Fedora;

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::require_file;
use crate::workload::Distro;

/// In-image path of the script the boot hook runs.
pub const RUN_SCRIPT: &str = "marshal/run.sh";

/// Script body installed when no workload script is requested.
pub const NOOP_SCRIPT: &str = "#!/bin/sh\n# no workload script installed\nexit 0\n";

/// Per-distro build capability.
pub trait DistroBuilder: Send + Sync {
    fn distro(&self) -> Distro;

    /// Where the base image lands, or `None` for image-less distros.
    fn base_image(&self) -> Option<&Path>;

    /// Produce the base image at [`DistroBuilder::base_image`].
    fn build_base_image(&self) -> Result<()>;

    fn up_to_date(&self) -> bool;

    /// Write an overlay directory that runs `script` on every boot, or with
    /// `None` one that neutralizes any previously installed hook.
    fn generate_boot_script_overlay(&self, script: Option<&Path>) -> Result<PathBuf>;
}

impl fmt::Debug for dyn DistroBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DistroBuilder({})", self.distro())
    }
}

/// Builder for `distro`, with paths taken from the tool config.
pub fn builder_for(distro: Distro, config: &Config) -> Arc<dyn DistroBuilder> {
    match distro {
        Distro::Bare => Arc::new(Bare),
        Distro::Buildroot => Arc::new(Buildroot::new(config)),
        Distro::Fedora => Arc::new(Fedora::new(config)),
    }
}

/// Recreate `dir` empty and populate the shared part of a boot overlay.
///
/// Returns the overlay root; callers add their distro-specific hook.
pub(crate) fn prepare_boot_overlay(dir: &Path, script: Option<&Path>) -> Result<PathBuf> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to clear overlay {}", dir.display()))?;
    }
    fs::create_dir_all(dir)?;

    let body = match script {
        Some(path) => {
            require_file("Boot script", path)?;
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => NOOP_SCRIPT.as_bytes().to_vec(),
    };
    write_executable(&dir.join(RUN_SCRIPT), &body)?;

    Ok(dir.to_path_buf())
}

/// Write `contents` to `path` (creating parents) with mode 0755.
pub(crate) fn write_executable(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

/// Copy a freshly built base image out of a distro build tree.
pub(crate) fn install_base_image(built: &Path, dest: &Path) -> Result<()> {
    require_file("Built base image", built)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(built, dest).with_context(|| {
        format!("Failed to copy {} to {}", built.display(), dest.display())
    })?;
    Ok(())
}
