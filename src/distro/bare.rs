use anyhow::Result;
use std::path::{Path, PathBuf};

use super::DistroBuilder;
use crate::error::MarshalError;
use crate::workload::Distro;

/// Bare-metal workloads: a prebuilt or kernel-only binary, no disk image.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bare;

impl DistroBuilder for Bare {
    fn distro(&self) -> Distro {
        Distro::Bare
    }

    fn base_image(&self) -> Option<&Path> {
        None
    }

    fn build_base_image(&self) -> Result<()> {
        Ok(())
    }

    fn up_to_date(&self) -> bool {
        true
    }

    fn generate_boot_script_overlay(&self, _script: Option<&Path>) -> Result<PathBuf> {
        Err(MarshalError::config(
            "bare workloads have no root filesystem to install a boot script into",
        )
        .into())
    }
}
