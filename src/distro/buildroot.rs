//! Buildroot base distro.
//!
//! The base image is buildroot's `rootfs.ext2`. Boot scripts hook in through
//! a SysV init script, `S99run`, which buildroot's `rcS` starts last.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::{install_base_image, prepare_boot_overlay, write_executable, DistroBuilder, RUN_SCRIPT};
use crate::config::Config;
use crate::process::Cmd;
use crate::workload::Distro;

/// In-image path of the init hook.
pub const HOOK_PATH: &str = "etc/init.d/S99run";

#[derive(Debug, Clone)]
pub struct Buildroot {
    source: PathBuf,
    image: PathBuf,
    overlay_dir: PathBuf,
    jobs: usize,
}

impl Buildroot {
    pub fn new(config: &Config) -> Self {
        Self {
            source: config.buildroot_source.clone(),
            image: config.images_dir.join("br-base.img"),
            overlay_dir: config.overlay_dir().join("br"),
            jobs: config.jobs,
        }
    }

    fn hook(active: bool) -> String {
        if active {
            format!(
                "#!/bin/sh\n\
                 case \"$1\" in\n\
                 \x20 start)\n\
                 \x20   /{}\n\
                 \x20   poweroff\n\
                 \x20   ;;\n\
                 esac\n",
                RUN_SCRIPT
            )
        } else {
            "#!/bin/sh\nexit 0\n".to_string()
        }
    }
}

impl DistroBuilder for Buildroot {
    fn distro(&self) -> Distro {
        Distro::Buildroot
    }

    fn base_image(&self) -> Option<&Path> {
        Some(&self.image)
    }

    fn build_base_image(&self) -> Result<()> {
        println!("Building buildroot base image in {}...", self.source.display());
        Cmd::new("make")
            .arg(format!("-j{}", self.jobs))
            .dir(&self.source)
            .error_msg("buildroot build failed")
            .run_interactive()?;
        install_base_image(&self.source.join("output/images/rootfs.ext2"), &self.image)
    }

    fn up_to_date(&self) -> bool {
        self.image.exists()
    }

    fn generate_boot_script_overlay(&self, script: Option<&Path>) -> Result<PathBuf> {
        let overlay = prepare_boot_overlay(&self.overlay_dir.join("bootscript"), script)?;
        write_executable(&overlay.join(HOOK_PATH), Self::hook(script.is_some()).as_bytes())?;
        Ok(overlay)
    }
}
