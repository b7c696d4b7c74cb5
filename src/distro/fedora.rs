//! Fedora base distro.
//!
//! Boot scripts are started by a oneshot systemd unit enabled for
//! `multi-user.target`.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use super::{install_base_image, prepare_boot_overlay, DistroBuilder, RUN_SCRIPT};
use crate::config::Config;
use crate::process::Cmd;
use crate::workload::Distro;

pub const UNIT_PATH: &str = "etc/systemd/system/marshal.service";
pub const WANTS_PATH: &str = "etc/systemd/system/multi-user.target.wants/marshal.service";

#[derive(Debug, Clone)]
pub struct Fedora {
    source: PathBuf,
    image: PathBuf,
    overlay_dir: PathBuf,
    jobs: usize,
}

impl Fedora {
    pub fn new(config: &Config) -> Self {
        Self {
            source: config.fedora_source.clone(),
            image: config.images_dir.join("fedora-base.img"),
            overlay_dir: config.overlay_dir().join("fedora"),
            jobs: config.jobs,
        }
    }

    fn unit(active: bool) -> String {
        let exec = if active {
            format!("ExecStart=/{}\nExecStartPost=/usr/bin/systemctl poweroff\n", RUN_SCRIPT)
        } else {
            "ExecStart=/bin/true\n".to_string()
        };
        format!(
            "[Unit]\n\
             Description=marshal workload script\n\
             After=multi-user.target\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             StandardOutput=journal+console\n\
             {}\n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            exec
        )
    }
}

impl DistroBuilder for Fedora {
    fn distro(&self) -> Distro {
        Distro::Fedora
    }

    fn base_image(&self) -> Option<&Path> {
        Some(&self.image)
    }

    fn build_base_image(&self) -> Result<()> {
        println!("Building fedora base image in {}...", self.source.display());
        Cmd::new("make")
            .arg(format!("-j{}", self.jobs))
            .dir(&self.source)
            .error_msg("fedora image build failed")
            .run_interactive()?;
        install_base_image(&self.source.join("rootfs.img"), &self.image)
    }

    fn up_to_date(&self) -> bool {
        self.image.exists()
    }

    fn generate_boot_script_overlay(&self, script: Option<&Path>) -> Result<PathBuf> {
        let overlay = prepare_boot_overlay(&self.overlay_dir.join("bootscript"), script)?;

        let unit = overlay.join(UNIT_PATH);
        if let Some(parent) = unit.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&unit, Self::unit(script.is_some()))?;

        let wants = overlay.join(WANTS_PATH);
        if let Some(parent) = wants.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink("../marshal.service", &wants)?;

        Ok(overlay)
    }
}
