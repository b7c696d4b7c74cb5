//! Launch command - boots a built workload.
//!
//! Nothing is built here; a missing binary or image is reported with a hint
//! to run `marshal build` first.

use anyhow::Result;

use super::{Target, Workspace};
use crate::config::Config;
use crate::error::MarshalError;
use crate::launch::{Emulator, LaunchTarget};

/// Execute the launch command.
pub fn cmd_launch(config: &Config, emulator: &dyn Emulator, target: &Target) -> Result<()> {
    let workspace = Workspace::load(config, target)?;
    let workload = workspace.workload(config, target)?;
    let selected = match &target.job {
        Some(job) => workload.job(job)?,
        None => workload,
    };

    // Spike only boots initramfs binaries, so a workload that asks for one
    // in its descriptor gets it without the flag.
    let initramfs = target.initramfs || (emulator.name() == "spike" && selected.initramfs);
    let launch = LaunchTarget::new(selected, initramfs);

    if !launch.bin.exists() {
        return Err(MarshalError::missing(
            format!("Binary for '{}' (run 'marshal build' first)", selected.name),
            &launch.bin,
        )
        .into());
    }
    if let (true, Some(img)) = (launch.uses_disk(), &launch.img) {
        if !img.exists() {
            return Err(MarshalError::missing(
                format!("Image for '{}' (run 'marshal build' first)", selected.name),
                img,
            )
            .into());
        }
    }

    tracing::info!(workload = %selected.name, emulator = emulator.name(), initramfs, "launching");
    emulator.run_to_completion(&launch)
}
