//! Image assembly pipeline.
//!
//! Turns a base image into the delivered workload image. Stages run strictly
//! in this order, each optional except the first:
//!
//! 1. Seed         copy the base image over the output image
//! 2. Host-init    run the host-side init script in the workload directory
//! 3. Files        apply the workload's file overlays
//! 4. Target-init  install the init script as a boot hook, boot the image once
//!                 under the emulator, then install the no-op hook over it
//! 5. Run          install the run script (or a wrapper around the inline
//!                 command) as the persistent boot hook
//!
//! Any failure aborts the pipeline and leaves the image dirty. Seeding
//! overwrites it, so rebuilding the node starts clean.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::distro::write_executable;
use crate::error::{require_file, MarshalError};
use crate::executor::BuildEnv;
use crate::launch::LaunchTarget;
use crate::overlay::{apply_files, apply_overlay};
use crate::process::Cmd;
use crate::workload::{RunSpec, WorkloadConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Seed,
    HostInit,
    Files,
    TargetInit,
    Run,
}

/// Assemble the image for `config`.
pub fn make_image(env: &BuildEnv, config: &WorkloadConfig) -> Result<()> {
    let img = config.img.as_deref().ok_or_else(|| {
        MarshalError::config(format!("workload '{}' does not produce an image", config.name))
    })?;

    for stage in stages(config) {
        tracing::debug!(workload = %config.name, ?stage, "image stage");
        run_stage(env, config, img, stage)
            .with_context(|| format!("{:?} stage failed for image {}", stage, img.display()))?;
    }
    Ok(())
}

/// Stages that apply to `config`, in execution order.
pub fn stages(config: &WorkloadConfig) -> Vec<Stage> {
    let mut stages = vec![Stage::Seed];
    if config.host_init.is_some() {
        stages.push(Stage::HostInit);
    }
    if !config.files.is_empty() {
        stages.push(Stage::Files);
    }
    if config.init.is_some() {
        stages.push(Stage::TargetInit);
    }
    if config.run.is_some() {
        stages.push(Stage::Run);
    }
    stages
}

fn run_stage(env: &BuildEnv, config: &WorkloadConfig, img: &Path, stage: Stage) -> Result<()> {
    match stage {
        Stage::Seed => seed(config, img),
        Stage::HostInit => {
            if let Some(script) = &config.host_init {
                host_init(config, script)?;
            }
            Ok(())
        }
        Stage::Files => {
            println!("  Applying {} file overlay(s)", config.files.len());
            apply_files(env.mounter, img, &config.files)
        }
        Stage::TargetInit => {
            if let Some(init) = &config.init {
                target_init(env, config, img, init)?;
            }
            Ok(())
        }
        Stage::Run => {
            if let Some(run) = &config.run {
                install_run(env, config, img, run)?;
            }
            Ok(())
        }
    }
}

fn seed(config: &WorkloadConfig, img: &Path) -> Result<()> {
    let base = config.base_img.as_deref().ok_or_else(|| {
        MarshalError::config(format!("workload '{}' has an image but no base image", config.name))
    })?;
    require_file("Base image", base)?;

    if let Some(parent) = img.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(base, img)
        .with_context(|| format!("Failed to copy {} to {}", base.display(), img.display()))?;
    Ok(())
}

fn host_init(config: &WorkloadConfig, script: &Path) -> Result<()> {
    println!("  Running host-init: {}", script.display());
    require_file("host-init script", script)?;
    Cmd::new(script)
        .dir(&config.workdir)
        .error_msg(format!("host-init script {} failed", script.display()))
        .run_interactive()?;
    Ok(())
}

fn target_init(env: &BuildEnv, config: &WorkloadConfig, img: &Path, init: &Path) -> Result<()> {
    println!("  Applying init script: {}", init.display());
    require_file("Init script", init)?;

    let overlay = config.builder.generate_boot_script_overlay(Some(init))?;
    apply_overlay(env.mounter, img, &overlay)?;

    println!("  Booting {} to run the init script", config.bin.display());
    env.emulator
        .run_to_completion(&LaunchTarget::disk(config))
        .context("init script boot failed")?;

    let clear = config.builder.generate_boot_script_overlay(None)?;
    apply_overlay(env.mounter, img, &clear)
}

fn install_run(env: &BuildEnv, config: &WorkloadConfig, img: &Path, run: &RunSpec) -> Result<()> {
    let script = match run {
        RunSpec::Command(command) => {
            println!("  Applying run command: {}", command);
            write_run_script(&env.config.script_dir(), &config.name, command)?
        }
        RunSpec::Script(path) => {
            println!("  Applying run script: {}", path.display());
            path.clone()
        }
    };
    require_file("Run script", &script)?;

    let overlay = config.builder.generate_boot_script_overlay(Some(&script))?;
    apply_overlay(env.mounter, img, &overlay)
}

/// Wrap an inline command in a shell script.
///
/// The path depends only on the workload name, so rebuilding produces the
/// same script.
pub fn write_run_script(dir: &Path, workload: &str, command: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{}-run.sh", workload));
    write_executable(&path, format!("#!/bin/sh\n{}\n", command).as_bytes())?;
    Ok(path)
}
