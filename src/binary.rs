//! Boot binary builds.
//!
//! A binary is a Linux `vmlinux` wrapped by the riscv-pk `bbl` bootloader.
//! The initramfs variant embeds the workload's disk image as a CPIO archive,
//! which is why its node depends on the image node.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::cpio;
use crate::error::{require_file, MarshalError};
use crate::executor::BuildEnv;
use crate::process::Cmd;
use crate::workload::{Distro, WorkloadConfig};

/// Builds the binary for a workload.
pub trait BinaryBuilder {
    /// Leave the binary at `config.bin_path(initramfs)`.
    fn build(&self, env: &BuildEnv, config: &WorkloadConfig, initramfs: bool) -> Result<()>;
}

/// Linux + bbl from the source trees named in the tool config.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelBuilder;

impl BinaryBuilder for KernelBuilder {
    fn build(&self, env: &BuildEnv, config: &WorkloadConfig, initramfs: bool) -> Result<()> {
        let Some(linux_config) = check_buildable(config, initramfs)? else {
            // Bare workloads without a kernel config ship a prebuilt binary
            // (typically produced by host-init).
            tracing::info!("{}: no linux-config, assuming prebuilt binary", config.name);
            return Ok(());
        };
        require_file("Kernel config", linux_config)?;

        let cfg = env.config;
        let linux = &cfg.linux_source;
        if !cfg.has_linux_source() {
            return Err(MarshalError::missing("Linux source tree", linux).into());
        }

        let kconfig = linux.join(".config");
        fs::copy(linux_config, &kconfig).with_context(|| {
            format!("Failed to install {} as {}", linux_config.display(), kconfig.display())
        })?;

        let jobs = format!("-j{}", cfg.jobs);

        // Must outlive the vmlinux build, which reads the archive.
        let cpio_file;
        if initramfs {
            let img = config.img.as_deref().ok_or_else(|| {
                MarshalError::config(format!("workload '{}' has no image to embed", config.name))
            })?;
            cpio_file = tempfile::Builder::new()
                .prefix(&format!("{}-", config.name))
                .suffix(".cpio")
                .tempfile()?;
            println!("  Converting {} to initramfs", img.display());
            cpio::image_to_cpio(env.mounter, img, cpio_file.path())?;
            cpio::convert_initramfs_config(&kconfig, cpio_file.path())?;
            Cmd::new("make")
                .args(["ARCH=riscv", "olddefconfig"])
                .dir(linux)
                .error_msg("make olddefconfig failed")
                .run_interactive()?;
        }

        println!("  Building vmlinux...");
        Cmd::new("make")
            .args(["ARCH=riscv", "vmlinux", jobs.as_str()])
            .dir(linux)
            .error_msg("Kernel build failed")
            .run_interactive()?;

        let pk_build = cfg.pk_source.join("build");
        fs::create_dir_all(&pk_build)?;

        println!("  Building bbl...");
        Cmd::new("../configure")
            .arg("--host=riscv64-unknown-elf")
            .arg(format!("--with-payload={}", linux.join("vmlinux").display()))
            .dir(&pk_build)
            .error_msg("riscv-pk configure failed")
            .run_interactive()?;
        Cmd::new("make")
            .arg(&jobs)
            .dir(&pk_build)
            .error_msg("riscv-pk build failed")
            .run_interactive()?;

        let out = config.bin_path(initramfs);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(pk_build.join("bbl"), &out)
            .with_context(|| format!("Failed to copy bbl to {}", out.display()))?;
        Ok(())
    }
}

/// The kernel config to build with, or `None` for a prebuilt bare binary.
pub fn check_buildable(config: &WorkloadConfig, initramfs: bool) -> Result<Option<&Path>> {
    if initramfs && config.img.is_none() {
        return Err(MarshalError::config(format!(
            "initramfs requested for '{}', which has no image",
            config.name
        ))
        .into());
    }
    match (&config.linux_config, config.distro) {
        (Some(kcfg), _) => Ok(Some(kcfg)),
        (None, Distro::Bare) => Ok(None),
        (None, distro) => Err(MarshalError::config(format!(
            "workload '{}' has no linux-config; only 'bare' workloads may omit it (distro is '{}')",
            config.name, distro
        ))
        .into()),
    }
}
