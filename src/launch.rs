//! Emulator launch.
//!
//! Both emulators run attached to the terminal and block until the session
//! ends. There is no timeout: the init-script boot during image assembly
//! relies on the workload powering the machine off, and a guest that never
//! does will hang the build.

use anyhow::Result;
use std::path::PathBuf;

use crate::error::MarshalError;
use crate::process::{self, Cmd};
use crate::workload::WorkloadConfig;

/// What to boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub name: String,
    /// Binary passed to the emulator (already the initramfs variant when
    /// `initramfs` is set).
    pub bin: PathBuf,
    pub img: Option<PathBuf>,
    pub initramfs: bool,
}

impl LaunchTarget {
    pub fn new(config: &WorkloadConfig, initramfs: bool) -> Self {
        Self {
            name: config.name.clone(),
            bin: config.bin_path(initramfs),
            img: config.img.clone(),
            initramfs,
        }
    }

    /// Disk-based boot of the regular binary, as used for init scripts.
    pub fn disk(config: &WorkloadConfig) -> Self {
        Self::new(config, false)
    }

    /// Whether the boot attaches the disk image.
    pub fn uses_disk(&self) -> bool {
        self.img.is_some() && !self.initramfs
    }
}

/// Run-to-completion boot of a workload.
pub trait Emulator {
    fn name(&self) -> &str;

    /// Boot `target` and block until the emulator exits. A non-zero exit is
    /// an error; nothing else about the guest is checked.
    fn run_to_completion(&self, target: &LaunchTarget) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Qemu {
    pub program: String,
}

impl Default for Qemu {
    fn default() -> Self {
        Self {
            program: "qemu-system-riscv64".to_string(),
        }
    }
}

impl Qemu {
    pub fn args(target: &LaunchTarget) -> Vec<String> {
        let mut args: Vec<String> = [
            "-nographic",
            "-smp", "4",
            "-machine", "virt",
            "-m", "4G",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("-kernel".into());
        args.push(target.bin.to_string_lossy().into_owned());
        args.extend(
            [
                "-object", "rng-random,filename=/dev/urandom,id=rng0",
                "-device", "virtio-rng-device,rng=rng0",
                "-device", "virtio-net-device,netdev=usernet",
                "-netdev", "user,id=usernet,hostfwd=tcp::10000-:22",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        if let (true, Some(img)) = (target.uses_disk(), &target.img) {
            args.push("-device".into());
            args.push("virtio-blk-device,drive=hd0".into());
            args.push("-drive".into());
            args.push(format!("file={},format=raw,id=hd0", img.display()));
            args.push("-append".into());
            args.push("ro root=/dev/vda".into());
        }
        args
    }
}

impl Emulator for Qemu {
    fn name(&self) -> &str {
        "qemu"
    }

    fn run_to_completion(&self, target: &LaunchTarget) -> Result<()> {
        require_program(&self.program)?;
        println!("Launching {} in QEMU", target.name);
        Cmd::new(&self.program)
            .args(Self::args(target))
            .error_msg("QEMU exited with an error")
            .run_interactive()?;
        Ok(())
    }
}

/// The spike ISA simulator. Initramfs only: it has no block device.
#[derive(Debug, Clone)]
pub struct Spike {
    pub program: String,
}

impl Default for Spike {
    fn default() -> Self {
        Self {
            program: "spike".to_string(),
        }
    }
}

impl Spike {
    pub fn args(target: &LaunchTarget) -> Vec<String> {
        vec![
            "-p4".to_string(),
            "-m4096".to_string(),
            target.bin.to_string_lossy().into_owned(),
        ]
    }
}

impl Emulator for Spike {
    fn name(&self) -> &str {
        "spike"
    }

    fn run_to_completion(&self, target: &LaunchTarget) -> Result<()> {
        if target.uses_disk() {
            return Err(MarshalError::environment(
                "Spike does not support disk-based configurations. \
                 Use an initramfs-based image (--initramfs).",
            )
            .into());
        }
        require_program(&self.program)?;
        println!("Launching {} in spike", target.name);
        Cmd::new(&self.program)
            .args(Self::args(target))
            .error_msg("spike exited with an error")
            .run_interactive()?;
        Ok(())
    }
}

fn require_program(program: &str) -> Result<()> {
    if process::exists(program) {
        Ok(())
    } else {
        Err(MarshalError::environment(format!("'{}' not found in PATH", program)).into())
    }
}
