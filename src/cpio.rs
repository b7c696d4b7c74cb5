//! Disk image to initramfs conversion.
//!
//! The kernel embeds an initramfs from a newc CPIO archive named by
//! `CONFIG_INITRAMFS_SOURCE`. The archive is produced from the mounted disk
//! image so that the initramfs and disk variants of a workload carry the same
//! root filesystem.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::require_file;
use crate::overlay::{ImageMounter, LoopMount};
use crate::process::Cmd;

/// Write the contents of `image` to the CPIO archive `out`.
pub fn image_to_cpio(mounter: &dyn ImageMounter, image: &Path, out: &Path) -> Result<()> {
    require_file("Image for initramfs", image)?;
    let mount = LoopMount::acquire(mounter, image)?;

    Cmd::shell(format!(
        "sudo find . -print0 | sudo cpio --null -o -H newc > '{}'",
        out.display()
    ))
    .dir(mount.root())
    .error_msg(format!("Failed to archive {}", image.display()))
    .run()?;

    mount.release()
}

/// Kernel options required to embed `cpio` as the initramfs.
pub fn initramfs_options(cpio: &Path) -> Vec<String> {
    vec![
        "CONFIG_BLK_DEV_INITRD=y".to_string(),
        format!("CONFIG_INITRAMFS_SOURCE=\"{}\"", cpio.display()),
        "CONFIG_INITRAMFS_ROOT_UID=0".to_string(),
        "CONFIG_INITRAMFS_ROOT_GID=0".to_string(),
    ]
}

/// Set `options` in kconfig text, replacing earlier values and
/// `# X is not set` lines for the same keys.
pub fn merge_kconfig(config: &str, options: &[String]) -> String {
    let keys: Vec<&str> = options
        .iter()
        .filter_map(|o| o.split_once('=').map(|(k, _)| k))
        .collect();

    let mut out: Vec<&str> = config
        .lines()
        .filter(|line| {
            !keys.iter().any(|key| {
                line.strip_prefix(key).is_some_and(|rest| rest.starts_with('='))
                    || *line == format!("# {} is not set", key)
            })
        })
        .collect();
    out.extend(options.iter().map(String::as_str));

    let mut merged = out.join("\n");
    merged.push('\n');
    merged
}

/// Patch the kernel config at `kconfig` to embed `cpio`.
pub fn convert_initramfs_config(kconfig: &Path, cpio: &Path) -> Result<()> {
    let current = fs::read_to_string(kconfig)
        .with_context(|| format!("Failed to read kernel config at {}", kconfig.display()))?;
    fs::write(kconfig, merge_kconfig(&current, &initramfs_options(cpio)))
        .with_context(|| format!("Failed to write {}", kconfig.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_replaces_existing_values() {
        let config = concat!(
            "CONFIG_A=y\n",
            "# CONFIG_BLK_DEV_INITRD is not set\n",
            "CONFIG_INITRAMFS_SOURCE=\"\"\n",
            "CONFIG_B=m\n",
        );
        let merged = merge_kconfig(config, &initramfs_options(Path::new("/tmp/x.cpio")));

        assert!(merged.contains("CONFIG_A=y"));
        assert!(merged.contains("CONFIG_B=m"));
        assert!(!merged.contains("is not set"));
        assert!(merged.contains("CONFIG_BLK_DEV_INITRD=y"));
        assert!(merged.contains("CONFIG_INITRAMFS_SOURCE=\"/tmp/x.cpio\""));
        assert_eq!(merged.matches("CONFIG_INITRAMFS_SOURCE").count(), 1);
    }

    #[test]
    fn test_merge_does_not_touch_prefix_keys() {
        let merged = merge_kconfig(
            "CONFIG_BLK_DEV_INITRD_EXTRA=y\n",
            &["CONFIG_BLK_DEV_INITRD=y".to_string()],
        );
        assert!(merged.contains("CONFIG_BLK_DEV_INITRD_EXTRA=y"));
    }

    #[test]
    fn test_convert_initramfs_config_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let kconfig = dir.path().join(".config");
        fs::write(&kconfig, "CONFIG_RISCV=y\n").unwrap();

        convert_initramfs_config(&kconfig, Path::new("/tmp/root.cpio")).unwrap();
        let text = fs::read_to_string(&kconfig).unwrap();
        assert!(text.starts_with("CONFIG_RISCV=y\n"));
        assert!(text.contains("CONFIG_INITRAMFS_SOURCE=\"/tmp/root.cpio\""));
    }
}
