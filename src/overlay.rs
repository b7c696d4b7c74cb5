//! Filesystem overlay applicator.
//!
//! Mutates a raw disk image in place: loop-mount it at the process-wide mount
//! point, copy each overlay entry with ownership forced to root, unmount.
//!
//! The mount is held by a [`LoopMount`] guard. Dropping the guard unmounts,
//! so a failed copy never leaves a loop device mounted for the next
//! invocation. Only one mount point exists, so every acquisition takes
//! [`MOUNT_LOCK`] for as long as the guard lives.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::graph::glob_root;
use crate::process::Cmd;
use crate::workload::FileSpec;

/// Serializes all use of the mount point.
pub static MOUNT_LOCK: Mutex<()> = Mutex::new(());

/// Privileged primitives behind the applicator.
pub trait ImageMounter {
    /// The single mount point images are attached to.
    fn mount_point(&self) -> &Path;

    fn mount(&self, image: &Path) -> Result<()>;

    /// Copy `src` (file, directory or shell glob) to `dst`, a path under the
    /// mount point. Copied files end up owned by root.
    fn copy(&self, src: &Path, dst: &Path) -> Result<()>;

    fn unmount(&self, image: &Path) -> Result<()>;
}

/// `sudo mount -o loop` + `sudo rsync -a --chown=root:root`.
#[derive(Debug, Clone)]
pub struct LoopMounter {
    mount_point: PathBuf,
}

impl LoopMounter {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }
}

impl ImageMounter for LoopMounter {
    fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    fn mount(&self, image: &Path) -> Result<()> {
        fs::create_dir_all(&self.mount_point).with_context(|| {
            format!("Failed to create mount point {}", self.mount_point.display())
        })?;
        Cmd::new("sudo")
            .args(["mount", "-o", "loop"])
            .arg(image)
            .arg(&self.mount_point)
            .error_msg(format!("Failed to mount {}", image.display()))
            .run()?;
        Ok(())
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<()> {
        // Through the shell: overlay sources may be globs.
        Cmd::shell(format!(
            "sudo rsync -a --chown=root:root {} {}",
            shell_source(src),
            shell_quote(&dst.to_string_lossy())
        ))
        .error_msg(format!("Failed to copy {} into image", src.display()))
        .run()?;
        Ok(())
    }

    fn unmount(&self, image: &Path) -> Result<()> {
        Cmd::new("sudo")
            .arg("umount")
            .arg(&self.mount_point)
            .error_msg(format!("Failed to unmount {}", image.display()))
            .run()?;
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote the glob-free prefix of an overlay source. Only the glob suffix is
/// left for the shell to expand.
fn shell_source(src: &Path) -> String {
    let root = glob_root(src);
    let Ok(suffix) = src.strip_prefix(&root) else {
        return shell_quote(&src.to_string_lossy());
    };
    if root.as_os_str().is_empty() {
        return suffix.to_string_lossy().into_owned();
    }
    if suffix.as_os_str().is_empty() {
        // Whole path, so a trailing slash keeps its rsync meaning.
        return shell_quote(&src.to_string_lossy());
    }
    let quoted = shell_quote(&root.to_string_lossy());
    if root == Path::new("/") {
        format!("{}{}", quoted, suffix.to_string_lossy())
    } else {
        format!("{}/{}", quoted, suffix.to_string_lossy())
    }
}

/// A mounted image. Unmounts on drop.
pub struct LoopMount<'a> {
    mounter: &'a dyn ImageMounter,
    image: PathBuf,
    mounted: bool,
    _lock: MutexGuard<'static, ()>,
}

impl<'a> LoopMount<'a> {
    /// Take the mount lock and mount `image`.
    pub fn acquire(mounter: &'a dyn ImageMounter, image: &Path) -> Result<Self> {
        let lock = MOUNT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        mounter.mount(image)?;
        tracing::debug!(
            image = %image.display(),
            mnt = %mounter.mount_point().display(),
            "mounted"
        );
        Ok(Self {
            mounter,
            image: image.to_path_buf(),
            mounted: true,
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        self.mounter.mount_point()
    }

    /// Copy one overlay entry into the mounted image.
    pub fn copy(&self, spec: &FileSpec) -> Result<()> {
        let dst = overlay_join(self.root(), &spec.dst);
        tracing::debug!(src = %spec.src.display(), dst = %dst.display(), "copying overlay");
        self.mounter.copy(&spec.src, &dst)
    }

    /// Unmount now and report failure. Drop does the same but can only log.
    pub fn release(mut self) -> Result<()> {
        self.mounted = false;
        self.mounter.unmount(&self.image)
    }
}

impl Drop for LoopMount<'_> {
    fn drop(&mut self) {
        if self.mounted {
            if let Err(e) = self.mounter.unmount(&self.image) {
                tracing::error!("failed to unmount {}: {:#}", self.image.display(), e);
            }
        }
    }
}

/// Join an absolute in-image path onto `root`.
///
/// `Path::join` would discard `root` when `dst` is absolute; here `dst`'s root
/// is replaced by `root` instead, and `..` cannot climb above it.
pub fn overlay_join(root: &Path, dst: &Path) -> PathBuf {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for component in dst.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::ParentDir if depth > 0 => {
                out.pop();
                depth -= 1;
            }
            _ => {}
        }
    }
    out
}

/// Copy every entry of `files` into `image`, in order.
///
/// Later entries may overwrite earlier ones. The image is unmounted on every
/// exit path.
pub fn apply_files(mounter: &dyn ImageMounter, image: &Path, files: &[FileSpec]) -> Result<()> {
    let mount = LoopMount::acquire(mounter, image)?;
    for spec in files {
        mount.copy(spec).with_context(|| {
            format!("Failed to apply {} to {}", spec.src.display(), image.display())
        })?;
    }
    mount.release()
}

/// Apply the contents of overlay directory `overlay` onto `/` of `image`.
pub fn apply_overlay(mounter: &dyn ImageMounter, image: &Path, overlay: &Path) -> Result<()> {
    apply_files(mounter, image, &[FileSpec::new(overlay.join("*"), "/")])
}
