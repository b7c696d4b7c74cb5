//! Shared test utilities for marshal tests.
//!
//! Real images need root to loop-mount. Tests use a fake image format
//! instead: a JSON map from in-image path to file contents (symlinks stored
//! as `-> target`). [`FakeMounter`] unpacks it at the mount point and packs it
//! back on unmount, so the overlay and pipeline code runs unchanged.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use walkdir::WalkDir;

use marshal::binary::{check_buildable, BinaryBuilder};
use marshal::config::Config;
use marshal::executor::BuildEnv;
use marshal::launch::{Emulator, LaunchTarget};
use marshal::overlay::ImageMounter;
use marshal::workload::WorkloadConfig;

pub type ImageContents = BTreeMap<String, String>;

/// Something a fake did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Mount(PathBuf),
    Copy { src: PathBuf, dst: PathBuf },
    Unmount(PathBuf),
    Boot(PathBuf),
    Binary { name: String, initramfs: bool },
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

// =============================================================================
// Fake image format
// =============================================================================

pub fn write_fake_image(path: &Path, entries: &[(&str, &str)]) {
    let contents: ImageContents = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_string_pretty(&contents).unwrap()).unwrap();
}

pub fn read_fake_image(path: &Path) -> ImageContents {
    let text = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read image {}: {}", path.display(), e));
    serde_json::from_str(&text).unwrap()
}

// =============================================================================
// FakeMounter
// =============================================================================

pub struct FakeMounter {
    mount_point: PathBuf,
    log: EventLog,
    pub fail_copy: Cell<bool>,
}

impl FakeMounter {
    pub fn new(mount_point: &Path, log: EventLog) -> Self {
        Self {
            mount_point: mount_point.to_path_buf(),
            log,
            fail_copy: Cell::new(false),
        }
    }
}

impl ImageMounter for FakeMounter {
    fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    fn mount(&self, image: &Path) -> Result<()> {
        if self.mount_point.exists() {
            bail!("{} is already mounted", self.mount_point.display());
        }
        let text = fs::read_to_string(image)
            .with_context(|| format!("cannot mount {}", image.display()))?;
        let contents: ImageContents = serde_json::from_str(&text)?;

        fs::create_dir_all(&self.mount_point)?;
        for (rel, body) in contents {
            let path = self.mount_point.join(&rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            match body.strip_prefix("-> ") {
                Some(target) => symlink(target, &path)?,
                None => fs::write(&path, body)?,
            }
        }
        self.log.borrow_mut().push(Event::Mount(image.to_path_buf()));
        Ok(())
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<()> {
        self.log.borrow_mut().push(Event::Copy {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        });
        if self.fail_copy.get() {
            bail!("simulated copy failure");
        }
        if !dst.starts_with(&self.mount_point) {
            bail!("copy outside the mount point: {}", dst.display());
        }

        let pattern = src.to_string_lossy();
        let sources: Vec<PathBuf> = if pattern.contains(['*', '?', '[']) {
            let mut found: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(|p| p.ok()).collect();
            found.sort();
            found
        } else {
            vec![src.to_path_buf()]
        };
        if sources.is_empty() {
            bail!("no match for {}", pattern);
        }
        for source in sources {
            rsync_like(&source, dst)?;
        }
        Ok(())
    }

    fn unmount(&self, image: &Path) -> Result<()> {
        let mut contents = ImageContents::new();
        for entry in WalkDir::new(&self.mount_point).sort_by_file_name() {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(&self.mount_point)?
                .to_string_lossy()
                .into_owned();
            if entry.path_is_symlink() {
                let target = fs::read_link(entry.path())?;
                contents.insert(rel, format!("-> {}", target.display()));
            } else if entry.file_type().is_file() {
                contents.insert(rel, fs::read_to_string(entry.path())?);
            }
        }
        fs::write(image, serde_json::to_string_pretty(&contents)?)?;
        fs::remove_dir_all(&self.mount_point)?;
        self.log.borrow_mut().push(Event::Unmount(image.to_path_buf()));
        Ok(())
    }
}

/// `rsync -a src dst`: a directory lands inside `dst`, a file lands inside
/// `dst` if it is a directory and at `dst` otherwise.
fn rsync_like(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).with_context(|| format!("missing {}", src.display()))?;
    let name = src.file_name().context("source has no file name")?;
    if meta.is_dir() {
        fs::create_dir_all(dst)?;
        copy_tree(src, &dst.join(name))
    } else if dst.is_dir() {
        copy_tree(src, &dst.join(name))
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_tree(src, dst)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if let Ok(existing) = fs::symlink_metadata(dst) {
        if existing.file_type().is_symlink() || (existing.is_file() && !meta.is_file()) {
            fs::remove_file(dst)?;
        }
    }
    if meta.file_type().is_symlink() {
        symlink(fs::read_link(src)?, dst)?;
    } else if meta.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}

// =============================================================================
// FakeEmulator
// =============================================================================

/// Records each boot together with the disk image as it was at boot time.
pub struct FakeEmulator {
    log: EventLog,
    pub boots: RefCell<Vec<(LaunchTarget, Option<ImageContents>)>>,
    pub fail: Cell<bool>,
}

impl FakeEmulator {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            boots: RefCell::new(Vec::new()),
            fail: Cell::new(false),
        }
    }
}

impl Emulator for FakeEmulator {
    fn name(&self) -> &str {
        "fake"
    }

    fn run_to_completion(&self, target: &LaunchTarget) -> Result<()> {
        self.log.borrow_mut().push(Event::Boot(target.bin.clone()));
        let snapshot = match (&target.img, target.uses_disk()) {
            (Some(img), true) => Some(read_fake_image(img)),
            _ => None,
        };
        self.boots.borrow_mut().push((target.clone(), snapshot));
        if self.fail.get() {
            bail!("guest exited with status 1");
        }
        Ok(())
    }
}

// =============================================================================
// FakeBinaries
// =============================================================================

/// Writes a marker file instead of compiling a kernel.
pub struct FakeBinaries {
    log: EventLog,
}

impl FakeBinaries {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl BinaryBuilder for FakeBinaries {
    fn build(&self, _env: &BuildEnv, config: &WorkloadConfig, initramfs: bool) -> Result<()> {
        check_buildable(config, initramfs)?;
        self.log.borrow_mut().push(Event::Binary {
            name: config.name.clone(),
            initramfs,
        });
        let out = config.bin_path(initramfs);
        fs::create_dir_all(out.parent().context("binary path has no parent")?)?;
        fs::write(&out, format!("bin {} initramfs={}\n", config.name, initramfs))?;
        Ok(())
    }
}

// =============================================================================
// TestEnv
// =============================================================================

/// A project root in a temp dir with a buildroot base image and kernel
/// configs in place, plus fakes sharing one event log.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
    pub log: EventLog,
    pub mounter: FakeMounter,
    pub emulator: FakeEmulator,
    pub binaries: FakeBinaries,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let config = Config::with_root(&root);

        fs::create_dir_all(&config.workload_dir).unwrap();
        fs::create_dir_all(&config.images_dir).unwrap();
        for distro in ["br", "fedora"] {
            let dir = root.join("wlutil").join(distro);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("linux-config"), format!("CONFIG_{}=y\n", distro)).unwrap();
        }
        write_fake_image(
            &config.images_dir.join("br-base.img"),
            &[("etc/os-release", "buildroot\n"), ("etc/init.d/rcS", "#!/bin/sh\n")],
        );

        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        Self {
            _temp_dir: temp_dir,
            mounter: FakeMounter::new(&config.mount_point, log.clone()),
            emulator: FakeEmulator::new(log.clone()),
            binaries: FakeBinaries::new(log.clone()),
            root,
            config,
            log,
        }
    }

    pub fn env(&self) -> BuildEnv<'_> {
        BuildEnv {
            config: &self.config,
            mounter: &self.mounter,
            emulator: &self.emulator,
            binaries: &self.binaries,
        }
    }

    /// Write `<workloads>/<file>` and return its path.
    pub fn write_workload(&self, file: &str, json: serde_json::Value) -> PathBuf {
        let path = self.config.workload_dir.join(file);
        fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
        path
    }

    /// Write a file in workload `name`'s directory and return its path.
    pub fn workload_file(&self, name: &str, rel: &str, contents: &str) -> PathBuf {
        let path = self.config.workload_dir.join(name).join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn image(&self, name: &str) -> PathBuf {
        self.config.images_dir.join(format!("{}.img", name))
    }

    pub fn bin(&self, name: &str) -> PathBuf {
        self.config.images_dir.join(format!("{}-bin", name))
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }
}

/// Position of the first event matching `pred`.
pub fn position(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("event not found in {:#?}", events))
}
