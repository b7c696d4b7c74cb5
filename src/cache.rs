//! Hash-based up-to-date records.
//!
//! A node's record is the SHA256 over its file dependencies: the path and
//! content of every file, plus every config digest. Content hashes mean a
//! touched but unchanged file does not trigger a rebuild.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use crate::graph::FileDep;

/// Hash a node's file dependencies.
///
/// Returns `None` if a path dependency does not exist or cannot be read.
pub fn hash_file_deps<'a>(deps: impl IntoIterator<Item = &'a FileDep>) -> Option<String> {
    let mut hasher = Sha256::new();
    for dep in deps {
        match dep {
            FileDep::Path(path) => {
                hasher.update(path.to_string_lossy().as_bytes());
                hasher.update([0u8]);
                if let Err(e) = hash_contents(path, &mut hasher) {
                    if path.exists() {
                        println!(
                            "  [WARN] Failed to read {} for hashing: {} (will rebuild)",
                            path.display(),
                            e
                        );
                    }
                    return None;
                }
            }
            FileDep::Config(digest) => {
                hasher.update(b"config:");
                hasher.update(digest.as_bytes());
            }
        }
        hasher.update([0u8]);
    }
    Some(format!("{:x}", hasher.finalize()))
}

/// Stream a file through the hasher. Base images are too large to read whole.
fn hash_contents(path: &Path, hasher: &mut Sha256) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(1024 * 1024, File::open(path)?);
    io::copy(&mut reader, hasher)
}

/// Record file for node `id` under `dir`.
pub fn hash_file_for(dir: &Path, id: &str) -> PathBuf {
    let name = id.replace('%', "%25").replace('/', "%2F");
    dir.join(format!("{}.hash", name))
}

/// Read a recorded hash. Missing or unreadable records read as `None`.
pub fn read_cached_hash(hash_file: &Path) -> Option<String> {
    if !hash_file.exists() {
        return None;
    }
    match fs::read_to_string(hash_file) {
        Ok(s) => Some(s.trim().to_string()),
        Err(e) => {
            println!(
                "  [WARN] Failed to read hash record {}: {} (will rebuild)",
                hash_file.display(),
                e
            );
            None
        }
    }
}

pub fn write_cached_hash(hash_file: &Path, hash: &str) -> Result<()> {
    if let Some(parent) = hash_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(hash_file, hash)
        .with_context(|| format!("Failed to write hash record {}", hash_file.display()))?;
    Ok(())
}

/// Whether a node must run: some target is missing, or the recorded hash is
/// absent or differs from `current`.
pub fn needs_rebuild(current: &str, hash_file: &Path, targets: &[PathBuf]) -> bool {
    if targets.iter().any(|t| !t.exists()) {
        return true;
    }
    match read_cached_hash(hash_file) {
        Some(cached) => cached != current,
        None => true,
    }
}
