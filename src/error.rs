//! Classified errors for workload builds.
//!
//! Most of the crate propagates `anyhow::Error`. The variants here mark the
//! failures that callers (and tests) need to tell apart:
//! - [`MarshalError::Config`]: the workload description cannot be built as written
//! - [`MarshalError::MissingArtifact`]: a required input is absent when a node runs
//! - [`MarshalError::Environment`]: the host or emulator cannot serve the request
//!
//! Subprocess failures stay plain `anyhow` errors produced by [`crate::process::Cmd`].

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarshalError {
    /// Unbuildable or inconsistent workload configuration (user-fixable).
    #[error("configuration error: {0}")]
    Config(String),

    /// A file the current build node needs does not exist.
    #[error("{what} not found: {}", path.display())]
    MissingArtifact { what: String, path: PathBuf },

    /// Request rejected before any subprocess was spawned.
    #[error("{0}")]
    Environment(String),
}

impl MarshalError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing(what: impl Into<String>, path: &Path) -> Self {
        Self::MissingArtifact {
            what: what.into(),
            path: path.to_path_buf(),
        }
    }

    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment(msg.into())
    }
}

/// Fail with [`MarshalError::MissingArtifact`] unless `path` exists.
///
/// Checked at the point of use, since the file may itself be produced by an
/// earlier build node.
pub fn require_file(what: &str, path: &Path) -> Result<(), MarshalError> {
    if path.exists() {
        Ok(())
    } else {
        Err(MarshalError::missing(what, path))
    }
}
