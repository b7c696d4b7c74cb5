//! marshal library exports.
//!
//! The binary is a thin CLI over these modules; integration tests in
//! `tests/` drive them directly with unprivileged mounters and emulators.

pub mod binary;
pub mod cache;
pub mod commands;
pub mod config;
pub mod cpio;
pub mod distro;
pub mod error;
pub mod executor;
pub mod graph;
pub mod image;
pub mod launch;
pub mod overlay;
pub mod process;
pub mod timing;
pub mod workload;
