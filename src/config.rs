//! Finalized configuration consumed by the VFD layer.
//!
//! Loading configuration from its original sources (GUCs, command line,
//! environment) is the host's job; this crate only consumes the finalized
//! values, but still owns a small TOML-backed loader so the demo binary and
//! tests have something concrete to point at.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Number of file descriptors the layer keeps in reserve for things it
/// does not account for directly (stdio, shared-memory segments opened by
/// other subsystems, ...).
pub const NUM_RESERVED_FDS: usize = 10;

/// Minimum `max_safe_fds` below which the process cannot usefully start.
pub const FD_MINFREE: usize = 10;

/// Maximum number of concurrently allocated, non-VFD descriptors (open
/// streams and directory iterators).
pub const MAX_ALLOCATED_DESCS: usize = 32;

/// Default cap probed at startup before `max_files_per_process` is applied.
pub const DEFAULT_PROBE_LIMIT: usize = 32;

/// Durability policy used by the local back-end's `sync` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncMethod {
    /// `fsync(2)` — flush data and metadata.
    Fsync,
    /// `fdatasync(2)` — flush data only, where supported.
    Fdatasync,
    /// No explicit flush; rely on the OS write-back cache.
    WriteThrough,
}

impl Default for FsyncMethod {
    fn default() -> Self {
        FsyncMethod::Fsync
    }
}

/// Finalized configuration for a [`crate::Context`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-process soft limit on descriptors this layer may hold open at
    /// once, before `NUM_RESERVED_FDS` is subtracted.
    pub max_files_per_process: usize,
    /// Roots under which `pgsql_tmp`-style temp directories are created,
    /// one per configured temp tablespace. The first entry is used unless
    /// a caller names another.
    pub temp_tablespace_roots: Vec<PathBuf>,
    /// Durability policy for `file_sync`.
    pub fsync_method: FsyncMethod,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_files_per_process: 1000,
            temp_tablespace_roots: vec![std::env::temp_dir()],
            fsync_method: FsyncMethod::default(),
        }
    }
}

impl Config {
    /// Parses configuration from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Reads and parses configuration from a file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            source: err,
        })?;
        Self::from_toml_str(&text)
    }

    /// The primary temp tablespace root, defaulting to the OS temp dir if
    /// none were configured.
    pub fn primary_temp_root(&self) -> PathBuf {
        self.temp_tablespace_roots
            .first()
            .cloned()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Failure loading a [`Config`].
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config at {}: {source}", path.display())
            }
            ConfigError::Parse(err) => write!(f, "failed to parse config: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_constants() {
        let config = Config::default();
        assert_eq!(config.max_files_per_process, 1000);
        assert_eq!(config.fsync_method, FsyncMethod::Fsync);
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = Config::from_toml_str("max_files_per_process = 200\n").unwrap();
        assert_eq!(config.max_files_per_process, 200);
        assert_eq!(config.fsync_method, FsyncMethod::Fsync);
    }
}
