//! Temp-file naming, creation, and transaction/process-scoped cleanup
//! (`spec.md` §4.6).
//!
//! Every temp file lives under a `pgsql_tmp` subdirectory of a configured
//! temp tablespace root and is named so that an orphan sweep can identify
//! it on sight without consulting any other state.

use std::path::{Path, PathBuf};

use crate::config::{Config, FsyncMethod};
use crate::error::{Error, Result};
use crate::vfd::{Cache, File, OpenRequest, StateFlags};
use crate::xact::SubXactId;

const TEMP_DIR_NAME: &str = "pgsql_tmp";
const TEMP_FILE_PREFIX: &str = "pgsql_tmp_";

/// Builds the path for a temp file from its naming components.
///
/// With `extent` and `unique` both absent, the name is bare
/// (`pgsql_tmp_<label>`) — used for single-file temp relations. With
/// both present, the name disambiguates multiple concurrent users of the
/// same label (`pgsql_tmp_<label>_<pid>_<extent>.<unique>`).
pub fn build_temp_path(root: &Path, label: &str, pid: u32, extent: Option<u32>, unique: Option<u64>) -> PathBuf {
    let mut name = format!("{TEMP_FILE_PREFIX}{label}");
    if let Some(extent) = extent {
        name.push_str(&format!("_{pid}_{extent}"));
        if let Some(unique) = unique {
            name.push_str(&format!(".{unique}"));
        }
    }
    root.join(TEMP_DIR_NAME).join(name)
}

/// Records what a temp VFD was created for, so transaction-end hooks know
/// whether to close it, reassign it to the parent scope, or leave it
/// alone.
struct TempEntry {
    file: File,
    close_at_eoxact: bool,
}

/// Owns the bookkeeping `open_temporary_file` needs beyond what a plain
/// [`Cache`] slot already tracks: the association between a subtransaction
/// and the temp VFDs it created, consulted at every scope boundary.
pub struct TempFileTracker {
    entries: Vec<TempEntry>,
}

impl TempFileTracker {
    pub fn new() -> Self {
        TempFileTracker { entries: Vec::new() }
    }

    /// Opens a temp file, creating its `pgsql_tmp` directory on first use.
    ///
    /// `del_on_close` marks the VFD `TEMPORARY` (unlinked when closed);
    /// `close_at_eoxact` additionally marks it `CLOSE_AT_EOXACT` so it is
    /// torn down no later than the creating (sub)transaction's end even
    /// if the caller never explicitly closes it.
    #[allow(clippy::too_many_arguments)]
    pub fn open_temporary_file(
        &mut self,
        cache: &mut Cache,
        config: &Config,
        label: &str,
        pid: u32,
        extent: Option<u32>,
        unique: Option<u64>,
        create: bool,
        del_on_close: bool,
        close_at_eoxact: bool,
        subid: SubXactId,
        allocated_descs: usize,
        max_safe_fds: usize,
    ) -> Result<File> {
        let root = config.primary_temp_root();
        let path = build_temp_path(&root, label, pid, extent, unique);
        let path_str = path.to_string_lossy().into_owned();

        let mut flags = libc::O_RDWR;
        if create {
            flags |= libc::O_CREAT | libc::O_TRUNC;
        }
        let mode = 0o600;
        let request = OpenRequest { flags, mode };

        let file = match cache.open_local(&path_str, request, allocated_descs, max_safe_fds, config.fsync_method) {
            Ok(file) => file,
            Err(Error::BackendIo(err)) if err.kind() == std::io::ErrorKind::NotFound && create => {
                let dir = root.join(TEMP_DIR_NAME);
                std::fs::create_dir_all(&dir).map_err(Error::from)?;
                cache.open_local(&path_str, request, allocated_descs, max_safe_fds, config.fsync_method)?
            }
            Err(err) => return Err(err),
        };

        let mut state = StateFlags::empty();
        if del_on_close {
            state |= StateFlags::TEMPORARY;
        }
        if close_at_eoxact {
            state |= StateFlags::CLOSE_AT_EOXACT;
        }
        cache.set_state_flags(file, state)?;
        cache.set_create_subid(file, subid)?;

        self.entries.push(TempEntry { file, close_at_eoxact });
        Ok(file)
    }

    /// Drops bookkeeping for a file the caller closed itself.
    pub fn forget(&mut self, file: File) {
        self.entries.retain(|e| e.file != file);
    }

    /// Subtransaction end: only files created by `subid` with
    /// `close_at_eoxact` set are in scope (`spec.md` §4.5: "For each slot
    /// with CLOSE_AT_EOXACT and create_subid == s"). Those are closed on
    /// abort, or reassigned to `parent` on commit so a later
    /// `at_eoxact`/ancestor abort still catches them. A `del_on_close`-only
    /// temp file with no `close_at_eoxact` is untouched here — its owner
    /// still holds it past the subtransaction boundary.
    pub fn at_eosubxact(
        &mut self,
        cache: &mut Cache,
        subid: SubXactId,
        parent: SubXactId,
        commit: bool,
        fsync: FsyncMethod,
    ) -> Result<()> {
        let mut remaining = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            let owned_by_subxact = cache.create_subid(entry.file).map(|s| s == subid).unwrap_or(false);
            if !owned_by_subxact || !entry.close_at_eoxact {
                remaining.push(entry);
                continue;
            }
            if commit {
                cache.set_create_subid(entry.file, parent)?;
                remaining.push(entry);
            } else {
                let _ = cache.close(entry.file, fsync);
            }
        }
        self.entries = remaining;
        Ok(())
    }

    /// Top-level transaction end: every tracked temp file still marked
    /// `CLOSE_AT_EOXACT` is closed, commit or abort alike.
    pub fn at_eoxact(&mut self, cache: &mut Cache, fsync: FsyncMethod) -> Result<()> {
        let mut remaining = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.close_at_eoxact {
                let _ = cache.close(entry.file, fsync);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;
        Ok(())
    }

    /// Transaction cancellation: a two-pass close, remote files first
    /// (ignoring their own errors, since the remote endpoint may already
    /// be unreachable mid-cancel) and then the rest normally.
    pub fn at_xact_cancel(&mut self, cache: &mut Cache, fsync: FsyncMethod) {
        let entries = std::mem::take(&mut self.entries);
        let (remote, local): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| cache.is_remote(e.file).unwrap_or(false));
        for entry in remote {
            cache.close_remote_ignoring_errors(entry.file);
        }
        for entry in local {
            let _ = cache.close(entry.file, fsync);
        }
    }

    /// Process exit: close every remaining tracked temp file, best-effort.
    pub fn at_proc_exit(&mut self, cache: &mut Cache, fsync: FsyncMethod) {
        for entry in self.entries.drain(..) {
            let _ = cache.close(entry.file, fsync);
        }
    }
}

impl Default for TempFileTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Sweeps every configured temp tablespace root for orphaned
/// `pgsql_tmp_`-prefixed files left behind by a prior, uncleanly-ended
/// process, and removes them. Entries that don't match the prefix are
/// logged and left alone — a `pgsql_tmp` directory may legitimately hold
/// other state.
pub fn remove_pg_temp_files(config: &Config) -> Result<usize> {
    let mut removed = 0;
    for root in &config.temp_tablespace_roots {
        let dir = root.join(TEMP_DIR_NAME);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry.map_err(Error::from)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TEMP_FILE_PREFIX) {
                if std::fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
                tracing::info!(path = %entry.path().display(), "removed orphaned temp file");
            } else {
                tracing::debug!(path = %entry.path().display(), "leaving non-temp entry in pgsql_tmp");
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_temp_path_bare_label() {
        let root = Path::new("/tmp/base");
        let path = build_temp_path(root, "rel12345", 1, None, None);
        assert_eq!(path, Path::new("/tmp/base/pgsql_tmp/pgsql_tmp_rel12345"));
    }

    #[test]
    fn build_temp_path_disambiguated() {
        let root = Path::new("/tmp/base");
        let path = build_temp_path(root, "rel12345", 42, Some(3), Some(7));
        assert_eq!(path, Path::new("/tmp/base/pgsql_tmp/pgsql_tmp_rel12345_42_3.7"));
    }

    #[test]
    fn sweep_removes_only_prefixed_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let temp_dir = dir.path().join(TEMP_DIR_NAME);
        std::fs::create_dir(&temp_dir).unwrap();
        std::fs::write(temp_dir.join("pgsql_tmp_a"), b"").unwrap();
        std::fs::write(temp_dir.join("pgsql_tmp_b"), b"").unwrap();
        std::fs::write(temp_dir.join("README"), b"").unwrap();

        let config = Config {
            max_files_per_process: 1000,
            temp_tablespace_roots: vec![dir.path().to_path_buf()],
            fsync_method: Default::default(),
        };

        let removed = remove_pg_temp_files(&config).unwrap();
        assert_eq!(removed, 2);
        assert!(temp_dir.join("README").exists());
        assert!(!temp_dir.join("pgsql_tmp_a").exists());
        assert!(!temp_dir.join("pgsql_tmp_b").exists());
    }
}
