//! `Context`: the public façade tying together the VFD cache, the
//! allocated-desc table, the remote connection pool, and the temp-file
//! tracker into the single entry point a host process embeds
//! (`spec.md` §4.9).

use std::fs::OpenOptions;
use std::sync::Arc;

use crate::allocated_desc::{AllocatedDescTable, DescId, DirEntry};
use crate::backend::local;
use crate::backend::remote::RemoteFsConnector;
use crate::budget;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::path::{self, Classification};
use crate::pool::{ConnectionPool, Endpoint};
use crate::temp_file::{self, TempFileTracker};
use crate::vfd::{Cache, File, OpenRequest, SeekFrom};
use crate::xact::SubXactId;

/// Ties a [`Cache`], an [`AllocatedDescTable`], a [`ConnectionPool`], and a
/// [`TempFileTracker`] together behind the operation set a host process
/// actually calls.
pub struct Context {
    cache: Cache,
    allocated: AllocatedDescTable,
    pool: ConnectionPool,
    temp_files: TempFileTracker,
    config: Config,
    max_safe_fds: usize,
    next_temp_unique: u64,
}

impl Context {
    pub fn new(config: Config, connector: Box<dyn RemoteFsConnector>) -> Self {
        Context {
            cache: Cache::new(),
            allocated: AllocatedDescTable::new(),
            pool: ConnectionPool::new(connector),
            temp_files: TempFileTracker::new(),
            config,
            // A conservative placeholder until `init_file_access` probes
            // the real ceiling; keeps the façade usable in tests that
            // never call it.
            max_safe_fds: crate::config::DEFAULT_PROBE_LIMIT,
            next_temp_unique: 0,
        }
    }

    /// Probes the process's real descriptor ceiling and adopts it. Must be
    /// called once during host startup before serving real traffic
    /// (`spec.md` §4.5).
    pub fn init_file_access(&mut self) -> Result<()> {
        self.max_safe_fds = budget::probe_max_safe_fds(&self.config).ok_or(Error::BudgetExhausted)?;
        Ok(())
    }

    /// Test/diagnostic override of the probed budget.
    pub fn set_max_safe_fds(&mut self, value: usize) {
        self.max_safe_fds = value;
    }

    pub fn max_safe_fds(&self) -> usize {
        self.max_safe_fds
    }

    fn allocated_descs(&self) -> usize {
        self.allocated.len()
    }

    /// Opens `path`, dispatching to the local or remote back-end by its
    /// scheme (`spec.md` §4.1).
    pub fn path_open(&mut self, path: &str, flags: i32, mode: u32, subid: SubXactId) -> Result<File> {
        let request = OpenRequest { flags, mode };
        let allocated_descs = self.allocated_descs();
        let max_safe_fds = self.max_safe_fds;
        let fsync = self.config.fsync_method;
        let file = match path::classify(path)? {
            Classification::Local => {
                self.cache.open_local(path, request, allocated_descs, max_safe_fds, fsync)?
            }
            Classification::Remote(uri) => {
                let (protocol, host, port) = uri.endpoint();
                let endpoint = Endpoint::new(protocol, host, port);
                self.cache.open_remote(
                    endpoint,
                    protocol,
                    &uri.unix_path,
                    request,
                    uri.replica,
                    &mut self.pool,
                    allocated_descs,
                    max_safe_fds,
                )?
            }
        };
        self.cache.set_create_subid(file, subid)?;
        Ok(file)
    }

    /// Synonym for [`Self::path_open`] kept for callers that think in
    /// terms of a bare relation/segment name rather than a full path.
    pub fn file_name_open(&mut self, name: &str, flags: i32, mode: u32, subid: SubXactId) -> Result<File> {
        self.path_open(name, flags, mode, subid)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_temporary_file(
        &mut self,
        label: &str,
        pid: u32,
        extent: Option<u32>,
        create: bool,
        del_on_close: bool,
        close_at_eoxact: bool,
        subid: SubXactId,
    ) -> Result<File> {
        let unique = if extent.is_some() {
            self.next_temp_unique += 1;
            Some(self.next_temp_unique)
        } else {
            None
        };
        let allocated_descs = self.allocated_descs();
        let max_safe_fds = self.max_safe_fds;
        self.temp_files.open_temporary_file(
            &mut self.cache,
            &self.config,
            label,
            pid,
            extent,
            unique,
            create,
            del_on_close,
            close_at_eoxact,
            subid,
            allocated_descs,
            max_safe_fds,
        )
    }

    pub fn file_close(&mut self, file: File) -> Result<()> {
        self.temp_files.forget(file);
        self.cache.close(file, self.config.fsync_method)
    }

    pub fn file_unlink(&mut self, file: File) -> Result<()> {
        self.temp_files.forget(file);
        self.cache.unlink(file, self.config.fsync_method)
    }

    pub fn file_read(&mut self, file: File, buf: &mut [u8]) -> Result<usize> {
        let (allocated_descs, max_safe_fds, fsync) = (self.allocated_descs(), self.max_safe_fds, self.config.fsync_method);
        self.cache.read(file, buf, false, allocated_descs, max_safe_fds, fsync)
    }

    /// Like [`Self::file_read`], but retries once on `EINTR` instead of
    /// surfacing it to the caller.
    pub fn file_read_intr(&mut self, file: File, buf: &mut [u8]) -> Result<usize> {
        let (allocated_descs, max_safe_fds, fsync) = (self.allocated_descs(), self.max_safe_fds, self.config.fsync_method);
        self.cache.read(file, buf, true, allocated_descs, max_safe_fds, fsync)
    }

    pub fn file_write(&mut self, file: File, buf: &[u8]) -> Result<usize> {
        let (allocated_descs, max_safe_fds, fsync) = (self.allocated_descs(), self.max_safe_fds, self.config.fsync_method);
        self.cache.write(file, buf, allocated_descs, max_safe_fds, fsync)
    }

    pub fn file_seek(&mut self, file: File, offset: i64, whence: SeekFrom) -> Result<i64> {
        let (allocated_descs, max_safe_fds, fsync) = (self.allocated_descs(), self.max_safe_fds, self.config.fsync_method);
        self.cache.seek(file, offset, whence, allocated_descs, max_safe_fds, fsync)
    }

    /// Returns the logical position without physically re-opening an
    /// evicted slot (`spec.md` §4.3) — unlike `file_seek`/`file_read`, a
    /// caller asking "where am I" does not need the back-end touched.
    pub fn file_non_virtual_tell(&self, file: File) -> Result<i64> {
        self.cache.seek_pos(file)
    }

    pub fn file_sync(&mut self, file: File) -> Result<()> {
        let (allocated_descs, max_safe_fds, fsync) = (self.allocated_descs(), self.max_safe_fds, self.config.fsync_method);
        self.cache.sync(file, allocated_descs, max_safe_fds, fsync)
    }

    pub fn file_truncate(&mut self, file: File, len: i64) -> Result<()> {
        let (allocated_descs, max_safe_fds, fsync) = (self.allocated_descs(), self.max_safe_fds, self.config.fsync_method);
        self.cache.truncate(file, len, allocated_descs, max_safe_fds, fsync)
    }

    /// Removes a path outright (not via an open `File`), recursing into a
    /// local directory when `recursive` is set.
    ///
    /// RETURNS NONZERO ON SUCCESS AND ZERO ON FAILURE — the inverse of the
    /// POSIX `unlink(2)`/`rmdir(2)` convention and of this crate's own
    /// `Result` everywhere else. This is the published contract (`spec.md`
    /// §9) and is preserved deliberately; callers must check for zero, not
    /// for `Ok`.
    pub fn remove_path(&mut self, path: &str, recursive: bool) -> i32 {
        let result = match path::classify(path) {
            Ok(Classification::Local) => remove_local_path(path, recursive),
            Ok(Classification::Remote(uri)) => (|| -> Result<()> {
                let (protocol, host, port) = uri.endpoint();
                let endpoint = Endpoint::new(protocol, host, port);
                let connection = self.pool.get_or_connect(&endpoint)?;
                connection.delete(&uri.unix_path).map_err(Error::from)
            })(),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }

    pub fn make_directory(&mut self, path: &str, mode: u32) -> Result<()> {
        match path::classify(path)? {
            Classification::Local => local::mkdir(path, mode).map_err(Error::from),
            Classification::Remote(uri) => {
                let (protocol, host, port) = uri.endpoint();
                let endpoint = Endpoint::new(protocol, host, port);
                let connection = self.pool.get_or_connect(&endpoint)?;
                connection.mkdir(&uri.unix_path).map_err(Error::from)
            }
        }
    }

    pub fn allocate_file(&mut self, path: &str, options: &OpenOptions, subid: SubXactId) -> Result<DescId> {
        self.allocated.allocate_stream(path, options, self.max_safe_fds, subid)
    }

    pub fn free_file(&mut self, id: DescId) -> Result<()> {
        self.allocated.free(id)
    }

    pub fn allocate_dir(&mut self, path: &str, subid: SubXactId) -> Result<DescId> {
        match path::classify(path)? {
            Classification::Local => self.allocated.allocate_local_dir(path, self.max_safe_fds, subid),
            Classification::Remote(uri) => {
                let (protocol, host, port) = uri.endpoint();
                let endpoint = Endpoint::new(protocol, host, port);
                let connection: Arc<_> = self.pool.get_or_connect(&endpoint)?;
                self.allocated.allocate_remote_dir(connection, &uri.unix_path, self.max_safe_fds, subid)
            }
        }
    }

    pub fn read_dir(&mut self, id: DescId) -> Result<Option<DirEntry>> {
        self.allocated.read_dir(id)
    }

    pub fn free_dir(&mut self, id: DescId) -> Result<()> {
        self.allocated.free(id)
    }

    /// Closes every virtually-open VFD, local or remote, ignoring
    /// individual close errors — used when a host is tearing the whole
    /// layer down rather than ending one transaction.
    pub fn close_all_vfds(&mut self) {
        for index in self.cache.virtually_open_indices() {
            let file = self.cache.file_at(index);
            let _ = self.cache.close(file, self.config.fsync_method);
        }
    }

    pub fn at_eosubxact(&mut self, subid: SubXactId, parent: SubXactId, commit: bool) -> Result<()> {
        self.allocated.at_eosubxact(subid, parent, commit);
        self.temp_files.at_eosubxact(&mut self.cache, subid, parent, commit, self.config.fsync_method)
    }

    /// Top-level transaction end: closes every `CLOSE_AT_EOXACT` VFD and
    /// every allocated desc outright, commit or abort alike (`spec.md`
    /// §4.5).
    pub fn at_eoxact(&mut self) -> Result<()> {
        self.allocated.close_all();
        self.temp_files.at_eoxact(&mut self.cache, self.config.fsync_method)
    }

    pub fn at_xact_cancel(&mut self) {
        self.temp_files.at_xact_cancel(&mut self.cache, self.config.fsync_method);
    }

    /// Process exit hook: closes every `TEMPORARY`/`CLOSE_AT_EOXACT` VFD
    /// and every allocated desc, best-effort (`spec.md` §4.5).
    pub fn at_proc_exit(&mut self) {
        self.allocated.close_all();
        self.temp_files.at_proc_exit(&mut self.cache, self.config.fsync_method);
    }

    pub fn remove_pg_temp_files(&self) -> Result<usize> {
        temp_file::remove_pg_temp_files(&self.config)
    }
}

/// Removes a local path, recursing into directories only when asked —
/// `rmdir(2)` already refuses a non-empty directory, so the non-recursive
/// branch needs no extra check.
fn remove_local_path(path: &str, recursive: bool) -> Result<()> {
    let is_dir = std::fs::symlink_metadata(path).map_err(Error::from)?.is_dir();
    if is_dir {
        if recursive {
            std::fs::remove_dir_all(path).map_err(Error::from)
        } else {
            local::rmdir(path).map_err(Error::from)
        }
    } else {
        local::unlink(path).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::remote::test_double::{InMemoryRemoteFs, SingleEndpointConnector};
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;

    fn test_context(dir: &TempDir) -> Context {
        let config = Config {
            max_files_per_process: 1000,
            temp_tablespace_roots: vec![dir.path().to_path_buf()],
            fsync_method: Default::default(),
        };
        let fs = StdArc::new(InMemoryRemoteFs::new());
        let mut ctx = Context::new(config, Box::new(SingleEndpointConnector { fs }));
        ctx.set_max_safe_fds(32);
        ctx
    }

    #[test]
    fn opens_writes_reads_and_closes_a_local_file() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);
        let path = dir.path().join("a").to_str().unwrap().to_owned();

        let file = ctx.path_open(&path, libc::O_CREAT | libc::O_RDWR, 0o600, 0).unwrap();
        ctx.file_write(file, b"hello").unwrap();
        ctx.file_seek(file, 0, SeekFrom::Set).unwrap();
        let mut buf = [0u8; 5];
        let n = ctx.file_read(file, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        ctx.file_close(file).unwrap();
    }

    #[test]
    fn temporary_file_is_unlinked_on_close() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);

        let file = ctx
            .open_temporary_file("t1", 1234, None, true, true, false, 0)
            .unwrap();
        let path = ctx.cache.path(file).unwrap().to_owned();
        ctx.file_close(file).unwrap();
        assert!(!std::path::Path::new(&path).exists());
    }

    #[test]
    fn subtransaction_abort_closes_close_at_eoxact_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);

        let file = ctx
            .open_temporary_file("t2", 1234, None, true, true, true, 5)
            .unwrap();
        assert_eq!(ctx.cache.nfile(), 1);

        ctx.at_eosubxact(5, 0, false).unwrap();
        assert!(!ctx.cache.is_physically_open(file));
    }

    #[test]
    fn subtransaction_end_leaves_non_eoxact_temp_file_untouched() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);

        let file = ctx
            .open_temporary_file("t2b", 1234, None, true, true, false, 5)
            .unwrap();

        ctx.at_eosubxact(5, 0, false).unwrap();
        assert!(ctx.cache.is_physically_open(file));
        assert_eq!(ctx.cache.create_subid(file).unwrap(), 5);
        ctx.file_close(file).unwrap();
    }

    #[test]
    fn subtransaction_commit_reassigns_to_parent() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);

        let file = ctx
            .open_temporary_file("t3", 1234, None, true, false, true, 5)
            .unwrap();
        ctx.at_eosubxact(5, 2, true).unwrap();
        assert_eq!(ctx.cache.create_subid(file).unwrap(), 2);
        assert!(ctx.cache.is_physically_open(file));
    }

    #[test]
    fn eoxact_closes_allocated_descs_too() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);

        let _id = ctx.allocate_dir(dir.path().to_str().unwrap(), 0).unwrap();
        assert_eq!(ctx.allocated.len(), 1);

        ctx.at_eoxact().unwrap();
        assert_eq!(ctx.allocated.len(), 0);
    }

    #[test]
    fn remove_path_returns_nonzero_on_success_zero_on_failure() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);
        let path = dir.path().join("gone").to_str().unwrap().to_owned();
        std::fs::write(&path, b"x").unwrap();

        assert_ne!(ctx.remove_path(&path, false), 0);
        assert_eq!(ctx.remove_path(&path, false), 0);
    }

    #[test]
    fn remove_path_non_recursive_fails_on_nonempty_directory() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir);
        let victim = dir.path().join("victim");
        std::fs::create_dir(&victim).unwrap();
        std::fs::write(victim.join("child"), b"x").unwrap();
        let victim_str = victim.to_str().unwrap().to_owned();

        assert_eq!(ctx.remove_path(&victim_str, false), 0);
        assert!(victim.exists());
        assert_ne!(ctx.remove_path(&victim_str, true), 0);
        assert!(!victim.exists());
    }
}
