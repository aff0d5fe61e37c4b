//! The VFD cache: an arena of slots multiplexing unbounded logical file
//! handles over a bounded kernel fd budget, with LRU-driven eviction and
//! transparent re-open (`spec.md` §4.2).
//!
//! Every "pointer" here is a `File` index into the slot array rather than
//! an owning reference, so the array can grow by reallocation without
//! invalidating handles already handed out (Design Notes, `spec.md` §9).

mod slot;

pub use slot::{Backend, StateFlags, SEEK_UNKNOWN};

use std::num::NonZeroU32;
use std::os::unix::io::RawFd;

use slot::Slot;

use crate::backend::local;
use crate::backend::local::Whence;
use crate::backend::remote::RemoteHandle;
use crate::config::FsyncMethod;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, Endpoint};
use crate::xact::SubXactId;

/// The LRU ring sentinel / free-list root. Never a valid handle.
const SENTINEL: usize = 0;
const MIN_GROWTH: usize = 32;

/// An opaque handle decoupled from any OS file descriptor's lifetime.
///
/// Index 0 is reserved as the LRU ring sentinel and is never returned by
/// any allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct File(NonZeroU32);

impl File {
    fn from_index(index: usize) -> Self {
        File(NonZeroU32::new(index as u32).expect("slot index 0 is reserved"))
    }

    fn index(self) -> usize {
        self.0.get() as usize
    }
}

/// Whence for [`Cache::seek`].
pub use local::Whence as SeekFrom;

/// Parameters describing how a slot should be opened, shared by the
/// local and remote open paths.
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest {
    pub flags: i32,
    pub mode: u32,
}

pub struct Cache {
    slots: Vec<Slot>,
    /// Count of physically-open local slots — the LRU ring's length
    /// (invariant 5).
    nfile: usize,
}

impl Cache {
    pub fn new() -> Self {
        Cache { slots: vec![Slot::free()], nfile: 0 }
    }

    pub fn nfile(&self) -> usize {
        self.nfile
    }

    /// `true` if `file` refers to a physically-open slot.
    pub fn is_physically_open(&self, file: File) -> bool {
        self.slots.get(file.index()).is_some_and(Slot::is_physically_open)
    }

    pub fn seek_pos(&self, file: File) -> Result<i64> {
        Ok(self.slot(file)?.seek_pos)
    }

    pub fn path(&self, file: File) -> Result<&str> {
        Ok(self.slot(file)?.path.as_deref().expect("virtually open slot has a path"))
    }

    fn slot(&self, file: File) -> Result<&Slot> {
        self.slots.get(file.index()).filter(|s| s.is_virtually_open()).ok_or(Error::InvalidHandle)
    }

    fn slot_mut(&mut self, file: File) -> Result<&mut Slot> {
        self.slots
            .get_mut(file.index())
            .filter(|s| s.is_virtually_open())
            .ok_or(Error::InvalidHandle)
    }

    // ---- slot lifecycle -------------------------------------------------

    /// Allocates a free slot, growing the array (by doubling, minimum 32)
    /// if the free list is empty. Returns the new slot's index.
    ///
    /// Growth must happen *after* any remote handle/connection the caller
    /// needs has already been acquired — the remote open path may itself
    /// recursively allocate a metadata VFD, and that recursive allocation
    /// must not observe a half-initialized slot for the handle being
    /// opened (`spec.md` §4.2, Growth).
    fn allocate_vfd(&mut self) -> usize {
        if self.slots[SENTINEL].next_free == 0 {
            self.grow();
        }
        let index = self.slots[SENTINEL].next_free;
        self.slots[SENTINEL].next_free = self.slots[index].next_free;
        index
    }

    fn grow(&mut self) {
        let old_len = self.slots.len();
        let new_len = std::cmp::max(MIN_GROWTH, old_len * 2);
        self.slots.reserve(new_len - old_len);
        for i in old_len..new_len {
            let mut slot = Slot::free();
            slot.next_free = if i + 1 < new_len { i + 1 } else { 0 };
            self.slots.push(slot);
        }
        // Chain the new run onto the existing free list, starting from
        // whatever slot[0].next_free already pointed at (0 means "free
        // list was empty").
        let previous_head = self.slots[SENTINEL].next_free;
        if previous_head == 0 {
            self.slots[SENTINEL].next_free = old_len;
        } else {
            // Walk to the tail of the existing chain and splice the new
            // run on. Existing chain is short-lived (population bounded
            // by prior allocations), so a linear walk is acceptable.
            let mut cursor = previous_head;
            loop {
                let next = self.slots[cursor].next_free;
                if next == 0 {
                    self.slots[cursor].next_free = old_len;
                    break;
                }
                cursor = next;
            }
        }
    }

    fn free_vfd(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.path = None;
        slot.backend = Backend::Local { fd: None };
        slot.state_flags = StateFlags::empty();
        slot.seek_pos = SEEK_UNKNOWN;
        slot.next_free = self.slots[SENTINEL].next_free;
        self.slots[SENTINEL].next_free = index;
    }

    // ---- LRU ring ---------------------------------------------------------

    fn lru_remove(&mut self, index: usize) {
        let (prev, next) = (self.slots[index].lru_less_recent, self.slots[index].lru_more_recent);
        self.slots[prev].lru_more_recent = next;
        self.slots[next].lru_less_recent = prev;
        self.nfile -= 1;
    }

    /// Inserts at the most-recent end. Debug-asserts the caller already
    /// excluded remote slots — the ring must never contain one
    /// (invariant 4), and gating that in one place here prevents the
    /// duplicated guard the original design flagged (`spec.md` §9).
    fn lru_insert_head(&mut self, index: usize) {
        debug_assert!(!self.slots[index].backend.is_remote(), "remote slots never join the LRU ring");
        let old_head = self.slots[SENTINEL].lru_more_recent;
        self.slots[index].lru_more_recent = old_head;
        self.slots[index].lru_less_recent = SENTINEL;
        self.slots[old_head].lru_less_recent = index;
        self.slots[SENTINEL].lru_more_recent = index;
        self.nfile += 1;
    }

    fn lru_is_empty(&self) -> bool {
        self.slots[SENTINEL].lru_less_recent == SENTINEL
    }

    fn lru_least_recent(&self) -> usize {
        self.slots[SENTINEL].lru_less_recent
    }

    fn lru_is_head(&self, index: usize) -> bool {
        self.slots[SENTINEL].lru_more_recent == index
    }

    /// Evicts the least-recently-used slot, preserving its virtual-open
    /// state and restoring `seek_pos` from the back-end first
    /// (`spec.md` §4.2, "Eviction").
    fn release_lru_file(&mut self, fsync: FsyncMethod) -> Result<bool> {
        let _ = fsync;
        if self.lru_is_empty() {
            return Ok(false);
        }
        let index = self.lru_least_recent();
        let pos = match &self.slots[index].backend {
            Backend::Local { fd } => local::tell(fd.expect("ring entries are physically open"))?,
            Backend::Remote { .. } => unreachable!("remote slots never join the LRU ring"),
        };
        debug_assert!(pos >= 0);
        self.lru_remove(index);
        self.slots[index].seek_pos = pos;
        if let Backend::Local { fd } = &mut self.slots[index].backend {
            let raw = fd.take().expect("checked physically open above");
            local::close(raw)?;
        }
        tracing::debug!(slot = index, seek_pos = pos, "evicted VFD slot from LRU ring");
        Ok(true)
    }

    /// Evicts entries while the budget would otherwise be exceeded.
    /// Returns an error only if the budget still cannot be satisfied
    /// after the ring is fully drained.
    fn make_room(&mut self, allocated_descs: usize, max_safe_fds: usize, fsync: FsyncMethod) -> Result<()> {
        while self.nfile + allocated_descs >= max_safe_fds {
            if !self.release_lru_file(fsync)? {
                if self.nfile + allocated_descs >= max_safe_fds {
                    return Err(Error::BudgetExhausted);
                }
                break;
            }
        }
        Ok(())
    }

    // ---- open -------------------------------------------------------------

    /// Opens a local path, evicting to make room, then calling the
    /// back-end open with one EMFILE/ENFILE retry after an eviction
    /// (`spec.md` §4.3's `BasicOpen`).
    pub fn open_local(
        &mut self,
        path: &str,
        request: OpenRequest,
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<File> {
        self.make_room(allocated_descs, max_safe_fds, fsync)?;

        let fd = match local::open(path, request.flags, request.mode) {
            Ok(fd) => fd,
            Err(err) if Error::is_fd_exhaustion(&err) && self.release_lru_file(fsync)? => {
                local::open(path, request.flags, request.mode)?
            }
            Err(err) => return Err(err.into()),
        };

        let index = self.allocate_vfd();
        let slot = &mut self.slots[index];
        slot.path = Some(path.to_owned());
        slot.backend = Backend::Local { fd: Some(fd) };
        slot.open_flags = crate::backend::sanitize_for_reopen(request.flags, false);
        slot.open_mode = request.mode;
        slot.seek_pos = 0;
        slot.state_flags = StateFlags::empty();
        self.lru_insert_head(index);
        Ok(File::from_index(index))
    }

    /// Opens a remote path. The connection and remote handle are
    /// acquired *before* the VFD slot is allocated, so that a metadata
    /// open triggered internally by the remote open (which may itself
    /// grow the array) cannot invalidate the slot we are about to fill
    /// in (`spec.md` §4.2, Growth).
    pub fn open_remote(
        &mut self,
        endpoint: Endpoint,
        protocol: &str,
        unix_path: &str,
        request: OpenRequest,
        replica: u32,
        pool: &mut ConnectionPool,
        allocated_descs: usize,
        max_safe_fds: usize,
    ) -> Result<File> {
        let connection = pool.get_or_connect(&endpoint)?;
        let create = request.flags & libc::O_CREAT != 0;
        let handle = if create {
            connection.open(unix_path, request.flags, 0, replica)?
        } else {
            connection.open(unix_path, request.flags, 0, 0)?
        };
        if create {
            connection.sync(handle)?;
            connection.chmod(unix_path, request.mode)?;
        }

        // Allocated-desc accounting still applies to remote handles, but
        // they never join the LRU ring, so no room-making is needed here
        // beyond what the allocated-desc table itself enforces.
        let _ = (allocated_descs, max_safe_fds);

        let index = self.allocate_vfd();
        let slot = &mut self.slots[index];
        slot.path = Some(unix_path.to_owned());
        slot.open_flags = crate::backend::sanitize_for_reopen(request.flags, true);
        slot.open_mode = request.mode;
        slot.seek_pos = 0;
        slot.state_flags = StateFlags::empty();
        slot.backend = Backend::Remote {
            connection,
            endpoint,
            protocol: protocol.to_owned(),
            handle: Some(handle),
        };
        Ok(File::from_index(index))
    }

    // ---- the re-open protocol ----------------------------------------------

    /// Ensures `file` is physically open, evicting and re-opening as
    /// needed, and restoring position per `spec.md` §4.2's `file_access`.
    pub fn file_access(
        &mut self,
        file: File,
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<()> {
        let index = file.index();
        self.slot(file)?;

        if self.slots[index].is_physically_open() {
            if !self.slots[index].backend.is_remote() && !self.lru_is_head(index) {
                self.lru_remove(index);
                self.lru_insert_head(index);
            }
            return Ok(());
        }

        self.make_room(allocated_descs, max_safe_fds, fsync)?;

        let path = self.slots[index].path.clone().expect("virtually open");
        let flags = self.slots[index].open_flags;
        let mode = self.slots[index].open_mode;
        let seek_pos = self.slots[index].seek_pos;

        match &mut self.slots[index].backend {
            Backend::Local { fd } => {
                let new_fd = local::open(&path, flags, mode).map_err(Error::ReopenFailed)?;
                if let Err(err) = local::lseek(new_fd, seek_pos, Whence::Set) {
                    let _ = local::close(new_fd);
                    return Err(Error::ReopenFailed(err));
                }
                *fd = Some(new_fd);
                self.lru_insert_head(index);
            }
            Backend::Remote { connection, handle, .. } => {
                let new_handle = connection.open(&path, flags, mode, 0).map_err(Error::ReopenFailed)?;
                let write_opened = flags & libc::O_ACCMODE != libc::O_RDONLY;
                if write_opened {
                    debug_assert!(flags & libc::O_APPEND != 0, "remote writers are re-opened append-only");
                    let actual = connection.tell(new_handle).map_err(Error::ReopenFailed)?;
                    if actual != seek_pos {
                        let _ = connection.close(new_handle);
                        return Err(Error::PositionMismatch { expected: seek_pos, actual });
                    }
                } else if let Err(err) = connection.seek(new_handle, seek_pos) {
                    let _ = connection.close(new_handle);
                    return Err(Error::ReopenFailed(err));
                }
                *handle = Some(new_handle);
                tracing::debug!(slot = index, "re-opened remote VFD after eviction");
            }
        }
        Ok(())
    }

    // ---- I/O ----------------------------------------------------------------

    pub fn read(
        &mut self,
        file: File,
        buf: &mut [u8],
        retry: bool,
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<usize> {
        self.file_access(file, allocated_descs, max_safe_fds, fsync)?;
        let index = file.index();
        let result = match &self.slots[index].backend {
            Backend::Local { fd } => local::read(fd.expect("physically open"), buf, retry),
            Backend::Remote { connection, handle, .. } => {
                connection.read(handle.expect("physically open"), buf)
            }
        };
        self.after_io(index, result)
    }

    pub fn write(
        &mut self,
        file: File,
        buf: &[u8],
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<usize> {
        self.file_access(file, allocated_descs, max_safe_fds, fsync)?;
        let index = file.index();
        let result = match &self.slots[index].backend {
            Backend::Local { fd } => local::write(fd.expect("physically open"), buf),
            Backend::Remote { connection, handle, .. } => {
                connection.write(handle.expect("physically open"), buf)
            }
        };
        let result = result.map(|n| {
            if n < buf.len() {
                // Short write with no error is promoted to ENOSPC
                // (`spec.md` §4.2).
                Err(std::io::Error::from_raw_os_error(libc::ENOSPC))
            } else {
                Ok(n)
            }
        });
        let result = match result {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(err)) | Err(err) => Err(err),
        };
        self.after_io(index, result)
    }

    fn after_io(&mut self, index: usize, result: std::io::Result<usize>) -> Result<usize> {
        match result {
            Ok(n) => {
                self.slots[index].seek_pos = self.slots[index].seek_pos.saturating_add(n as i64);
                Ok(n)
            }
            Err(err) => {
                self.slots[index].seek_pos = SEEK_UNKNOWN;
                Err(err.into())
            }
        }
    }

    pub fn seek(
        &mut self,
        file: File,
        offset: i64,
        whence: Whence,
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<i64> {
        self.file_access(file, allocated_descs, max_safe_fds, fsync)?;
        let index = file.index();
        let write_opened = self.slots[index].open_flags & libc::O_ACCMODE != libc::O_RDONLY;
        let result = match &self.slots[index].backend {
            Backend::Local { fd } => local::lseek(fd.expect("physically open"), offset, whence),
            Backend::Remote { connection, handle, .. } => match whence {
                Whence::End => {
                    let path = self.slots[index].path.clone().expect("virtually open");
                    connection.stat(&path).map(|st| st.size + offset)
                }
                Whence::Set | Whence::Current if write_opened => {
                    // Remote write handles have no true in-place seek —
                    // the façade still maintains the logical position
                    // for re-open checks, but does not call the
                    // back-end (`spec.md` §4.3).
                    let target = if whence == Whence::Set {
                        offset
                    } else {
                        self.slots[index].seek_pos + offset
                    };
                    Ok(target)
                }
                Whence::Set => connection.seek(handle.expect("physically open"), offset),
                Whence::Current => {
                    let target = self.slots[index].seek_pos + offset;
                    connection.seek(handle.expect("physically open"), target)
                }
            },
        };
        match result {
            Ok(pos) => {
                self.slots[index].seek_pos = pos;
                Ok(pos)
            }
            Err(err) => {
                self.slots[index].seek_pos = SEEK_UNKNOWN;
                Err(err.into())
            }
        }
    }

    pub fn tell(
        &mut self,
        file: File,
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<i64> {
        self.file_access(file, allocated_descs, max_safe_fds, fsync)?;
        Ok(self.slots[file.index()].seek_pos)
    }

    pub fn sync(
        &mut self,
        file: File,
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<()> {
        self.file_access(file, allocated_descs, max_safe_fds, fsync)?;
        let index = file.index();
        match &self.slots[index].backend {
            Backend::Local { fd } => local::fsync(fd.expect("physically open"), fsync)?,
            Backend::Remote { connection, handle, .. } => {
                connection.sync(handle.expect("physically open"))?
            }
        }
        Ok(())
    }

    /// Truncate. For remote slots this closes the handle, truncates by
    /// path, re-opens for append, and verifies the new position
    /// (`spec.md` §4.3).
    pub fn truncate(
        &mut self,
        file: File,
        len: i64,
        allocated_descs: usize,
        max_safe_fds: usize,
        fsync: FsyncMethod,
    ) -> Result<()> {
        self.file_access(file, allocated_descs, max_safe_fds, fsync)?;
        let index = file.index();
        let path = self.slots[index].path.clone().expect("virtually open");
        let open_flags = self.slots[index].open_flags;
        let open_mode = self.slots[index].open_mode;
        match &mut self.slots[index].backend {
            Backend::Local { fd } => {
                local::ftruncate(fd.expect("physically open"), len)?;
            }
            Backend::Remote { connection, handle, .. } => {
                connection.close(handle.take().expect("physically open"))?;
                connection.truncate(&path, len)?;
                let new_handle = connection.open(&path, open_flags, open_mode, 0)?;
                let actual = connection.tell(new_handle)?;
                if actual != len {
                    let _ = connection.close(new_handle);
                    return Err(Error::PositionMismatch { expected: len, actual }.into());
                }
                *handle = Some(new_handle);
            }
        }
        self.slots[index].seek_pos = len;
        Ok(())
    }

    // ---- close / unlink ------------------------------------------------------

    /// Closes `file`: releases any physically-open resource, unlinks the
    /// path if `TEMPORARY` is set (errors logged, not fatal), and frees
    /// the slot.
    pub fn close(&mut self, file: File, fsync: FsyncMethod) -> Result<()> {
        let _ = fsync;
        let index = file.index();
        self.slot(file)?;

        if self.slots[index].is_physically_open() {
            match &mut self.slots[index].backend {
                Backend::Local { fd } => {
                    let raw = fd.take();
                    self.lru_remove(index);
                    if let Some(raw) = raw {
                        local::close(raw)?;
                    }
                }
                Backend::Remote { connection, handle, .. } => {
                    if let Some(h) = handle.take() {
                        connection.close(h)?;
                    }
                }
            }
        }

        if self.slots[index].state_flags.contains(StateFlags::TEMPORARY) {
            let path = self.slots[index].path.clone().expect("virtually open");
            let result = match &self.slots[index].backend {
                Backend::Local { .. } => local::unlink(&path),
                Backend::Remote { connection, .. } => connection.delete(&path),
            };
            if let Err(err) = result {
                tracing::warn!(path = %path, error = %err, "failed to unlink temporary file on close");
            }
        }

        self.free_vfd(index);
        Ok(())
    }

    /// Forces `TEMPORARY` then closes.
    pub fn unlink(&mut self, file: File, fsync: FsyncMethod) -> Result<()> {
        self.slot_mut(file)?.state_flags.insert(StateFlags::TEMPORARY);
        self.close(file, fsync)
    }

    /// Forces every physically-open local slot to kernel-closed state,
    /// preserving virtual-open state and seek position.
    pub fn close_all_kernel_fds(&mut self, fsync: FsyncMethod) -> Result<()> {
        while self.release_lru_file(fsync)? {}
        Ok(())
    }

    // ---- construction helpers used by higher layers --------------------------

    pub fn set_state_flags(&mut self, file: File, flags: StateFlags) -> Result<()> {
        self.slot_mut(file)?.state_flags.insert(flags);
        Ok(())
    }

    pub fn state_flags(&self, file: File) -> Result<StateFlags> {
        Ok(self.slot(file)?.state_flags)
    }

    pub fn set_create_subid(&mut self, file: File, subid: SubXactId) -> Result<()> {
        self.slot_mut(file)?.create_subid = subid;
        Ok(())
    }

    pub fn create_subid(&self, file: File) -> Result<SubXactId> {
        Ok(self.slot(file)?.create_subid)
    }

    /// Iterates every currently virtually-open slot's index, for
    /// transaction/process-exit cleanup passes. Safe to call `close` or
    /// `free_vfd` on entries returned here only after collecting them —
    /// the caller must snapshot into a `Vec` first.
    pub fn virtually_open_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, s)| s.is_virtually_open())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn file_at(&self, index: usize) -> File {
        File::from_index(index)
    }

    pub fn is_remote(&self, file: File) -> Result<bool> {
        Ok(self.slot(file)?.backend.is_remote())
    }

    /// Closes a remote handle directly without surfacing back-end
    /// errors — used by the abort-time remote-close pass, which must not
    /// itself fail if the endpoint is unreachable (`spec.md` §4.5).
    pub fn close_remote_ignoring_errors(&mut self, file: File) {
        let index = file.index();
        if let Backend::Remote { connection, handle, .. } = &mut self.slots[index].backend {
            if let Some(h) = handle.take() {
                if let Err(err) = connection.close(h) {
                    tracing::warn!(slot = index, error = %err, "ignored remote close error during abort");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn free_list_len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.slots[SENTINEL].next_free;
        while cursor != 0 {
            count += 1;
            cursor = self.slots[cursor].next_free;
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// A remote handle/connection pair, exposed read-only for diagnostics.
pub fn remote_handle(cache: &Cache, file: File) -> Option<RemoteHandle> {
    match &cache.slots[file.index()].backend {
        Backend::Remote { handle, .. } => *handle,
        Backend::Local { .. } => None,
    }
}

pub fn raw_fd(cache: &Cache, file: File) -> Option<RawFd> {
    match &cache.slots[file.index()].backend {
        Backend::Local { fd } => *fd,
        Backend::Remote { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::remote::test_double::{InMemoryRemoteFs, SingleEndpointConnector};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_req(flags: i32, mode: u32) -> OpenRequest {
        OpenRequest { flags, mode }
    }

    #[test]
    fn growth_preserves_existing_slots_and_free_list_invariant() {
        let mut cache = Cache::new();
        assert_eq!(cache.capacity(), 1);
        cache.allocate_vfd();
        assert!(cache.capacity() >= MIN_GROWTH);
    }

    #[test]
    fn lru_eviction_round_trip() {
        let dir = TempDir::new().unwrap();
        let fsync = FsyncMethod::Fsync;
        let mut cache = Cache::new();

        let max_safe_fds = 3;
        let path_a = dir.path().join("a").to_str().unwrap().to_owned();
        let path_b = dir.path().join("b").to_str().unwrap().to_owned();
        let path_c = dir.path().join("c").to_str().unwrap().to_owned();
        let path_d = dir.path().join("d").to_str().unwrap().to_owned();

        let flags = libc::O_CREAT | libc::O_RDWR;
        let a = cache.open_local(&path_a, open_req(flags, 0o600), 0, max_safe_fds, fsync).unwrap();
        let b = cache.open_local(&path_b, open_req(flags, 0o600), 0, max_safe_fds, fsync).unwrap();
        let c = cache.open_local(&path_c, open_req(flags, 0o600), 0, max_safe_fds, fsync).unwrap();
        assert_eq!(cache.nfile(), 3);

        cache.write(a, b"hello", 0, max_safe_fds, fsync).unwrap();

        // B is now least-recently-used (A was just touched by the write).
        let _d = cache.open_local(&path_d, open_req(flags, 0o600), 0, max_safe_fds, fsync).unwrap();
        assert_eq!(cache.nfile(), 3);
        assert!(!cache.is_physically_open(b));

        cache.seek(a, 0, Whence::Set, 0, max_safe_fds, fsync).unwrap();
        let mut buf = [0u8; 5];
        let n = cache.read(a, &mut buf, false, 0, max_safe_fds, fsync).unwrap();
        assert_eq!(&buf[..n], b"hello");

        cache.close(a, fsync).unwrap();
        cache.close(b, fsync).unwrap();
        cache.close(c, fsync).unwrap();
        cache.close(_d, fsync).unwrap();
    }

    #[test]
    fn write_short_count_promotes_enospc() {
        let remote = Arc::new(InMemoryRemoteFs::new());
        let mut pool = ConnectionPool::new(Box::new(SingleEndpointConnector { fs: remote.clone() }));
        let mut cache = Cache::new();

        let endpoint = Endpoint::new("hdfs", "h", 9000);
        let flags = libc::O_CREAT | libc::O_WRONLY | libc::O_APPEND;
        let file = cache
            .open_remote(endpoint, "hdfs", "/f", open_req(flags, 0o644), 3, &mut pool, 0, 1000)
            .unwrap();

        remote.force_next_write_short(3);
        let err = cache.write(file, b"0123456789", 0, 1000, FsyncMethod::Fsync).unwrap_err();
        match err {
            Error::BackendIo(io_err) => assert_eq!(io_err.raw_os_error(), Some(libc::ENOSPC)),
            other => panic!("expected BackendIo(ENOSPC), got {other:?}"),
        }
        // The partial bytes were still durably accepted by the back-end,
        // so seek_pos is marked unknown rather than silently advanced.
        assert_eq!(cache.seek_pos(file).unwrap(), SEEK_UNKNOWN);
    }

    #[test]
    fn remote_open_and_append_reopen_roundtrip() {
        let remote = Arc::new(InMemoryRemoteFs::new());
        let mut pool = ConnectionPool::new(Box::new(SingleEndpointConnector { fs: remote.clone() }));
        let mut cache = Cache::new();

        let endpoint = Endpoint::new("hdfs", "h", 9000);
        let flags = libc::O_CREAT | libc::O_WRONLY | libc::O_APPEND;
        let file = cache
            .open_remote(endpoint.clone(), "hdfs", "/f", open_req(flags, 0o644), 3, &mut pool, 0, 1000)
            .unwrap();

        cache.write(file, b"0123456789", 0, 1000, FsyncMethod::Fsync).unwrap();
        assert_eq!(cache.seek_pos(file).unwrap(), 10);

        // Simulate eviction by directly closing the remote handle the
        // way `release_lru_file` would, without an LRU entry (remote
        // slots never join the ring).
        cache.close_remote_ignoring_errors(file);

        // Re-access should reopen append-only and match the stored
        // position.
        cache.file_access(file, 0, 1000, FsyncMethod::Fsync).unwrap();
        assert!(cache.is_physically_open(file));
    }

    #[test]
    fn remote_reopen_fails_on_out_of_band_extension() {
        let remote = Arc::new(InMemoryRemoteFs::new());
        let mut pool = ConnectionPool::new(Box::new(SingleEndpointConnector { fs: remote.clone() }));
        let mut cache = Cache::new();

        let endpoint = Endpoint::new("hdfs", "h", 9000);
        let flags = libc::O_CREAT | libc::O_WRONLY | libc::O_APPEND;
        let file = cache
            .open_remote(endpoint, "hdfs", "/f", open_req(flags, 0o644), 3, &mut pool, 0, 1000)
            .unwrap();
        cache.write(file, b"0123456789", 0, 1000, FsyncMethod::Fsync).unwrap();
        cache.close_remote_ignoring_errors(file);

        remote.extend_out_of_band("/f", b"xxxxx");

        let err = cache.file_access(file, 0, 1000, FsyncMethod::Fsync).unwrap_err();
        assert!(matches!(err, Error::PositionMismatch { .. }));
    }
}
