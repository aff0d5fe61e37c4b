//! The allocated-desc table: a small, fixed-capacity registry of scoped
//! stream and directory handles that are *not* VFDs — they hold a real
//! kernel descriptor (or, for remote directories, a pre-fetched listing)
//! for their entire lifetime and never participate in LRU eviction
//! (`spec.md` §4.4).

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::backend::remote::RemoteFs;
use crate::config::MAX_ALLOCATED_DESCS;
use crate::error::{Error, Result};
use crate::xact::SubXactId;

/// A scoped, non-VFD stream — analogous to a C `FILE*` returned by
/// `fopen`, for callers that want direct file-like access outside the
/// eviction-aware VFD cache.
pub struct Stream(fs::File);

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Seek for Stream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

/// A minimal directory entry, uniform across local and remote listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
}

enum Desc {
    LocalStream(Stream),
    LocalDir(fs::ReadDir),
    RemoteDir {
        connection: Arc<dyn RemoteFs>,
        entries: Vec<String>,
        cursor: usize,
    },
}

struct Entry {
    desc: Desc,
    created_subid: SubXactId,
}

/// A handle into the allocated-desc table.
///
/// Identifies a slot, not an array position: freeing one entry must never
/// shift another live entry's identity out from under a caller still
/// holding its `DescId` (the same arena-with-free-list discipline the VFD
/// cache uses, `spec.md` §9's Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescId(usize);

/// Fixed-capacity table of allocated streams and directory iterators.
///
/// Backed by a slot arena rather than a plain `Vec<Entry>`: the spec's
/// "compact by swapping in the tail" describes the original's
/// pointer-identified array, where compaction is invisible to callers that
/// hold a `FILE*`/`DIR*`, not an index. A `DescId` *is* the caller-visible
/// index here, so this table instead frees by punching a hole and relinks
/// it onto the free list — occupancy is still bounded by
/// [`MAX_ALLOCATED_DESCS`], just without inventing dangling handles.
pub struct AllocatedDescTable {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    len: usize,
}

impl AllocatedDescTable {
    pub fn new() -> Self {
        AllocatedDescTable { slots: Vec::new(), free: Vec::new(), len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_capacity(&self, max_safe_fds: usize) -> Result<()> {
        if self.len >= MAX_ALLOCATED_DESCS {
            return Err(Error::BudgetExhausted);
        }
        if max_safe_fds == 0 || self.len >= max_safe_fds - 1 {
            return Err(Error::BudgetExhausted);
        }
        Ok(())
    }

    fn insert(&mut self, entry: Entry) -> DescId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(entry);
            DescId(index)
        } else {
            self.slots.push(Some(entry));
            DescId(self.slots.len() - 1)
        }
    }

    /// Opens a buffered-style stream against `path`.
    pub fn allocate_stream(
        &mut self,
        path: impl AsRef<Path>,
        options: &fs::OpenOptions,
        max_safe_fds: usize,
        subid: SubXactId,
    ) -> Result<DescId> {
        self.check_capacity(max_safe_fds)?;
        let file = options.open(path)?;
        Ok(self.insert(Entry { desc: Desc::LocalStream(Stream(file)), created_subid: subid }))
    }

    /// Opens a local directory iterator.
    pub fn allocate_local_dir(
        &mut self,
        path: impl AsRef<Path>,
        max_safe_fds: usize,
        subid: SubXactId,
    ) -> Result<DescId> {
        self.check_capacity(max_safe_fds)?;
        let read_dir = fs::read_dir(path)?;
        Ok(self.insert(Entry { desc: Desc::LocalDir(read_dir), created_subid: subid }))
    }

    /// Opens a directory iterator over a remote listing, eagerly
    /// fetching the full listing up front (`spec.md` §4.4).
    pub fn allocate_remote_dir(
        &mut self,
        connection: Arc<dyn RemoteFs>,
        path: &str,
        max_safe_fds: usize,
        subid: SubXactId,
    ) -> Result<DescId> {
        self.check_capacity(max_safe_fds)?;
        let entries = connection.listdir(path)?;
        Ok(self.insert(Entry {
            desc: Desc::RemoteDir { connection, entries, cursor: 0 },
            created_subid: subid,
        }))
    }

    pub fn stream_mut(&mut self, id: DescId) -> Result<&mut Stream> {
        match &mut self.entry_mut(id)?.desc {
            Desc::LocalStream(stream) => Ok(stream),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Returns the next entry for a directory descriptor, or `None` at
    /// end of listing.
    pub fn read_dir(&mut self, id: DescId) -> Result<Option<DirEntry>> {
        match &mut self.entry_mut(id)?.desc {
            Desc::LocalDir(read_dir) => match read_dir.next() {
                Some(Ok(entry)) => Ok(Some(DirEntry { name: entry.file_name().to_string_lossy().into_owned() })),
                Some(Err(err)) => Err(err.into()),
                None => Ok(None),
            },
            Desc::RemoteDir { entries, cursor, .. } => {
                if *cursor >= entries.len() {
                    return Ok(None);
                }
                let full_path = &entries[*cursor];
                let name = full_path.rsplit('/').next().unwrap_or(full_path).to_owned();
                *cursor += 1;
                Ok(Some(DirEntry { name }))
            }
            Desc::LocalStream(_) => Err(Error::InvalidHandle),
        }
    }

    fn entry_mut(&mut self, id: DescId) -> Result<&mut Entry> {
        self.slots.get_mut(id.0).and_then(Option::as_mut).ok_or(Error::InvalidHandle)
    }

    /// Closes the underlying object and returns the slot to the free list.
    pub fn free(&mut self, id: DescId) -> Result<()> {
        match self.slots.get_mut(id.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.free.push(id.0);
                self.len -= 1;
                Ok(())
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Subtransaction end: entries created by `subid` are freed on abort,
    /// or reassigned to `parent` on commit (`spec.md` §4.5, "Same
    /// reassignment/close for allocated descs").
    pub fn at_eosubxact(&mut self, subid: SubXactId, parent: SubXactId, commit: bool) {
        let owned: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|e| e.created_subid == subid).map(|_| i))
            .collect();
        for index in owned {
            if commit {
                self.slots[index].as_mut().expect("just filtered").created_subid = parent;
            } else {
                self.slots[index] = None;
                self.free.push(index);
                self.len -= 1;
            }
        }
    }

    /// Closes every live entry, regardless of owning subtransaction —
    /// used by top-level transaction end and process exit alike
    /// (`spec.md` §4.5).
    pub fn close_all(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }
}

impl Default for AllocatedDescTable {
    fn default() -> Self {
        Self::new()
    }
}
