//! The VFD slot: one entry in the cache's array, and the bits of state
//! that travel with a logical file handle across eviction and re-open.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use bitflags::bitflags;

use crate::backend::remote::{RemoteFs, RemoteHandle};
use crate::pool::Endpoint;
use crate::xact::SubXactId;

/// Sentinel `seek_pos` meaning "unknown — an explicit seek is required
/// before the next read/write" (`spec.md` §3, invariant 7).
pub const SEEK_UNKNOWN: i64 = -1;

bitflags! {
    /// Per-slot lifecycle flags (`spec.md` §3's `state_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u8 {
        /// Unlink the underlying path on close.
        const TEMPORARY = 0b0000_0001;
        /// Close this VFD (not necessarily the file) at the end of the
        /// transaction that created it.
        const CLOSE_AT_EOXACT = 0b0000_0010;
    }
}

/// What a slot's open resource actually is — the "polymorphic back-end"
/// tag the façade and cache dispatch on (Design Notes in `spec.md` §9).
pub enum Backend {
    Local {
        /// `None` when kernel-closed (slot is virtually-open only).
        fd: Option<RawFd>,
    },
    Remote {
        connection: Arc<dyn RemoteFs>,
        endpoint: Endpoint,
        protocol: String,
        /// `None` when physically closed.
        handle: Option<RemoteHandle>,
    },
}

impl Backend {
    pub fn is_remote(&self) -> bool {
        matches!(self, Backend::Remote { .. })
    }

    pub fn is_physically_open(&self) -> bool {
        match self {
            Backend::Local { fd } => fd.is_some(),
            Backend::Remote { handle, .. } => handle.is_some(),
        }
    }
}

/// One entry in the VFD slot array.
///
/// A slot is *free* iff `path.is_none()` (invariant 1); *virtually open*
/// iff `path.is_some()` (invariant 2); *physically open* iff virtually
/// open and its backend reports a live descriptor/handle (invariant 3).
pub struct Slot {
    pub path: Option<String>,
    pub backend: Backend,
    pub state_flags: StateFlags,
    pub create_subid: SubXactId,
    /// Free-list link; meaningful only while the slot is free.
    pub next_free: usize,
    /// LRU ring links; meaningful only while physically open and local
    /// (invariant 4 — remote slots never join the ring).
    pub lru_more_recent: usize,
    pub lru_less_recent: usize,
    /// Logical byte offset, authoritative while kernel-closed, or
    /// [`SEEK_UNKNOWN`].
    pub seek_pos: i64,
    /// Flags sanitized for re-open (`spec.md` §4.2).
    pub open_flags: i32,
    pub open_mode: u32,
}

impl Slot {
    /// A fresh, free slot — used to populate newly grown array tail
    /// entries and the index-0 sentinel.
    pub fn free() -> Self {
        Slot {
            path: None,
            backend: Backend::Local { fd: None },
            state_flags: StateFlags::empty(),
            create_subid: 0,
            next_free: 0,
            lru_more_recent: 0,
            lru_less_recent: 0,
            seek_pos: SEEK_UNKNOWN,
            open_flags: 0,
            open_mode: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.path.is_none()
    }

    pub fn is_virtually_open(&self) -> bool {
        self.path.is_some()
    }

    pub fn is_physically_open(&self) -> bool {
        self.is_virtually_open() && self.backend.is_physically_open()
    }
}
