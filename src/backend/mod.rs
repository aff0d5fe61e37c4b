//! Back-end adapters: local POSIX and remote, behind the same
//! open/read/write/seek/close/sync/truncate/stat/mkdir/unlink contract
//! (`spec.md` §4.3). The façade and VFD cache dispatch between the two by
//! reading the owning slot's tag; this module only supplies the
//! primitives each side calls.

pub mod local;
pub mod remote;

/// Strips `O_CREAT`/`O_TRUNC`/`O_EXCL` from flags saved for re-open —
/// a re-open must never recreate, retruncate, or exclusively-fail an
/// already-successfully-opened file (`spec.md` §4.2, invariant I5).
pub fn sanitize_for_reopen(flags: i32, remote: bool) -> i32 {
    let mut sanitized = flags & !(libc::O_CREAT | libc::O_TRUNC | libc::O_EXCL);
    if remote && is_write_flags(flags) {
        // Deliberate, and in this order: remote slots opened for writing
        // are re-opened in append mode, because the remote back-end has
        // no true in-place seek-and-overwrite. This makes remote slots
        // unusable for non-appending writes — see DESIGN.md.
        sanitized |= libc::O_APPEND;
    }
    sanitized
}

fn is_write_flags(flags: i32) -> bool {
    let access_mode = flags & libc::O_ACCMODE;
    access_mode == libc::O_WRONLY || access_mode == libc::O_RDWR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_create_trunc_excl() {
        let flags = libc::O_CREAT | libc::O_TRUNC | libc::O_EXCL | libc::O_RDWR;
        let sanitized = sanitize_for_reopen(flags, false);
        assert_eq!(sanitized & libc::O_CREAT, 0);
        assert_eq!(sanitized & libc::O_TRUNC, 0);
        assert_eq!(sanitized & libc::O_EXCL, 0);
    }

    #[test]
    fn forces_append_for_remote_write() {
        let flags = libc::O_CREAT | libc::O_WRONLY;
        let sanitized = sanitize_for_reopen(flags, true);
        assert_ne!(sanitized & libc::O_APPEND, 0);
    }

    #[test]
    fn does_not_force_append_for_local_write() {
        let flags = libc::O_CREAT | libc::O_WRONLY;
        let sanitized = sanitize_for_reopen(flags, false);
        assert_eq!(sanitized & libc::O_APPEND, 0);
    }

    #[test]
    fn does_not_force_append_for_remote_read_only() {
        let flags = libc::O_RDONLY;
        let sanitized = sanitize_for_reopen(flags, true);
        assert_eq!(sanitized & libc::O_APPEND, 0);
    }
}
