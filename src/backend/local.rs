//! Thin wrappers over the POSIX primitives the local adapter drives
//! directly (`open`, `read`, `write`, `lseek64`, `fsync`, `close`, ...).
//!
//! Kept free of any VFD-cache concerns (eviction, slots, LRU) so the
//! retry/EINTR/ENOSPC policy in `spec.md` §4.3 lives in exactly one place.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use crate::config::FsyncMethod;

/// Seek origin, mirroring `lseek64`'s three whences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    fn to_libc(self) -> i32 {
        match self {
            Whence::Set => libc::SEEK_SET,
            Whence::Current => libc::SEEK_CUR,
            Whence::End => libc::SEEK_END,
        }
    }
}

fn cpath(path: &str) -> io::Result<CString> {
    CString::new(path).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
}

fn last_error() -> io::Error {
    io::Error::last_os_error()
}

/// `open(2)`. Does not retry on `EMFILE`/`ENFILE` — the cache decides
/// whether to evict and retry, since only it knows whether eviction is
/// possible.
pub fn open(path: &str, flags: i32, mode: u32) -> io::Result<RawFd> {
    let c_path = cpath(path)?;
    let fd = unsafe { libc::open(c_path.as_ptr(), flags, mode as libc::mode_t) };
    if fd < 0 {
        return Err(last_error());
    }
    Ok(fd)
}

/// `read(2)`, retrying once on `EINTR` when `retry` is set.
pub fn read(fd: RawFd, buf: &mut [u8], retry: bool) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = last_error();
        if retry && crate::error::Error::is_eintr(&err) {
            continue;
        }
        return Err(err);
    }
}

/// `write(2)`, retrying unconditionally on `EINTR` (per `spec.md` §5, a
/// caller never opts out of this one).
pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = last_error();
        if crate::error::Error::is_eintr(&err) {
            continue;
        }
        return Err(err);
    }
}

/// `lseek64` (via `libc::lseek` on 64-bit-offset targets).
pub fn lseek(fd: RawFd, offset: i64, whence: Whence) -> io::Result<i64> {
    let pos = unsafe { libc::lseek(fd, offset as libc::off_t, whence.to_libc()) };
    if pos < 0 {
        return Err(last_error());
    }
    Ok(pos as i64)
}

/// `lseek(fd, 0, SEEK_CUR)`.
pub fn tell(fd: RawFd) -> io::Result<i64> {
    lseek(fd, 0, Whence::Current)
}

pub fn ftruncate(fd: RawFd, len: i64) -> io::Result<()> {
    let rc = unsafe { libc::ftruncate(fd, len as libc::off_t) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

pub fn fsync(fd: RawFd, method: FsyncMethod) -> io::Result<()> {
    let rc = match method {
        FsyncMethod::Fsync => unsafe { libc::fsync(fd) },
        FsyncMethod::Fdatasync => unsafe { libc::fdatasync(fd) },
        FsyncMethod::WriteThrough => 0,
    };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

/// `close(2)`, retrying on `EINTR` (per `spec.md` §4.3/§5).
pub fn close(fd: RawFd) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::close(fd) };
        if rc == 0 {
            return Ok(());
        }
        let err = last_error();
        if crate::error::Error::is_eintr(&err) {
            continue;
        }
        return Err(err);
    }
}

/// `dup(2)`, used only by the FD budget probe.
pub fn dup(fd: RawFd) -> io::Result<RawFd> {
    let new_fd = unsafe { libc::dup(fd) };
    if new_fd < 0 {
        return Err(last_error());
    }
    Ok(new_fd)
}

pub fn mkdir(path: &str, mode: u32) -> io::Result<()> {
    let c_path = cpath(path)?;
    let rc = unsafe { libc::mkdir(c_path.as_ptr(), mode as libc::mode_t) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

pub fn unlink(path: &str) -> io::Result<()> {
    let c_path = cpath(path)?;
    let rc = unsafe { libc::unlink(c_path.as_ptr()) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

/// `rmdir(2)` — fails on a non-empty directory, unlike recursive removal.
pub fn rmdir(path: &str) -> io::Result<()> {
    let c_path = cpath(path)?;
    let rc = unsafe { libc::rmdir(c_path.as_ptr()) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

pub fn chmod(path: &str, mode: u32) -> io::Result<()> {
    let c_path = cpath(path)?;
    let rc = unsafe { libc::chmod(c_path.as_ptr(), mode as libc::mode_t) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(())
}

/// Size query used by `Whence::End` handling for callers that want a
/// cheap length without touching the fd's own position.
pub fn stat_size(path: &str) -> io::Result<i64> {
    let c_path = cpath(path)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::stat(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(last_error());
    }
    Ok(st.st_size as i64)
}
