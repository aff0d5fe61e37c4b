//! The remote file system client contract.
//!
//! The remote file system client library itself is an external
//! collaborator (see `spec.md` §1) — this crate only defines the
//! interface it consumes and dispatches through it. A real
//! implementation (talking to HDFS, S3-backed storage, or similar) is
//! supplied by the host; [`InMemoryRemoteFs`] below is a test double used
//! only under `#[cfg(test)]`.

use std::io;

/// Opaque handle to an open remote file, scoped to one [`RemoteFs`]
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteHandle(pub u64);

/// Metadata returned by [`RemoteFs::stat`].
#[derive(Debug, Clone, Copy)]
pub struct RemoteStat {
    pub size: i64,
}

/// A live connection to one remote endpoint.
///
/// Implementations are assumed to apply their own internal timeouts —
/// this layer never cancels a call once issued (`spec.md` §5).
pub trait RemoteFs: Send + Sync {
    fn open(
        &self,
        path: &str,
        flags: i32,
        mode: u32,
        replica: u32,
    ) -> io::Result<RemoteHandle>;
    fn read(&self, handle: RemoteHandle, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&self, handle: RemoteHandle, buf: &[u8]) -> io::Result<usize>;
    fn seek(&self, handle: RemoteHandle, pos: i64) -> io::Result<i64>;
    fn tell(&self, handle: RemoteHandle) -> io::Result<i64>;
    fn close(&self, handle: RemoteHandle) -> io::Result<()>;
    fn sync(&self, handle: RemoteHandle) -> io::Result<()>;
    fn truncate(&self, path: &str, len: i64) -> io::Result<()>;
    fn chmod(&self, path: &str, mode: u32) -> io::Result<()>;
    fn delete(&self, path: &str) -> io::Result<()>;
    fn mkdir(&self, path: &str) -> io::Result<()>;
    fn listdir(&self, path: &str) -> io::Result<Vec<String>>;
    fn stat(&self, path: &str) -> io::Result<RemoteStat>;
}

/// Connects to a remote endpoint, producing a [`RemoteFs`] connection.
///
/// One implementation is registered per protocol scheme with the
/// [`crate::pool::ConnectionPool`]; connecting is lazy and the resulting
/// connection is cached for the process lifetime.
pub trait RemoteFsConnector: Send + Sync {
    fn connect(&self, protocol: &str, host: &str, port: u16) -> io::Result<Box<dyn RemoteFs>>;
}

#[cfg(test)]
pub mod test_double {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory stand-in for a remote file system, used only by this
    /// crate's own tests to exercise the remote adapter path without a
    /// real network dependency.
    #[derive(Default)]
    pub struct InMemoryRemoteFs {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        files: HashMap<String, Vec<u8>>,
        open: HashMap<u64, OpenFile>,
        next_handle: u64,
        /// If set, the next `write` call reports having written only
        /// this many bytes (with `errno` left at 0) instead of the full
        /// buffer, so callers can exercise the short-write-promotion
        /// path without a real device.
        next_write_cap: Option<usize>,
    }

    struct OpenFile {
        path: String,
        pos: i64,
        append_only: bool,
    }

    impl InMemoryRemoteFs {
        pub fn new() -> Self {
            Self::default()
        }

        /// Test hook: externally extend a file's stored bytes, simulating
        /// an out-of-band writer racing with this layer's re-open.
        pub fn extend_out_of_band(&self, path: &str, extra: &[u8]) {
            let mut inner = self.inner.lock().unwrap();
            inner.files.entry(path.to_owned()).or_default().extend_from_slice(extra);
        }

        pub fn file_len(&self, path: &str) -> i64 {
            let inner = self.inner.lock().unwrap();
            inner.files.get(path).map(|v| v.len() as i64).unwrap_or(0)
        }

        /// Test hook: make the next `write` on any handle report a short
        /// byte count with no error, as a real back-end occasionally does
        /// under resource pressure.
        pub fn force_next_write_short(&self, cap: usize) {
            self.inner.lock().unwrap().next_write_cap = Some(cap);
        }
    }

    impl RemoteFs for InMemoryRemoteFs {
        fn open(&self, path: &str, flags: i32, _mode: u32, _replica: u32) -> io::Result<RemoteHandle> {
            let mut inner = self.inner.lock().unwrap();
            let append_only = flags & libc::O_APPEND != 0;
            if flags & libc::O_CREAT != 0 {
                inner.files.entry(path.to_owned()).or_default();
            }
            if !inner.files.contains_key(path) {
                return Err(io::Error::from_raw_os_error(libc::ENOENT));
            }
            let pos = if append_only {
                inner.files[path].len() as i64
            } else {
                0
            };
            let id = inner.next_handle;
            inner.next_handle += 1;
            inner.open.insert(id, OpenFile { path: path.to_owned(), pos, append_only });
            Ok(RemoteHandle(id))
        }

        fn read(&self, handle: RemoteHandle, buf: &mut [u8]) -> io::Result<usize> {
            let mut inner = self.inner.lock().unwrap();
            let (path, pos) = {
                let open = inner.open.get(&handle.0).ok_or_else(bad_handle)?;
                (open.path.clone(), open.pos)
            };
            let data = inner.files.get(&path).ok_or_else(bad_handle)?;
            let start = pos.max(0) as usize;
            let available = data.len().saturating_sub(start);
            let n = buf.len().min(available);
            buf[..n].copy_from_slice(&data[start..start + n]);
            inner.open.get_mut(&handle.0).unwrap().pos += n as i64;
            Ok(n)
        }

        fn write(&self, handle: RemoteHandle, buf: &[u8]) -> io::Result<usize> {
            let mut inner = self.inner.lock().unwrap();
            let cap = inner.next_write_cap.take();
            let to_write = cap.map(|c| c.min(buf.len())).unwrap_or(buf.len());
            let path = inner.open.get(&handle.0).ok_or_else(bad_handle)?.path.clone();
            let data = inner.files.entry(path).or_default();
            data.extend_from_slice(&buf[..to_write]);
            let open = inner.open.get_mut(&handle.0).unwrap();
            open.pos = data_len_after(data, open);
            Ok(to_write)
        }

        fn seek(&self, handle: RemoteHandle, pos: i64) -> io::Result<i64> {
            let mut inner = self.inner.lock().unwrap();
            let open = inner.open.get_mut(&handle.0).ok_or_else(bad_handle)?;
            if open.append_only {
                return Err(io::Error::from_raw_os_error(libc::ESPIPE));
            }
            open.pos = pos;
            Ok(pos)
        }

        fn tell(&self, handle: RemoteHandle) -> io::Result<i64> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.open.get(&handle.0).ok_or_else(bad_handle)?.pos)
        }

        fn close(&self, handle: RemoteHandle) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.open.remove(&handle.0).ok_or_else(bad_handle)?;
            Ok(())
        }

        fn sync(&self, handle: RemoteHandle) -> io::Result<()> {
            let inner = self.inner.lock().unwrap();
            inner.open.get(&handle.0).ok_or_else(bad_handle)?;
            Ok(())
        }

        fn truncate(&self, path: &str, len: i64) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            let data = inner.files.get_mut(path).ok_or_else(bad_handle)?;
            data.resize(len.max(0) as usize, 0);
            Ok(())
        }

        fn chmod(&self, _path: &str, _mode: u32) -> io::Result<()> {
            Ok(())
        }

        fn delete(&self, path: &str) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.files.remove(path).ok_or_else(bad_handle)?;
            Ok(())
        }

        fn mkdir(&self, _path: &str) -> io::Result<()> {
            Ok(())
        }

        fn listdir(&self, prefix: &str) -> io::Result<Vec<String>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.files.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
        }

        fn stat(&self, path: &str) -> io::Result<RemoteStat> {
            let inner = self.inner.lock().unwrap();
            let data = inner.files.get(path).ok_or_else(bad_handle)?;
            Ok(RemoteStat { size: data.len() as i64 })
        }
    }

    fn data_len_after(data: &[u8], open: &OpenFile) -> i64 {
        let _ = open;
        data.len() as i64
    }

    fn bad_handle() -> io::Error {
        io::Error::from_raw_os_error(libc::EBADF)
    }

    /// A connector that always returns the same shared [`InMemoryRemoteFs`],
    /// regardless of endpoint — sufficient for exercising pool caching in
    /// tests without standing up multiple fake endpoints.
    pub struct SingleEndpointConnector {
        pub fs: std::sync::Arc<InMemoryRemoteFs>,
    }

    impl RemoteFsConnector for SingleEndpointConnector {
        fn connect(&self, _protocol: &str, _host: &str, _port: u16) -> io::Result<Box<dyn RemoteFs>> {
            Ok(Box::new(SharedHandle(self.fs.clone())))
        }
    }

    struct SharedHandle(std::sync::Arc<InMemoryRemoteFs>);

    impl RemoteFs for SharedHandle {
        fn open(&self, path: &str, flags: i32, mode: u32, replica: u32) -> io::Result<RemoteHandle> {
            self.0.open(path, flags, mode, replica)
        }
        fn read(&self, handle: RemoteHandle, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(handle, buf)
        }
        fn write(&self, handle: RemoteHandle, buf: &[u8]) -> io::Result<usize> {
            self.0.write(handle, buf)
        }
        fn seek(&self, handle: RemoteHandle, pos: i64) -> io::Result<i64> {
            self.0.seek(handle, pos)
        }
        fn tell(&self, handle: RemoteHandle) -> io::Result<i64> {
            self.0.tell(handle)
        }
        fn close(&self, handle: RemoteHandle) -> io::Result<()> {
            self.0.close(handle)
        }
        fn sync(&self, handle: RemoteHandle) -> io::Result<()> {
            self.0.sync(handle)
        }
        fn truncate(&self, path: &str, len: i64) -> io::Result<()> {
            self.0.truncate(path, len)
        }
        fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
            self.0.chmod(path, mode)
        }
        fn delete(&self, path: &str) -> io::Result<()> {
            self.0.delete(path)
        }
        fn mkdir(&self, path: &str) -> io::Result<()> {
            self.0.mkdir(path)
        }
        fn listdir(&self, path: &str) -> io::Result<Vec<String>> {
            self.0.listdir(path)
        }
        fn stat(&self, path: &str) -> io::Result<RemoteStat> {
            self.0.stat(path)
        }
    }
}
