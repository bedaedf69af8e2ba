//! The filesystem trait applications implement.
//!
//! Methods follow the path based FUSE high-level API. Every method has a
//! default that answers `ENOSYS`, so an implementation only overrides what
//! it supports. Errors are positive errno values (`libc::ENOENT`, ...); the
//! dispatcher negates them for the native layer.

use fusehost_types::{Stat, Statfs, Timespec};

/// Result of a filesystem operation; the error is a positive errno.
pub type FsResult<T> = std::result::Result<T, i32>;

/// File handle value meaning "no handle": the request is by path.
pub const NO_HANDLE: u64 = u64::MAX;

/// Entry sink passed to [`FileSystem::readdir`].
///
/// Arguments are the entry name, optional full attributes and the offset of
/// the next entry (0 when the implementation does not track offsets).
/// Returns `false` once the kernel buffer is full; the implementation must
/// stop enumerating and return `Ok(())`.
pub type DirFiller<'a> = dyn FnMut(&str, Option<&Stat>, i64) -> bool + 'a;

/// Name sink passed to [`FileSystem::listxattr`]. Returns `false` to stop.
pub type XattrFiller<'a> = dyn FnMut(&str) -> bool + 'a;

/// A user-space filesystem.
///
/// The native library calls into an implementation from several threads
/// at once, so every method takes `&self`.
#[allow(unused_variables)]
pub trait FileSystem: Send + Sync {
    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Called once the native library has mounted the filesystem.
    fn init(&self) {}

    /// Called when the filesystem is unmounted, before `mount` returns.
    fn destroy(&self) {}

    /// Filesystem statistics. Left unimplemented, an all-zero record is
    /// reported.
    fn statfs(&self, path: &str) -> FsResult<Statfs> {
        Err(libc::ENOSYS)
    }

    // ── Namespace ───────────────────────────────────────────────────────

    fn mknod(&self, path: &str, mode: u32, dev: u64) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    /// Creates a hard link `newpath` to `oldpath`.
    fn link(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    /// Creates a symbolic link at `newpath` pointing to `target`.
    fn symlink(&self, target: &str, newpath: &str) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        Err(libc::ENOSYS)
    }

    /// `flags` carries `RENAME_NOREPLACE` / `RENAME_EXCHANGE` where the
    /// native library forwards them, and is 0 otherwise.
    fn rename(&self, oldpath: &str, newpath: &str, flags: u32) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    // ── Attributes ──────────────────────────────────────────────────────

    /// File attributes. `fh` is `Some` when the kernel asked about an open
    /// file, in which case the handle, not the path, identifies the file.
    fn getattr(&self, path: &str, fh: Option<u64>) -> FsResult<Stat> {
        Err(libc::ENOSYS)
    }

    fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    /// `u32::MAX` for either id means "leave unchanged".
    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    /// Sets access and modification time, in that order.
    fn utimens(&self, path: &str, times: [Timespec; 2]) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn truncate(&self, path: &str, size: i64, fh: Option<u64>) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn access(&self, path: &str, mask: u32) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    // ── Files ───────────────────────────────────────────────────────────

    /// Atomically creates and opens a file, returning the new handle.
    ///
    /// When left unimplemented the bridge falls back to `mknod` followed by
    /// `open`, which is not atomic.
    fn create(&self, path: &str, flags: i32, mode: u32) -> FsResult<u64> {
        Err(libc::ENOSYS)
    }

    fn open(&self, path: &str, flags: i32) -> FsResult<u64> {
        Err(libc::ENOSYS)
    }

    /// Reads into `buf`, returning the number of bytes read.
    fn read(&self, path: &str, buf: &mut [u8], offset: i64, fh: u64) -> FsResult<usize> {
        Err(libc::ENOSYS)
    }

    /// Writes `data`, returning the number of bytes written.
    fn write(&self, path: &str, data: &[u8], offset: i64, fh: u64) -> FsResult<usize> {
        Err(libc::ENOSYS)
    }

    fn flush(&self, path: &str, fh: u64) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn release(&self, path: &str, fh: u64) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    /// Left unimplemented, fsync is treated as a successful no-op.
    fn fsync(&self, path: &str, datasync: bool, fh: u64) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    // ── Directories ─────────────────────────────────────────────────────

    /// Left unimplemented, every directory opens with [`NO_HANDLE`].
    fn opendir(&self, path: &str) -> FsResult<u64> {
        Err(libc::ENOSYS)
    }

    fn readdir(&self, path: &str, fill: &mut DirFiller<'_>, offset: i64, fh: u64) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn releasedir(&self, path: &str, fh: u64) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn fsyncdir(&self, path: &str, datasync: bool, fh: u64) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    // ── Extended attributes ─────────────────────────────────────────────

    fn setxattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        Err(libc::ENOSYS)
    }

    fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn listxattr(&self, path: &str, fill: &mut XattrFiller<'_>) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    // ── Platform extensions (macOS, WinFsp) ─────────────────────────────

    /// Sets BSD / Windows file flags.
    fn chflags(&self, path: &str, flags: u32) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn setcrtime(&self, path: &str, time: Timespec) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    fn setchgtime(&self, path: &str, time: Timespec) -> FsResult<()> {
        Err(libc::ENOSYS)
    }

    /// Returns the stored spelling of `path`. Consulted by WinFsp only when
    /// case-insensitive lookup was negotiated.
    fn getpath(&self, path: &str, fh: Option<u64>) -> FsResult<String> {
        Err(libc::ENOSYS)
    }
}
