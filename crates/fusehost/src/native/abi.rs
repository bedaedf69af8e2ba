//! `#[repr(C)]` mirrors of the FUSE 2.8 high-level API structures.
//!
//! Three flavours are covered: libfuse 2.x (Linux, FreeBSD), osxfuse /
//! macFUSE (macOS) and WinFsp's FUSE compatibility layer. The WinFsp data
//! records are compiled on every platform so their marshaling can be
//! exercised anywhere; everything else follows the target.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_uint, c_void};

// ── Capability bits ─────────────────────────────────────────────────────────

pub const FUSE_CAP_ATOMIC_O_TRUNC: c_uint = 1 << 3;
pub const FSP_FUSE_CAP_READDIR_PLUS: c_uint = 1 << 21;
pub const FSP_FUSE_CAP_READ_ONLY: c_uint = 1 << 22;
pub const FSP_FUSE_CAP_STAT_EX: c_uint = 1 << 23;
pub const FSP_FUSE_CAP_DELETE_ACCESS: c_uint = 1 << 24;
pub const FSP_FUSE_CAP_CASE_INSENSITIVE: c_uint = 1 << 29;

/// osxfuse `conn->enable.case_insensitive`.
pub const OSXFUSE_ENABLE_CASE_INSENSITIVE: c_uint = 1 << 0;

// ── WinFsp records ──────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FspTimespec {
    pub tv_sec: isize,
    pub tv_nsec: isize,
}

/// WinFsp `struct fuse_stat`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FspStat {
    pub st_dev: u32,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_nlink: u16,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u32,
    pub st_size: i64,
    pub st_atim: FspTimespec,
    pub st_mtim: FspTimespec,
    pub st_ctim: FspTimespec,
    pub st_blksize: i32,
    pub st_blocks: i64,
    pub st_birthtim: FspTimespec,
}

/// WinFsp `struct fuse_stat_ex`, used once `FSP_FUSE_CAP_STAT_EX` is wanted.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FspStatEx {
    pub base: FspStat,
    pub st_flags: u32,
    pub st_reserved32: [u32; 3],
    pub st_reserved64: [u64; 2],
}

/// WinFsp `struct fuse_statvfs`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FspStatvfs {
    pub f_bsize: u64,
    pub f_frsize: u64,
    pub f_blocks: usize,
    pub f_bfree: usize,
    pub f_bavail: usize,
    pub f_files: usize,
    pub f_ffree: usize,
    pub f_favail: usize,
    pub f_fsid: u64,
    pub f_flag: u64,
    pub f_namemax: u64,
}

// ── Platform aliases ────────────────────────────────────────────────────────

#[cfg(unix)]
mod platform {
    pub type fuse_stat = libc::stat;
    pub type fuse_statvfs = libc::statvfs;
    pub type fuse_timespec = libc::timespec;
    pub type fuse_mode_t = libc::mode_t;
    pub type fuse_dev_t = libc::dev_t;
    pub type fuse_uid_t = libc::uid_t;
    pub type fuse_gid_t = libc::gid_t;
    pub type fuse_pid_t = libc::pid_t;
    pub type fh_old_t = std::ffi::c_ulong;
}

#[cfg(windows)]
mod platform {
    pub type fuse_stat = super::FspStat;
    pub type fuse_statvfs = super::FspStatvfs;
    pub type fuse_timespec = super::FspTimespec;
    pub type fuse_mode_t = u32;
    pub type fuse_dev_t = u32;
    pub type fuse_uid_t = u32;
    pub type fuse_gid_t = u32;
    pub type fuse_pid_t = i32;
    pub type fh_old_t = std::ffi::c_uint;
}

pub use platform::*;

/// Libraries are built with 64-bit file offsets everywhere.
pub type fuse_off_t = i64;

// ── Request structures ──────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct fuse_file_info {
    pub flags: c_int,
    pub fh_old: fh_old_t,
    pub writepage: c_int,
    /// `direct_io:1, keep_cache:1, flush:1, nonseekable:1, ...`
    pub bits: c_uint,
    pub fh: u64,
    pub lock_owner: u64,
}

impl fuse_file_info {
    const DIRECT_IO: c_uint = 1 << 0;

    pub fn direct_io(&self) -> bool {
        self.bits & Self::DIRECT_IO != 0
    }

    pub fn set_direct_io(&mut self, on: bool) {
        if on {
            self.bits |= Self::DIRECT_IO;
        } else {
            self.bits &= !Self::DIRECT_IO;
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct fuse_conn_info {
    pub proto_major: c_uint,
    pub proto_minor: c_uint,
    pub async_read: c_uint,
    pub max_write: c_uint,
    pub max_readahead: c_uint,
    #[cfg(target_os = "macos")]
    pub enable: c_uint,
    pub capable: c_uint,
    pub want: c_uint,
    pub reserved: [c_uint; 25],
}

#[repr(C)]
#[derive(Debug)]
pub struct fuse_context {
    pub fuse: *mut c_void,
    pub uid: fuse_uid_t,
    pub gid: fuse_gid_t,
    pub pid: fuse_pid_t,
    pub private_data: *mut c_void,
    pub umask: fuse_mode_t,
}

pub type fuse_fill_dir_t = Option<
    unsafe extern "C" fn(
        buf: *mut c_void,
        name: *const c_char,
        stbuf: *const fuse_stat,
        off: fuse_off_t,
    ) -> c_int,
>;

// ── Operation table ─────────────────────────────────────────────────────────

type Path = *const c_char;
type FileInfo = *mut fuse_file_info;
type Unused = Option<unsafe extern "C" fn()>;

/// `struct fuse_operations`, `FUSE_USE_VERSION 28`.
///
/// WinFsp swaps `getdir` and `readlink`; osxfuse and WinFsp append the
/// extended-attribute block after `fallocate`.
#[repr(C)]
#[derive(Default)]
pub struct fuse_operations {
    pub getattr: Option<unsafe extern "C" fn(Path, *mut fuse_stat) -> c_int>,
    #[cfg(windows)]
    pub getdir: Unused,
    pub readlink: Option<unsafe extern "C" fn(Path, *mut c_char, usize) -> c_int>,
    #[cfg(not(windows))]
    pub getdir: Unused,
    pub mknod: Option<unsafe extern "C" fn(Path, fuse_mode_t, fuse_dev_t) -> c_int>,
    pub mkdir: Option<unsafe extern "C" fn(Path, fuse_mode_t) -> c_int>,
    pub unlink: Option<unsafe extern "C" fn(Path) -> c_int>,
    pub rmdir: Option<unsafe extern "C" fn(Path) -> c_int>,
    pub symlink: Option<unsafe extern "C" fn(Path, Path) -> c_int>,
    pub rename: Option<unsafe extern "C" fn(Path, Path) -> c_int>,
    pub link: Option<unsafe extern "C" fn(Path, Path) -> c_int>,
    pub chmod: Option<unsafe extern "C" fn(Path, fuse_mode_t) -> c_int>,
    pub chown: Option<unsafe extern "C" fn(Path, fuse_uid_t, fuse_gid_t) -> c_int>,
    pub truncate: Option<unsafe extern "C" fn(Path, fuse_off_t) -> c_int>,
    pub utime: Unused,
    pub open: Option<unsafe extern "C" fn(Path, FileInfo) -> c_int>,
    pub read: Option<unsafe extern "C" fn(Path, *mut c_char, usize, fuse_off_t, FileInfo) -> c_int>,
    pub write: Option<unsafe extern "C" fn(Path, *const c_char, usize, fuse_off_t, FileInfo) -> c_int>,
    pub statfs: Option<unsafe extern "C" fn(Path, *mut fuse_statvfs) -> c_int>,
    pub flush: Option<unsafe extern "C" fn(Path, FileInfo) -> c_int>,
    pub release: Option<unsafe extern "C" fn(Path, FileInfo) -> c_int>,
    pub fsync: Option<unsafe extern "C" fn(Path, c_int, FileInfo) -> c_int>,
    #[cfg(target_os = "macos")]
    pub setxattr: Option<unsafe extern "C" fn(Path, Path, *const c_char, usize, c_int, u32) -> c_int>,
    #[cfg(not(target_os = "macos"))]
    pub setxattr: Option<unsafe extern "C" fn(Path, Path, *const c_char, usize, c_int) -> c_int>,
    #[cfg(target_os = "macos")]
    pub getxattr: Option<unsafe extern "C" fn(Path, Path, *mut c_char, usize, u32) -> c_int>,
    #[cfg(not(target_os = "macos"))]
    pub getxattr: Option<unsafe extern "C" fn(Path, Path, *mut c_char, usize) -> c_int>,
    pub listxattr: Option<unsafe extern "C" fn(Path, *mut c_char, usize) -> c_int>,
    pub removexattr: Option<unsafe extern "C" fn(Path, Path) -> c_int>,
    pub opendir: Option<unsafe extern "C" fn(Path, FileInfo) -> c_int>,
    pub readdir:
        Option<unsafe extern "C" fn(Path, *mut c_void, fuse_fill_dir_t, fuse_off_t, FileInfo) -> c_int>,
    pub releasedir: Option<unsafe extern "C" fn(Path, FileInfo) -> c_int>,
    pub fsyncdir: Option<unsafe extern "C" fn(Path, c_int, FileInfo) -> c_int>,
    pub init: Option<unsafe extern "C" fn(*mut fuse_conn_info) -> *mut c_void>,
    pub destroy: Option<unsafe extern "C" fn(*mut c_void)>,
    pub access: Option<unsafe extern "C" fn(Path, c_int) -> c_int>,
    pub create: Option<unsafe extern "C" fn(Path, fuse_mode_t, FileInfo) -> c_int>,
    pub ftruncate: Option<unsafe extern "C" fn(Path, fuse_off_t, FileInfo) -> c_int>,
    pub fgetattr: Option<unsafe extern "C" fn(Path, *mut fuse_stat, FileInfo) -> c_int>,
    pub lock: Unused,
    pub utimens: Option<unsafe extern "C" fn(Path, *const fuse_timespec) -> c_int>,
    pub bmap: Unused,
    /// `flag_nullpath_ok:1, flag_nopath:1, flag_utime_omit_ok:1`
    pub flags: c_uint,
    pub ioctl: Unused,
    pub poll: Unused,
    pub write_buf: Unused,
    pub read_buf: Unused,
    pub flock: Unused,
    pub fallocate: Unused,
    #[cfg(any(target_os = "macos", windows))]
    pub extended: ExtendedOperations,
}

/// osxfuse / WinFsp tail of `fuse_operations`.
#[cfg(any(target_os = "macos", windows))]
#[repr(C)]
#[derive(Default)]
pub struct ExtendedOperations {
    pub reserved00: Unused,
    pub reserved01: Unused,
    pub reserved02: Unused,
    pub statfs_x: Unused,
    pub setvolname: Unused,
    pub exchange: Unused,
    pub getxtimes: Unused,
    pub setbkuptime: Unused,
    pub setchgtime: Option<unsafe extern "C" fn(Path, *const fuse_timespec) -> c_int>,
    pub setcrtime: Option<unsafe extern "C" fn(Path, *const fuse_timespec) -> c_int>,
    pub chflags: Option<unsafe extern "C" fn(Path, u32) -> c_int>,
    pub setattr_x: Unused,
    pub fsetattr_x: Unused,
    #[cfg(windows)]
    pub getpath: Option<unsafe extern "C" fn(Path, *mut c_char, usize, FileInfo) -> c_int>,
}

/// `flag_utime_omit_ok`: the bridge understands `UTIME_OMIT` / `UTIME_NOW`.
pub const FLAG_UTIME_OMIT_OK: c_uint = 1 << 2;
