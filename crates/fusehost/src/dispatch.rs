//! Per-operation adapters between native callbacks and [`FileSystem`].
//!
//! Every adapter resolves the mount from its token, decodes the native
//! arguments, calls the filesystem inside [`contain`] and encodes the
//! result. Return values follow the FUSE convention: zero or a byte count
//! on success, a negative errno on failure.
//!
//! A few operations soften `ENOSYS`, because kernel clients treat a hard
//! failure there as fatal:
//!
//! * `statfs` reports an all-zero record;
//! * `fsync`, `fsyncdir` succeed as no-ops;
//! * `opendir` succeeds with [`NO_HANDLE`];
//! * `create` falls back to `mknod` + `open`.

use std::any::Any;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::Arc;

use fusehost_types::stat::S_IFREG;
use fusehost_types::{Stat, Statfs, Timespec};
use tracing::{error, warn};

use crate::capability::{negotiate, Capabilities, Platform};
use crate::error::Errno;
use crate::handle::{registry, Token};
use crate::host::HostInner;
use crate::marshal::{
    fit, stat_scratch, store_stat, time_update, timespec_from_native, StatfsLayout, TimeUpdate,
};
use crate::native::abi::{
    fuse_conn_info, fuse_dev_t, fuse_file_info, fuse_fill_dir_t, fuse_gid_t, fuse_mode_t,
    fuse_off_t, fuse_stat, fuse_statvfs, fuse_timespec, fuse_uid_t,
};
use crate::native::NativeSession;
use crate::ops::{FileSystem, FsResult, NO_HANDLE};

// ── Containment ─────────────────────────────────────────────────────────────

/// A callback arrived for a mount the registry does not know. The native
/// library and the registry disagree about which mounts exist; nothing
/// sensible can be returned.
pub(crate) fn orphaned_request() -> ! {
    error!("native callback without a registered host, aborting");
    std::process::abort()
}

fn resolve(token: Token) -> Arc<HostInner> {
    match registry().lookup(token) {
        Some(host) => host,
        None => {
            error!(?token, "dispatch for unregistered token, aborting");
            std::process::abort()
        }
    }
}

/// Positive or negative errno to a native status. Zero is not an error
/// code, so it becomes `-EIO`.
fn errno_status(errno: i32) -> c_int {
    match errno {
        0 => -libc::EIO,
        e if e > 0 => -e,
        e => e,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Runs `f`, turning any panic into an errno so unwinding never reaches
/// the native caller. An [`Errno`] payload keeps its code; anything else
/// is reported as `EIO`.
pub(crate) fn contain<F: FnOnce() -> c_int>(op: &'static str, f: F) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(rc) => rc,
        Err(payload) => match payload.downcast_ref::<Errno>() {
            Some(&Errno(code)) => errno_status(code),
            None => {
                error!(op, panic = panic_message(payload.as_ref()), "filesystem operation panicked");
                -libc::EIO
            }
        },
    }
}

fn call<F>(token: Token, op: &'static str, f: F) -> c_int
where
    F: FnOnce(&HostInner) -> FsResult<c_int>,
{
    let host = resolve(token);
    contain(op, || match f(&*host) {
        Ok(rc) => rc,
        Err(errno) => errno_status(errno),
    })
}

// ── Argument decoding ───────────────────────────────────────────────────────

unsafe fn path_arg<'a>(p: *const c_char) -> FsResult<&'a str> {
    if p.is_null() {
        return Err(libc::EINVAL);
    }
    CStr::from_ptr(p).to_str().map_err(|_| libc::EILSEQ)
}

fn handle(fh: u64) -> Option<u64> {
    (fh != NO_HANDLE).then_some(fh)
}

unsafe fn file_handle(fi: *const fuse_file_info) -> u64 {
    fi.as_ref().map_or(NO_HANDLE, |fi| fi.fh)
}

unsafe fn file_info<'a>(fi: *mut fuse_file_info) -> FsResult<&'a mut fuse_file_info> {
    fi.as_mut().ok_or(libc::EINVAL)
}

unsafe fn bytes<'a>(buf: *const c_char, size: usize) -> &'a [u8] {
    if buf.is_null() || size == 0 {
        &[]
    } else {
        slice::from_raw_parts(buf as *const u8, size)
    }
}

unsafe fn bytes_mut<'a>(buf: *mut c_char, size: usize) -> &'a mut [u8] {
    if buf.is_null() || size == 0 {
        &mut []
    } else {
        slice::from_raw_parts_mut(buf as *mut u8, size)
    }
}

/// Copies at most `size - 1` bytes of `s` and NUL-terminates.
unsafe fn copy_cstr(dst: *mut c_char, size: usize, s: &str) {
    let out = bytes_mut(dst, size);
    if let Some((last, body)) = out.split_last_mut() {
        let n = s.len().min(body.len());
        body[..n].copy_from_slice(&s.as_bytes()[..n]);
        if n < body.len() {
            body[n] = 0;
        } else {
            *last = 0;
        }
    }
}

fn enosys_ok(r: FsResult<()>) -> FsResult<()> {
    match r {
        Err(libc::ENOSYS) => Ok(()),
        r => r,
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

/// `init`: negotiates capabilities, marks the host mounted and returns the
/// token, which becomes `private_data` for every later request.
pub(crate) unsafe fn init(token: Token, session: NativeSession, conn: *mut fuse_conn_info) -> *mut c_void {
    let host = resolve(token);
    let requested = host.config.requested_capabilities();
    let caps = match conn.as_mut() {
        Some(conn) => {
            let n = negotiate(Platform::CURRENT, conn.capable, &requested);
            conn.want |= n.want;
            #[cfg(target_os = "macos")]
            {
                conn.enable |= n.enable;
            }
            n.caps
        }
        None => Capabilities::default(),
    };
    host.on_init(session, caps);
    contain("init", || {
        host.fs.init();
        0
    });
    token.as_ptr()
}

pub(crate) fn destroy(token: Token) {
    let host = resolve(token);
    contain("destroy", || {
        host.fs.destroy();
        0
    });
    host.on_destroy();
}

pub(crate) unsafe fn statfs(token: Token, path: *const c_char, stbuf: *mut fuse_statvfs) -> c_int {
    call(token, "statfs", |host| {
        let st = match host.fs.statfs(path_arg(path)?) {
            Err(libc::ENOSYS) => Statfs::default(),
            other => other?,
        };
        stbuf.as_mut().ok_or(libc::EINVAL)?.store(&st);
        Ok(0)
    })
}

// ── Namespace ───────────────────────────────────────────────────────────────

pub(crate) unsafe fn mknod(token: Token, path: *const c_char, mode: fuse_mode_t, dev: fuse_dev_t) -> c_int {
    call(token, "mknod", |host| {
        host.fs.mknod(path_arg(path)?, u32::from(mode), fit(dev))?;
        Ok(0)
    })
}

pub(crate) unsafe fn mkdir(token: Token, path: *const c_char, mode: fuse_mode_t) -> c_int {
    call(token, "mkdir", |host| {
        host.fs.mkdir(path_arg(path)?, u32::from(mode))?;
        Ok(0)
    })
}

pub(crate) unsafe fn unlink(token: Token, path: *const c_char) -> c_int {
    call(token, "unlink", |host| {
        host.fs.unlink(path_arg(path)?)?;
        Ok(0)
    })
}

pub(crate) unsafe fn rmdir(token: Token, path: *const c_char) -> c_int {
    call(token, "rmdir", |host| {
        host.fs.rmdir(path_arg(path)?)?;
        Ok(0)
    })
}

pub(crate) unsafe fn symlink(token: Token, target: *const c_char, newpath: *const c_char) -> c_int {
    call(token, "symlink", |host| {
        host.fs.symlink(path_arg(target)?, path_arg(newpath)?)?;
        Ok(0)
    })
}

pub(crate) unsafe fn link(token: Token, oldpath: *const c_char, newpath: *const c_char) -> c_int {
    call(token, "link", |host| {
        host.fs.link(path_arg(oldpath)?, path_arg(newpath)?)?;
        Ok(0)
    })
}

/// FUSE 2.x has no rename flags; implementations always see 0.
pub(crate) unsafe fn rename(token: Token, oldpath: *const c_char, newpath: *const c_char) -> c_int {
    call(token, "rename", |host| {
        host.fs.rename(path_arg(oldpath)?, path_arg(newpath)?, 0)?;
        Ok(0)
    })
}

pub(crate) unsafe fn readlink(token: Token, path: *const c_char, buf: *mut c_char, size: usize) -> c_int {
    call(token, "readlink", |host| {
        let target = host.fs.readlink(path_arg(path)?)?;
        copy_cstr(buf, size, &target);
        Ok(0)
    })
}

// ── Attributes ──────────────────────────────────────────────────────────────

unsafe fn stat_by(token: Token, op: &'static str, path: *const c_char, stbuf: *mut fuse_stat, fh: u64) -> c_int {
    call(token, op, |host| {
        if stbuf.is_null() {
            return Err(libc::EINVAL);
        }
        let st = host.fs.getattr(path_arg(path)?, handle(fh))?;
        store_stat(stbuf, &st, &host.capabilities());
        Ok(0)
    })
}

pub(crate) unsafe fn getattr(token: Token, path: *const c_char, stbuf: *mut fuse_stat) -> c_int {
    stat_by(token, "getattr", path, stbuf, NO_HANDLE)
}

/// Like `getattr`, but a handle other than [`NO_HANDLE`] identifies the
/// file instead of the path.
pub(crate) unsafe fn fgetattr(
    token: Token,
    path: *const c_char,
    stbuf: *mut fuse_stat,
    fi: *mut fuse_file_info,
) -> c_int {
    stat_by(token, "fgetattr", path, stbuf, file_handle(fi))
}

pub(crate) unsafe fn chmod(token: Token, path: *const c_char, mode: fuse_mode_t) -> c_int {
    call(token, "chmod", |host| {
        host.fs.chmod(path_arg(path)?, u32::from(mode))?;
        Ok(0)
    })
}

pub(crate) unsafe fn chown(token: Token, path: *const c_char, uid: fuse_uid_t, gid: fuse_gid_t) -> c_int {
    call(token, "chown", |host| {
        host.fs.chown(path_arg(path)?, uid, gid)?;
        Ok(0)
    })
}

pub(crate) unsafe fn truncate(token: Token, path: *const c_char, size: fuse_off_t) -> c_int {
    call(token, "truncate", |host| {
        host.fs.truncate(path_arg(path)?, size, None)?;
        Ok(0)
    })
}

pub(crate) unsafe fn ftruncate(
    token: Token,
    path: *const c_char,
    size: fuse_off_t,
    fi: *mut fuse_file_info,
) -> c_int {
    call(token, "ftruncate", |host| {
        host.fs.truncate(path_arg(path)?, size, handle(file_handle(fi)))?;
        Ok(0)
    })
}

pub(crate) unsafe fn access(token: Token, path: *const c_char, mask: c_int) -> c_int {
    call(token, "access", |host| {
        host.fs.access(path_arg(path)?, mask as u32)?;
        Ok(0)
    })
}

/// Substitutes `UTIME_NOW` and `UTIME_OMIT` with concrete times. Omitted
/// times keep their current value, read through `getattr`.
fn resolve_times(fs: &dyn FileSystem, path: &str, requested: [TimeUpdate; 2]) -> [Timespec; 2] {
    let now = Timespec::now();
    let current = if requested.contains(&TimeUpdate::Omit) {
        fs.getattr(path, None).ok()
    } else {
        None
    };
    let pick = |update: TimeUpdate, keep: fn(&Stat) -> Timespec| match update {
        TimeUpdate::Now => now,
        TimeUpdate::Set(t) => t,
        TimeUpdate::Omit => current.as_ref().map_or(now, keep),
    };
    [pick(requested[0], |st| st.atim), pick(requested[1], |st| st.mtim)]
}

/// A null `tv` sets both times to now.
pub(crate) unsafe fn utimens(token: Token, path: *const c_char, tv: *const fuse_timespec) -> c_int {
    call(token, "utimens", |host| {
        let path = path_arg(path)?;
        let times = if tv.is_null() {
            let now = Timespec::now();
            [now, now]
        } else {
            let requested = [time_update(&*tv), time_update(&*tv.add(1))];
            resolve_times(&*host.fs, path, requested)
        };
        host.fs.utimens(path, times)?;
        Ok(0)
    })
}

#[cfg_attr(not(any(target_os = "macos", windows)), allow(dead_code))]
pub(crate) unsafe fn setchgtime(token: Token, path: *const c_char, tv: *const fuse_timespec) -> c_int {
    call(token, "setchgtime", |host| {
        let tv = tv.as_ref().ok_or(libc::EINVAL)?;
        host.fs.setchgtime(path_arg(path)?, timespec_from_native(tv))?;
        Ok(0)
    })
}

#[cfg_attr(not(any(target_os = "macos", windows)), allow(dead_code))]
pub(crate) unsafe fn setcrtime(token: Token, path: *const c_char, tv: *const fuse_timespec) -> c_int {
    call(token, "setcrtime", |host| {
        let tv = tv.as_ref().ok_or(libc::EINVAL)?;
        host.fs.setcrtime(path_arg(path)?, timespec_from_native(tv))?;
        Ok(0)
    })
}

#[cfg_attr(not(any(target_os = "macos", windows)), allow(dead_code))]
pub(crate) unsafe fn chflags(token: Token, path: *const c_char, flags: u32) -> c_int {
    call(token, "chflags", |host| {
        host.fs.chflags(path_arg(path)?, flags)?;
        Ok(0)
    })
}

#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) unsafe fn getpath(
    token: Token,
    path: *const c_char,
    buf: *mut c_char,
    size: usize,
    fi: *mut fuse_file_info,
) -> c_int {
    call(token, "getpath", |host| {
        let stored = host.fs.getpath(path_arg(path)?, handle(file_handle(fi)))?;
        copy_cstr(buf, size, &stored);
        Ok(0)
    })
}

// ── Files ───────────────────────────────────────────────────────────────────

pub(crate) unsafe fn open(token: Token, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
    call(token, "open", |host| {
        let fi = file_info(fi)?;
        fi.fh = host.fs.open(path_arg(path)?, fi.flags)?;
        if host.config.direct_io {
            fi.set_direct_io(true);
        }
        Ok(0)
    })
}

/// Without an atomic `create`, the file is made with `mknod` and then
/// opened with the same flags. Another process can act on the file
/// between the two calls.
pub(crate) unsafe fn create(token: Token, path: *const c_char, mode: fuse_mode_t, fi: *mut fuse_file_info) -> c_int {
    call(token, "create", |host| {
        let fi = file_info(fi)?;
        let path = path_arg(path)?;
        let mode = u32::from(mode);
        fi.fh = match host.fs.create(path, fi.flags, mode) {
            Err(libc::ENOSYS) => {
                host.fs.mknod(path, S_IFREG | mode, 0)?;
                host.fs.open(path, fi.flags)?
            }
            other => other?,
        };
        if host.config.direct_io {
            fi.set_direct_io(true);
        }
        Ok(0)
    })
}

pub(crate) unsafe fn read(
    token: Token,
    path: *const c_char,
    buf: *mut c_char,
    size: usize,
    off: fuse_off_t,
    fi: *mut fuse_file_info,
) -> c_int {
    call(token, "read", |host| {
        let n = host.fs.read(path_arg(path)?, bytes_mut(buf, size), off, file_handle(fi))?;
        Ok(fit(n.min(size)))
    })
}

pub(crate) unsafe fn write(
    token: Token,
    path: *const c_char,
    buf: *const c_char,
    size: usize,
    off: fuse_off_t,
    fi: *mut fuse_file_info,
) -> c_int {
    call(token, "write", |host| {
        let n = host.fs.write(path_arg(path)?, bytes(buf, size), off, file_handle(fi))?;
        Ok(fit(n.min(size)))
    })
}

pub(crate) unsafe fn flush(token: Token, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
    call(token, "flush", |host| {
        host.fs.flush(path_arg(path)?, file_handle(fi))?;
        Ok(0)
    })
}

pub(crate) unsafe fn release(token: Token, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
    call(token, "release", |host| {
        host.fs.release(path_arg(path)?, file_handle(fi))?;
        Ok(0)
    })
}

pub(crate) unsafe fn fsync(token: Token, path: *const c_char, datasync: c_int, fi: *mut fuse_file_info) -> c_int {
    call(token, "fsync", |host| {
        enosys_ok(host.fs.fsync(path_arg(path)?, datasync != 0, file_handle(fi)))?;
        Ok(0)
    })
}

// ── Directories ─────────────────────────────────────────────────────────────

pub(crate) unsafe fn opendir(token: Token, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
    call(token, "opendir", |host| {
        let fi = file_info(fi)?;
        fi.fh = match host.fs.opendir(path_arg(path)?) {
            Err(libc::ENOSYS) => NO_HANDLE,
            other => other?,
        };
        Ok(0)
    })
}

/// Entries go to the native `filler` until it reports a full buffer.
/// After that the fill callback keeps answering `false` without touching
/// the buffer, even if the implementation carries on.
pub(crate) unsafe fn readdir(
    token: Token,
    path: *const c_char,
    buf: *mut c_void,
    filler: fuse_fill_dir_t,
    off: fuse_off_t,
    fi: *mut fuse_file_info,
) -> c_int {
    call(token, "readdir", |host| {
        let filler = filler.ok_or(libc::EIO)?;
        let path = path_arg(path)?;
        let caps = host.capabilities();
        let mut full = false;
        let mut fill = |name: &str, st: Option<&Stat>, next: i64| -> bool {
            if full {
                return false;
            }
            let Ok(name) = CString::new(name) else {
                warn!(path, "skipping directory entry with an embedded NUL");
                return true;
            };
            let mut scratch = stat_scratch();
            let stp = match st {
                Some(st) => {
                    let p = &mut scratch as *mut _ as *mut fuse_stat;
                    store_stat(p, st, &caps);
                    p as *const fuse_stat
                }
                None => ptr::null(),
            };
            full = filler(buf, name.as_ptr(), stp, next) != 0;
            !full
        };
        host.fs.readdir(path, &mut fill, off, file_handle(fi))?;
        Ok(0)
    })
}

pub(crate) unsafe fn releasedir(token: Token, path: *const c_char, fi: *mut fuse_file_info) -> c_int {
    call(token, "releasedir", |host| {
        host.fs.releasedir(path_arg(path)?, file_handle(fi))?;
        Ok(0)
    })
}

pub(crate) unsafe fn fsyncdir(token: Token, path: *const c_char, datasync: c_int, fi: *mut fuse_file_info) -> c_int {
    call(token, "fsyncdir", |host| {
        enosys_ok(host.fs.fsyncdir(path_arg(path)?, datasync != 0, file_handle(fi)))?;
        Ok(0)
    })
}

// ── Extended attributes ─────────────────────────────────────────────────────

pub(crate) unsafe fn setxattr(
    token: Token,
    path: *const c_char,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    flags: c_int,
) -> c_int {
    call(token, "setxattr", |host| {
        host.fs.setxattr(path_arg(path)?, path_arg(name)?, bytes(value, size), flags)?;
        Ok(0)
    })
}

/// A zero `size` asks for the value's length only; a smaller non-zero
/// buffer fails with `ERANGE`.
pub(crate) unsafe fn getxattr(
    token: Token,
    path: *const c_char,
    name: *const c_char,
    value: *mut c_char,
    size: usize,
) -> c_int {
    call(token, "getxattr", |host| {
        let data = host.fs.getxattr(path_arg(path)?, path_arg(name)?)?;
        if size != 0 {
            let out = bytes_mut(value, size);
            if data.len() > out.len() {
                return Err(libc::ERANGE);
            }
            out[..data.len()].copy_from_slice(&data);
        }
        Ok(fit(data.len()))
    })
}

/// Names are packed NUL-terminated. Same size protocol as `getxattr`.
pub(crate) unsafe fn listxattr(token: Token, path: *const c_char, list: *mut c_char, size: usize) -> c_int {
    call(token, "listxattr", |host| {
        let out = bytes_mut(list, size);
        let mut used = 0usize;
        let mut overflow = false;
        host.fs.listxattr(path_arg(path)?, &mut |name: &str| {
            let end = used + name.len() + 1;
            if size != 0 {
                if end > out.len() {
                    overflow = true;
                    return false;
                }
                out[used..end - 1].copy_from_slice(name.as_bytes());
                out[end - 1] = 0;
            }
            used = end;
            true
        })?;
        if overflow {
            return Err(libc::ERANGE);
        }
        Ok(fit(used))
    })
}

pub(crate) unsafe fn removexattr(token: Token, path: *const c_char, name: *const c_char) -> c_int {
    call(token, "removexattr", |host| {
        host.fs.removexattr(path_arg(path)?, path_arg(name)?)?;
        Ok(0)
    })
}
