//! `extern "C"` entry points handed to the native library.
//!
//! Each callback recovers the mount's token from `fuse_get_context()` and
//! forwards to the matching adapter in [`crate::dispatch`]. All policy
//! lives there; nothing here can panic.

use std::ffi::{c_char, c_int, c_void};

use super::abi::*;
use super::library;
use super::NativeSession;
use crate::capability::Capabilities;
use crate::dispatch;
use crate::handle::Token;

/// Token and session of the mount that issued the current request.
fn current() -> (Token, NativeSession) {
    let ctx = library::loaded().and_then(|lib| lib.raw_context());
    match ctx.and_then(|ctx| Token::from_ptr(ctx.private_data).map(|t| (t, NativeSession::from_ptr(ctx.fuse)))) {
        Some(found) => found,
        None => dispatch::orphaned_request(),
    }
}

macro_rules! forward {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            unsafe extern "C" fn $name($($arg: $ty),*) -> c_int {
                dispatch::$name(current().0, $($arg),*)
            }
        )*
    };
}

forward! {
    getattr(path: *const c_char, stbuf: *mut fuse_stat);
    fgetattr(path: *const c_char, stbuf: *mut fuse_stat, fi: *mut fuse_file_info);
    readlink(path: *const c_char, buf: *mut c_char, size: usize);
    mknod(path: *const c_char, mode: fuse_mode_t, dev: fuse_dev_t);
    mkdir(path: *const c_char, mode: fuse_mode_t);
    unlink(path: *const c_char);
    rmdir(path: *const c_char);
    symlink(target: *const c_char, newpath: *const c_char);
    rename(oldpath: *const c_char, newpath: *const c_char);
    link(oldpath: *const c_char, newpath: *const c_char);
    chmod(path: *const c_char, mode: fuse_mode_t);
    chown(path: *const c_char, uid: fuse_uid_t, gid: fuse_gid_t);
    truncate(path: *const c_char, size: fuse_off_t);
    ftruncate(path: *const c_char, size: fuse_off_t, fi: *mut fuse_file_info);
    open(path: *const c_char, fi: *mut fuse_file_info);
    read(path: *const c_char, buf: *mut c_char, size: usize, off: fuse_off_t, fi: *mut fuse_file_info);
    write(path: *const c_char, buf: *const c_char, size: usize, off: fuse_off_t, fi: *mut fuse_file_info);
    statfs(path: *const c_char, stbuf: *mut fuse_statvfs);
    flush(path: *const c_char, fi: *mut fuse_file_info);
    release(path: *const c_char, fi: *mut fuse_file_info);
    fsync(path: *const c_char, datasync: c_int, fi: *mut fuse_file_info);
    listxattr(path: *const c_char, list: *mut c_char, size: usize);
    removexattr(path: *const c_char, name: *const c_char);
    opendir(path: *const c_char, fi: *mut fuse_file_info);
    readdir(path: *const c_char, buf: *mut c_void, filler: fuse_fill_dir_t, off: fuse_off_t, fi: *mut fuse_file_info);
    releasedir(path: *const c_char, fi: *mut fuse_file_info);
    fsyncdir(path: *const c_char, datasync: c_int, fi: *mut fuse_file_info);
    access(path: *const c_char, mask: c_int);
    create(path: *const c_char, mode: fuse_mode_t, fi: *mut fuse_file_info);
    utimens(path: *const c_char, tv: *const fuse_timespec);
}

#[cfg(any(target_os = "macos", windows))]
forward! {
    setchgtime(path: *const c_char, tv: *const fuse_timespec);
    setcrtime(path: *const c_char, tv: *const fuse_timespec);
    chflags(path: *const c_char, flags: u32);
}

#[cfg(windows)]
forward! {
    getpath(path: *const c_char, buf: *mut c_char, size: usize, fi: *mut fuse_file_info);
}

// osxfuse passes a resource fork position; only position 0 exists here.
#[cfg(target_os = "macos")]
unsafe extern "C" fn setxattr(
    path: *const c_char,
    name: *const c_char,
    value: *const c_char,
    size: usize,
    flags: c_int,
    _position: u32,
) -> c_int {
    dispatch::setxattr(current().0, path, name, value, size, flags)
}

#[cfg(target_os = "macos")]
unsafe extern "C" fn getxattr(
    path: *const c_char,
    name: *const c_char,
    value: *mut c_char,
    size: usize,
    _position: u32,
) -> c_int {
    dispatch::getxattr(current().0, path, name, value, size)
}

#[cfg(not(target_os = "macos"))]
forward! {
    setxattr(path: *const c_char, name: *const c_char, value: *const c_char, size: usize, flags: c_int);
    getxattr(path: *const c_char, name: *const c_char, value: *mut c_char, size: usize);
}

unsafe extern "C" fn init(conn: *mut fuse_conn_info) -> *mut c_void {
    let (token, session) = current();
    dispatch::init(token, session, conn)
}

unsafe extern "C" fn destroy(user_data: *mut c_void) {
    match Token::from_ptr(user_data) {
        Some(token) => dispatch::destroy(token),
        None => dispatch::orphaned_request(),
    }
}

/// Builds the operation table for one mount.
///
/// `getpath` is only installed when case-insensitive lookup was requested,
/// which is when WinFsp consults it.
pub(crate) fn operations(requested: &Capabilities) -> fuse_operations {
    let _ = requested;
    #[allow(unused_mut)]
    let mut ops = fuse_operations {
        getattr: Some(getattr),
        readlink: Some(readlink),
        mknod: Some(mknod),
        mkdir: Some(mkdir),
        unlink: Some(unlink),
        rmdir: Some(rmdir),
        symlink: Some(symlink),
        rename: Some(rename),
        link: Some(link),
        chmod: Some(chmod),
        chown: Some(chown),
        truncate: Some(truncate),
        open: Some(open),
        read: Some(read),
        write: Some(write),
        statfs: Some(statfs),
        flush: Some(flush),
        release: Some(release),
        fsync: Some(fsync),
        setxattr: Some(setxattr),
        getxattr: Some(getxattr),
        listxattr: Some(listxattr),
        removexattr: Some(removexattr),
        opendir: Some(opendir),
        readdir: Some(readdir),
        releasedir: Some(releasedir),
        fsyncdir: Some(fsyncdir),
        init: Some(init),
        destroy: Some(destroy),
        access: Some(access),
        create: Some(create),
        ftruncate: Some(ftruncate),
        fgetattr: Some(fgetattr),
        utimens: Some(utimens),
        flags: FLAG_UTIME_OMIT_OK,
        ..Default::default()
    };
    #[cfg(any(target_os = "macos", windows))]
    {
        ops.extended.setchgtime = Some(setchgtime);
        ops.extended.setcrtime = Some(setcrtime);
        ops.extended.chflags = Some(chflags);
    }
    #[cfg(windows)]
    if requested.case_insensitive {
        ops.extended.getpath = Some(getpath);
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_installs_core_operations() {
        let ops = operations(&Capabilities::default());
        assert!(ops.getattr.is_some());
        assert!(ops.fgetattr.is_some());
        assert!(ops.create.is_some());
        assert!(ops.init.is_some() && ops.destroy.is_some());
        assert!(ops.utime.is_none());
        assert!(ops.lock.is_none());
        assert_eq!(ops.flags & FLAG_UTIME_OMIT_OK, FLAG_UTIME_OMIT_OK);
    }
}
