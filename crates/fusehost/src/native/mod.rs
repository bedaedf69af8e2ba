//! Everything that touches the native FUSE library directly.
//!
//! * [`abi`]: `#[repr(C)]` structures and the operation table.
//! * [`library`]: runtime loading of libfuse / osxfuse / WinFsp.
//! * [`callbacks`]: `extern "C"` entry points installed in the table.
//!
//! [`NativeFuse`] is the seam the host drives; [`SystemFuse`] is the
//! implementation backed by the installed library.

pub mod abi;
pub(crate) mod callbacks;
pub mod library;

use std::ffi::{c_void, CStr, CString};
use std::path::Path;

use crate::capability::Capabilities;
use crate::error::HostError;
use crate::handle::Token;

/// The native `struct fuse *` of a running mount, as an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeSession(usize);

impl NativeSession {
    pub const NONE: NativeSession = NativeSession(0);

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        NativeSession(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// The operations a host needs from a FUSE library.
pub trait NativeFuse: Send + Sync {
    /// Checks the library is usable. Called before any other method, so
    /// a missing library fails the mount before callbacks can start.
    fn prepare(&self) -> Result<(), HostError> {
        Ok(())
    }

    /// Runs `fuse_main_real` with `argv` and `token` as user data. Blocks
    /// until the filesystem is unmounted and returns the native status.
    fn run(&self, argv: &[CString], token: Token, requested: &Capabilities) -> i32;

    /// Forcibly unmounts a running session. Returns true on success.
    fn unmount(&self, session: NativeSession, mountpoint: Option<&Path>) -> bool;

    /// Pushes a change notification for `path` into the kernel cache.
    fn notify(&self, session: NativeSession, path: &CStr, action: u32) -> bool {
        let _ = (session, path, action);
        false
    }

    /// Whether the process must unmount on SIGINT / SIGTERM itself.
    /// POSIX libraries leave the mount behind when the process dies.
    fn needs_signal_unmount(&self) -> bool {
        cfg!(unix)
    }
}

/// [`NativeFuse`] backed by the FUSE library installed on this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFuse;

impl NativeFuse for SystemFuse {
    fn prepare(&self) -> Result<(), HostError> {
        library::load().map(|_| ())
    }

    fn run(&self, argv: &[CString], token: Token, requested: &Capabilities) -> i32 {
        match library::load() {
            Ok(lib) => lib.main(argv, token, requested),
            Err(_) => -1,
        }
    }

    fn unmount(&self, session: NativeSession, mountpoint: Option<&Path>) -> bool {
        match library::loaded() {
            Some(lib) => lib.unmount(session, mountpoint),
            None => false,
        }
    }

    fn notify(&self, session: NativeSession, path: &CStr, action: u32) -> bool {
        library::loaded().is_some_and(|lib| lib.notify(session, path, action))
    }
}
