//! Runtime loading of the platform FUSE library.
//!
//! The library is opened at most once per process and kept for its whole
//! life, so function pointers copied out of it stay valid.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;
use std::sync::OnceLock;

use fusehost_types::{Gid, Pid, Uid};
use libloading::Library;
use tracing::{debug, info, warn};

use super::abi::{fuse_context, fuse_operations};
use super::callbacks;
use super::NativeSession;
use crate::capability::Capabilities;
use crate::context::RequestContext;
use crate::error::HostError;
use crate::handle::Token;

/// Overrides the search list with an explicit library path.
pub const LIBRARY_ENV: &str = "FUSEHOST_LIBRARY";

type MainRealFn =
    unsafe extern "C" fn(c_int, *mut *mut c_char, *const fuse_operations, usize, *mut c_void) -> c_int;
type GetContextFn = unsafe extern "C" fn() -> *mut fuse_context;
type ExitFn = unsafe extern "C" fn(*mut c_void);
#[cfg(windows)]
type NotifyFn = unsafe extern "C" fn(*mut FspFuseEnv, *mut c_void, *const c_char, u32) -> c_int;

#[derive(Debug, Clone)]
enum LoadError {
    NotFound { tried: Vec<String> },
    MissingSymbol { library: String, symbol: &'static str },
}

impl From<&LoadError> for HostError {
    fn from(e: &LoadError) -> Self {
        match e {
            LoadError::NotFound { tried } => HostError::LibraryNotFound {
                tried: tried.join(", "),
            },
            LoadError::MissingSymbol { library, symbol } => HostError::MissingSymbol {
                library: library.clone(),
                symbol: *symbol,
            },
        }
    }
}

/// An opened FUSE library and the entry points the bridge uses.
pub struct LibFuse {
    _library: Library,
    name: String,
    main_real: MainRealFn,
    get_context: GetContextFn,
    #[cfg_attr(unix, allow(dead_code))]
    exit: ExitFn,
    #[cfg(windows)]
    notify: Option<NotifyFn>,
}

impl std::fmt::Debug for LibFuse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibFuse").field("name", &self.name).finish()
    }
}

static LIBFUSE: OnceLock<Result<LibFuse, LoadError>> = OnceLock::new();

/// Opens the library on first use.
pub fn load() -> Result<&'static LibFuse, HostError> {
    LIBFUSE
        .get_or_init(LibFuse::open)
        .as_ref()
        .map_err(HostError::from)
}

/// The library, if a previous [`load`] succeeded.
pub fn loaded() -> Option<&'static LibFuse> {
    LIBFUSE.get().and_then(|r| r.as_ref().ok())
}

fn candidates() -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(path) = std::env::var(LIBRARY_ENV) {
        names.push(path);
    }
    #[cfg(target_os = "macos")]
    names.extend(
        [
            "/usr/local/lib/libfuse.2.dylib",
            "/usr/local/lib/libosxfuse.2.dylib",
            "libfuse.2.dylib",
            "libosxfuse.2.dylib",
        ]
        .map(String::from),
    );
    #[cfg(all(unix, not(target_os = "macos")))]
    names.extend(["libfuse.so.2", "libfuse.so"].map(String::from));
    #[cfg(windows)]
    {
        let dll = if cfg!(target_pointer_width = "64") {
            "winfsp-x64.dll"
        } else {
            "winfsp-x86.dll"
        };
        names.push(dll.to_string());
        // The installer puts the DLL under <install dir>\bin, which is not
        // on the search path.
        for var in ["ProgramFiles(x86)", "ProgramFiles"] {
            if let Ok(base) = std::env::var(var) {
                names.push(format!("{base}\\WinFsp\\bin\\{dll}"));
            }
        }
    }
    names
}

impl LibFuse {
    fn open() -> Result<LibFuse, LoadError> {
        let tried = candidates();
        for name in &tried {
            // SAFETY: loading a FUSE library runs no initialisation code
            // with preconditions beyond being loaded once.
            match unsafe { Library::new(name) } {
                Ok(library) => {
                    info!(library = %name, "loaded FUSE library");
                    return Self::bind(library, name.clone());
                }
                Err(e) => debug!(library = %name, error = %e, "FUSE library candidate rejected"),
            }
        }
        warn!(?tried, "no FUSE library found");
        Err(LoadError::NotFound { tried })
    }

    fn bind(library: Library, name: String) -> Result<LibFuse, LoadError> {
        fn symbol<T: Copy>(library: &Library, name: &str, symbol: &'static str) -> Result<T, LoadError> {
            let mut cname = symbol.as_bytes().to_vec();
            cname.push(0);
            // SAFETY: T is the C signature of `symbol` in the FUSE 2.8 API.
            unsafe { library.get::<T>(&cname) }
                .map(|s| *s)
                .map_err(|_| LoadError::MissingSymbol {
                    library: name.to_string(),
                    symbol,
                })
        }

        let main_real = symbol::<MainRealFn>(&library, &name, "fuse_main_real")?;
        let get_context = symbol::<GetContextFn>(&library, &name, "fuse_get_context")?;
        let exit = symbol::<ExitFn>(&library, &name, "fuse_exit")?;
        #[cfg(windows)]
        let notify = symbol::<NotifyFn>(&library, &name, "fsp_fuse_notify").ok();

        Ok(LibFuse {
            _library: library,
            name,
            main_real,
            get_context,
            exit,
            #[cfg(windows)]
            notify,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the event loop. Blocks until unmount.
    pub(crate) fn main(&self, argv: &[CString], token: Token, requested: &Capabilities) -> i32 {
        let mut ptrs: Vec<*mut c_char> = argv.iter().map(|a| a.as_ptr() as *mut c_char).collect();
        ptrs.push(std::ptr::null_mut());
        let argc = c_int::try_from(argv.len()).unwrap_or(c_int::MAX);
        let ops = callbacks::operations(requested);
        // SAFETY: argv is NUL-terminated and outlives the call, as does
        // the operation table; the token stays registered until we return.
        unsafe {
            (self.main_real)(
                argc,
                ptrs.as_mut_ptr(),
                &ops,
                std::mem::size_of::<fuse_operations>(),
                token.as_ptr(),
            )
        }
    }

    /// The raw `fuse_context` of the current thread.
    pub(crate) fn raw_context(&self) -> Option<&fuse_context> {
        // SAFETY: fuse_get_context returns a thread-local record or null.
        unsafe { (self.get_context)().as_ref() }
    }

    pub fn context(&self) -> Option<RequestContext> {
        self.raw_context().map(|ctx| RequestContext {
            uid: Uid(ctx.uid),
            gid: Gid(ctx.gid),
            pid: Pid(ctx.pid),
            umask: u32::from(ctx.umask),
        })
    }

    /// macOS and the BSDs: `unmount(MNT_FORCE)` is open to the mounting user.
    #[cfg(all(unix, not(target_os = "linux")))]
    pub fn unmount(&self, _session: NativeSession, mountpoint: Option<&Path>) -> bool {
        let Some(path) = mountpoint.and_then(path_to_cstring) else {
            return false;
        };
        // SAFETY: path is a valid C string.
        unsafe { libc::unmount(path.as_ptr(), libc::MNT_FORCE) == 0 }
    }

    /// Linux: lazy `umount2` works for root; everyone else goes through
    /// the setuid `fusermount` helper.
    #[cfg(target_os = "linux")]
    pub fn unmount(&self, _session: NativeSession, mountpoint: Option<&Path>) -> bool {
        let Some(mountpoint) = mountpoint else {
            return false;
        };
        if let Some(path) = path_to_cstring(mountpoint) {
            // SAFETY: path is a valid C string.
            if unsafe { libc::umount2(path.as_ptr(), libc::MNT_DETACH) } == 0 {
                return true;
            }
        }
        for helper in ["/bin/fusermount", "fusermount"] {
            match std::process::Command::new(helper)
                .args(["-z", "-u"])
                .arg(mountpoint)
                .status()
            {
                Ok(status) => return status.success(),
                Err(e) => debug!(helper, error = %e, "cannot run unmount helper"),
            }
        }
        false
    }

    /// WinFsp: `fuse_exit` may be called from any thread.
    #[cfg(windows)]
    pub fn unmount(&self, session: NativeSession, _mountpoint: Option<&Path>) -> bool {
        if session.is_none() {
            return false;
        }
        // SAFETY: session is the live `struct fuse *` captured at init.
        unsafe { (self.exit)(session.as_ptr()) };
        true
    }

    #[cfg(not(windows))]
    pub fn notify(&self, _session: NativeSession, _path: &CStr, _action: u32) -> bool {
        false
    }

    #[cfg(windows)]
    pub fn notify(&self, session: NativeSession, path: &CStr, action: u32) -> bool {
        let Some(notify) = self.notify else {
            return false;
        };
        if session.is_none() {
            return false;
        }
        let mut env = FspFuseEnv::native();
        // SAFETY: env matches WinFsp's `struct fsp_fuse_env`, session is a
        // live `struct fuse *` and path a valid C string.
        unsafe { notify(&mut env, session.as_ptr(), path.as_ptr(), action) == 0 }
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Option<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes()).ok()
}

/// WinFsp `struct fsp_fuse_env` for native (non-Cygwin) callers.
#[cfg(windows)]
#[repr(C)]
struct FspFuseEnv {
    environment: std::ffi::c_uint,
    memalloc: unsafe extern "C" fn(usize) -> *mut c_void,
    memfree: unsafe extern "C" fn(*mut c_void),
    daemonize: unsafe extern "C" fn(c_int) -> c_int,
    set_signal_handlers: unsafe extern "C" fn(*mut c_void) -> c_int,
    conv_to_win_path: Option<unsafe extern "C" fn(*const c_char) -> *mut c_char>,
    winpid_to_pid: Option<unsafe extern "C" fn(u32) -> i32>,
    reserved: [Option<unsafe extern "C" fn()>; 2],
}

#[cfg(windows)]
impl FspFuseEnv {
    fn native() -> Self {
        unsafe extern "C" fn daemonize(_foreground: c_int) -> c_int {
            0
        }
        unsafe extern "C" fn set_signal_handlers(_se: *mut c_void) -> c_int {
            0
        }
        FspFuseEnv {
            environment: b'W' as std::ffi::c_uint,
            memalloc: libc::malloc,
            memfree: libc::free,
            daemonize,
            set_signal_handlers,
            conv_to_win_path: None,
            winpid_to_pid: None,
            reserved: [None; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_respect_override() {
        std::env::set_var(LIBRARY_ENV, "/opt/custom/libfuse.so.2");
        let names = candidates();
        std::env::remove_var(LIBRARY_ENV);
        assert_eq!(names[0], "/opt/custom/libfuse.so.2");
        assert!(names.len() > 1);
    }

    #[test]
    fn test_load_error_conversion() {
        let e = LoadError::NotFound {
            tried: vec!["a".into(), "b".into()],
        };
        assert_eq!(HostError::from(&e).to_string(), "FUSE library not found (tried a, b)");
        let e = LoadError::MissingSymbol {
            library: "libfuse.so.2".into(),
            symbol: "fuse_main_real",
        };
        assert!(matches!(HostError::from(&e), HostError::MissingSymbol { symbol: "fuse_main_real", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_to_cstring() {
        assert_eq!(
            path_to_cstring(Path::new("/mnt/x")).unwrap().as_bytes(),
            b"/mnt/x"
        );
    }
}
