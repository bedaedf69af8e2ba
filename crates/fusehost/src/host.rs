//! Mount lifecycle: `Unmounted → Mounting → Mounted → Unmounting → Unmounted`.
//!
//! [`Host::mount`] blocks in the native event loop for the whole life of
//! the mount. `init` (from the native side) moves the host to `Mounted`;
//! from then on [`Host::unmount`], or SIGINT / SIGTERM on POSIX, can end
//! it. `mount` does not return until any unmount that was already under
//! way has completed.

use std::ffi::CString;
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::capability::Capabilities;
use crate::config::HostConfig;
use crate::error::HostError;
use crate::handle::registry;
use crate::native::{NativeFuse, NativeSession, SystemFuse};
use crate::ops::FileSystem;
use crate::opt::opt_parse;
use crate::signal::SignalListener;

// ── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MountState::Unmounted => "unmounted",
            MountState::Mounting => "mounting",
            MountState::Mounted => "mounted",
            MountState::Unmounting => "unmounting",
        };
        f.write_str(s)
    }
}

/// Change kinds for [`Host::notify`]. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NotifyAction(u32);

impl NotifyAction {
    pub const MKDIR: NotifyAction = NotifyAction(0x0001);
    pub const RMDIR: NotifyAction = NotifyAction(0x0002);
    pub const CREATE: NotifyAction = NotifyAction(0x0004);
    pub const UNLINK: NotifyAction = NotifyAction(0x0008);
    pub const CHMOD: NotifyAction = NotifyAction(0x0010);
    pub const CHOWN: NotifyAction = NotifyAction(0x0020);
    pub const UTIME: NotifyAction = NotifyAction(0x0040);
    pub const CHFLAGS: NotifyAction = NotifyAction(0x0080);
    pub const TRUNCATE: NotifyAction = NotifyAction(0x0100);

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for NotifyAction {
    type Output = NotifyAction;

    fn bitor(self, rhs: NotifyAction) -> NotifyAction {
        NotifyAction(self.0 | rhs.0)
    }
}

#[derive(Debug)]
struct MountRecord {
    state: MountState,
    session: NativeSession,
    mountpoint: Option<PathBuf>,
}

impl MountRecord {
    fn idle() -> Self {
        MountRecord {
            state: MountState::Unmounted,
            session: NativeSession::NONE,
            mountpoint: None,
        }
    }
}

// ── Shared host state ───────────────────────────────────────────────────────

/// The registered object behind a mount's token. Shared by the thread
/// blocked in `mount`, the native worker threads and the signal listener.
pub(crate) struct HostInner {
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) config: HostConfig,
    native: Arc<dyn NativeFuse>,
    negotiated: RwLock<Capabilities>,
    record: Mutex<MountRecord>,
    /// Held for the duration of every unmount attempt; `mount` takes it
    /// once after the event loop exits so it never returns mid-unmount.
    unmount_gate: Mutex<()>,
    listener: Mutex<Option<SignalListener>>,
}

impl HostInner {
    pub(crate) fn new(fs: Arc<dyn FileSystem>, config: HostConfig, native: Arc<dyn NativeFuse>) -> Self {
        HostInner {
            fs,
            config,
            native,
            negotiated: RwLock::new(Capabilities::default()),
            record: Mutex::new(MountRecord::idle()),
            unmount_gate: Mutex::new(()),
            listener: Mutex::new(None),
        }
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        *self.negotiated.read()
    }

    pub(crate) fn state(&self) -> MountState {
        self.record.lock().state
    }

    /// Called from the native `init` callback.
    pub(crate) fn on_init(self: &Arc<Self>, session: NativeSession, caps: Capabilities) {
        *self.negotiated.write() = caps;
        let mountpoint = {
            let mut record = self.record.lock();
            record.state = MountState::Mounted;
            record.session = session;
            record.mountpoint.clone()
        };
        info!(mountpoint = ?mountpoint, ?caps, "filesystem mounted");

        if self.config.signal_unmount && self.native.needs_signal_unmount() {
            let host = Arc::downgrade(self);
            let armed = SignalListener::arm(move || host.upgrade().map_or(true, |host| host.unmount()));
            match armed {
                Ok(listener) => *self.listener.lock() = Some(listener),
                Err(e) => warn!(error = %e, "could not install signal listener; mount will not unmount on SIGINT/SIGTERM"),
            }
        }
    }

    /// Called from the native `destroy` callback, after the filesystem's
    /// own `destroy`.
    pub(crate) fn on_destroy(&self) {
        if let Some(listener) = self.listener.lock().as_mut() {
            listener.disarm();
        }
        let mut record = self.record.lock();
        if record.state == MountState::Mounted {
            record.state = MountState::Unmounting;
        }
        debug!("filesystem destroyed");
    }

    pub(crate) fn unmount(&self) -> bool {
        let _gate = self.unmount_gate.lock();
        let (session, mountpoint) = {
            let mut record = self.record.lock();
            if record.state != MountState::Mounted {
                debug!(state = %record.state, "unmount ignored");
                return false;
            }
            record.state = MountState::Unmounting;
            (record.session, record.mountpoint.clone())
        };

        info!(mountpoint = ?mountpoint, "unmounting");
        let done = self.native.unmount(session, mountpoint.as_deref());
        if !done {
            let mut record = self.record.lock();
            if record.state == MountState::Unmounting {
                record.state = MountState::Mounted;
            }
            warn!(mountpoint = ?mountpoint, "unmount failed");
        }
        done
    }
}

// ── Host ────────────────────────────────────────────────────────────────────

/// One mountable filesystem.
///
/// ```no_run
/// use fusehost::{FileSystem, Host};
///
/// struct Empty;
/// impl FileSystem for Empty {}
///
/// let host = Host::new(Empty);
/// let clean = host.mount("/mnt/empty", &["-o", "ro"]);
/// ```
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    pub fn new<F: FileSystem + 'static>(fs: F) -> Self {
        Self::with_config(fs, HostConfig::default())
    }

    pub fn with_config<F: FileSystem + 'static>(fs: F, config: HostConfig) -> Self {
        Self::with_native(Arc::new(fs), config, Arc::new(SystemFuse))
    }

    /// Builds a host that drives `native` instead of the system library.
    pub fn with_native(fs: Arc<dyn FileSystem>, config: HostConfig, native: Arc<dyn NativeFuse>) -> Self {
        Host {
            inner: Arc::new(HostInner::new(fs, config, native)),
        }
    }

    /// Mounts and serves requests until unmounted. Returns true when the
    /// native event loop exited cleanly.
    pub fn mount(&self, mountpoint: &str, options: &[&str]) -> bool {
        match self.try_mount(mountpoint, options) {
            Ok(()) => true,
            Err(e) => {
                error!(mountpoint, error = %e, "mount failed");
                false
            }
        }
    }

    /// Like [`Host::mount`], reporting why a mount failed.
    pub fn try_mount(&self, mountpoint: &str, options: &[&str]) -> Result<(), HostError> {
        {
            let mut record = self.inner.record.lock();
            if record.state != MountState::Unmounted {
                return Err(HostError::AlreadyMounted);
            }
            record.state = MountState::Mounting;
        }

        let result = self.serve(mountpoint, options);
        *self.inner.record.lock() = MountRecord::idle();
        result
    }

    fn serve(&self, mountpoint: &str, options: &[&str]) -> Result<(), HostError> {
        let inner = &self.inner;
        inner.native.prepare()?;

        let args = build_args(&inner.config, mountpoint, options);
        let argv = args
            .iter()
            .map(|a| CString::new(a.as_str()).map_err(|_| HostError::NulInArgument(a.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        inner.record.lock().mountpoint = resolve_mountpoint(&args[1..]);

        let token = registry().register(inner.clone());
        debug!(?args, ?token, "entering native event loop");
        let status = inner.native.run(&argv, token, &inner.config.requested_capabilities());

        // Wait out a signal-triggered or concurrent unmount before the
        // token goes away.
        let listener = inner.listener.lock().take();
        if let Some(listener) = listener {
            listener.finish();
        }
        drop(inner.unmount_gate.lock());
        registry().release(token);

        if status != 0 {
            return Err(HostError::NativeFailure(status));
        }
        info!(mountpoint, "native event loop exited");
        Ok(())
    }

    /// Ends a running mount. False before `init` has run or once the
    /// mount has already ended.
    pub fn unmount(&self) -> bool {
        self.inner.unmount()
    }

    pub fn state(&self) -> MountState {
        self.inner.state()
    }

    /// The directory the native layer mounted on, once known.
    pub fn mountpoint(&self) -> Option<PathBuf> {
        self.inner.record.lock().mountpoint.clone()
    }

    /// Capabilities agreed with the native library at `init`.
    pub fn negotiated(&self) -> Capabilities {
        self.inner.capabilities()
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Tells the kernel that `path` changed behind its back. Only WinFsp
    /// supports this; elsewhere, or when not mounted, returns false.
    pub fn notify(&self, path: &str, action: NotifyAction) -> bool {
        let session = {
            let record = self.inner.record.lock();
            if record.state != MountState::Mounted {
                return false;
            }
            record.session
        };
        match CString::new(path) {
            Ok(path) => self.inner.native.notify(session, &path, action.bits()),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.inner.record.lock();
        f.debug_struct("Host")
            .field("state", &record.state)
            .field("mountpoint", &record.mountpoint)
            .finish()
    }
}

/// `program [mountpoint] -f options... config.options...`. Daemonizing is
/// never allowed: a forked child would lose every thread but one.
fn build_args(config: &HostConfig, mountpoint: &str, options: &[&str]) -> Vec<String> {
    let mut args = vec![config.program_name.clone()];
    if !mountpoint.is_empty() {
        args.push(mountpoint.to_string());
    }
    args.push("-f".to_string());
    args.extend(options.iter().map(|o| o.to_string()));
    args.extend(config.options.iter().cloned());
    args
}

/// The first non-option argument, which is what the native layer mounts.
fn resolve_mountpoint(args: &[String]) -> Option<PathBuf> {
    let positional = match opt_parse(args, "", &mut []) {
        Ok(positional) => positional,
        Err(e) => {
            warn!(error = %e, "cannot determine mountpoint from arguments");
            return None;
        }
    };
    let first = Path::new(positional.first()?);
    if cfg!(unix) {
        Some(std::fs::canonicalize(first).unwrap_or_else(|_| first.to_path_buf()))
    } else {
        Some(first.to_path_buf())
    }
}

// ── Test double ─────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::MockFuse;
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct TrackingFs {
        destroyed: AtomicBool,
    }

    impl FileSystem for TrackingFs {
        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    fn config() -> HostConfig {
        HostConfig {
            program_name: "probe".into(),
            ..Default::default()
        }
    }

    fn host_with(native: Arc<MockFuse>) -> (Host, Arc<TrackingFs>) {
        let fs = Arc::new(TrackingFs::default());
        (Host::with_native(fs.clone(), config(), native), fs)
    }

    fn wait_for(host: &Host, state: MountState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while host.state() != state {
            assert!(Instant::now() < deadline, "host never reached {state}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_unmount_before_mount_is_rejected() {
        let (host, _) = host_with(Arc::new(MockFuse::default()));
        assert_eq!(host.state(), MountState::Unmounted);
        assert!(!host.unmount());
        assert!(!host.notify("/x", NotifyAction::CREATE));
    }

    #[test]
    fn test_unmount_before_init_is_rejected() {
        let native = Arc::new(MockFuse {
            unmount_before_init: true,
            fail_with: Some(1),
            ..Default::default()
        });
        let (host, _) = host_with(native.clone());
        assert!(!host.mount("/mnt/probe", &[]));
        assert_eq!(*native.early_unmount.lock(), Some(false));
        assert_eq!(native.unmounts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_unmount_ends_mount() {
        let native = Arc::new(MockFuse::default());
        let (host, fs) = host_with(native.clone());

        thread::scope(|s| {
            let mounted = s.spawn(|| host.mount("/mnt/probe", &["-o", "ro"]));
            wait_for(&host, MountState::Mounted);
            assert!(host.unmount());
            assert!(mounted.join().unwrap());
        });

        assert_eq!(host.state(), MountState::Unmounted);
        assert!(!host.unmount());
        assert!(fs.destroyed.load(Ordering::SeqCst));
        assert_eq!(native.unmounts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_unmount_keeps_mount() {
        let native = Arc::new(MockFuse {
            refuse_unmount: true,
            ..Default::default()
        });
        let (host, _) = host_with(native.clone());

        thread::scope(|s| {
            let mounted = s.spawn(|| host.mount("/mnt/probe", &[]));
            wait_for(&host, MountState::Mounted);
            assert!(!host.unmount());
            assert_eq!(host.state(), MountState::Mounted);
            native.finish();
            assert!(mounted.join().unwrap());
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_unmount_waits_for_unmount_to_finish() {
        let _serial = crate::signal::SIGNAL_TESTS.lock();
        let native = Arc::new(MockFuse {
            signal_unmount: true,
            unmount_delay: Duration::from_millis(300),
            ..Default::default()
        });
        let (host, fs) = host_with(native.clone());

        thread::scope(|s| {
            let mounted = s.spawn(|| host.mount("/mnt/probe", &[]));
            wait_for(&host, MountState::Mounted);
            let deadline = Instant::now() + Duration::from_secs(5);
            while host.inner.listener.lock().is_none() {
                assert!(Instant::now() < deadline, "signal listener never armed");
                thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(unsafe { libc::raise(libc::SIGINT) }, 0);
            assert!(mounted.join().unwrap());
        });

        assert!(fs.destroyed.load(Ordering::SeqCst));
        assert_eq!(host.state(), MountState::Unmounted);
        assert_eq!(native.unmounts.load(Ordering::SeqCst), 1);
        assert_eq!(native.unmounts_completed.load(Ordering::SeqCst), 1);
        assert!(host.inner.listener.lock().is_none());
    }

    #[test]
    fn test_native_failure_is_reported() {
        let native = Arc::new(MockFuse {
            fail_with: Some(7),
            ..Default::default()
        });
        let (host, fs) = host_with(native);
        match host.try_mount("/mnt/probe", &[]) {
            Err(HostError::NativeFailure(7)) => {}
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(host.state(), MountState::Unmounted);
        assert!(!fs.destroyed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_second_mount_while_mounted() {
        let (host, _) = host_with(Arc::new(MockFuse::default()));
        thread::scope(|s| {
            let mounted = s.spawn(|| host.mount("/mnt/probe", &[]));
            wait_for(&host, MountState::Mounted);
            assert!(matches!(host.try_mount("/mnt/other", &[]), Err(HostError::AlreadyMounted)));
            assert!(host.unmount());
            assert!(mounted.join().unwrap());
        });
    }

    #[test]
    fn test_argv_forces_foreground() {
        let native = Arc::new(MockFuse {
            fail_with: Some(0),
            ..Default::default()
        });
        let fs: Arc<dyn FileSystem> = Arc::new(TrackingFs::default());
        let cfg = HostConfig {
            options: vec!["-o".into(), "fsname=probe".into()],
            ..config()
        };
        let host = Host::with_native(fs, cfg, native.clone());
        assert!(host.mount("/mnt/probe", &["-d", "-o", "ro"]));
        assert_eq!(
            *native.argv.lock(),
            vec!["probe", "/mnt/probe", "-f", "-d", "-o", "ro", "-o", "fsname=probe"]
        );
    }

    #[test]
    fn test_argument_with_nul_fails_before_run() {
        let native = Arc::new(MockFuse::default());
        let (host, _) = host_with(native.clone());
        assert!(matches!(
            host.try_mount("/mnt/probe", &["bad\0arg"]),
            Err(HostError::NulInArgument(_))
        ));
        assert!(native.argv.lock().is_empty());
        assert_eq!(host.state(), MountState::Unmounted);
    }

    #[test]
    fn test_mountpoint_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["-f".to_string(), dir.path().display().to_string(), "-o".into(), "ro".into()];
        let resolved = resolve_mountpoint(&args).unwrap();
        assert_eq!(resolved, std::fs::canonicalize(dir.path()).unwrap());

        let missing = vec!["relative/missing".to_string()];
        assert_eq!(resolve_mountpoint(&missing), Some(PathBuf::from("relative/missing")));
        assert_eq!(resolve_mountpoint(&["-d".to_string()]), None);
    }

    #[test]
    fn test_notify_action_bits() {
        let both = NotifyAction::CREATE | NotifyAction::UNLINK;
        assert_eq!(both.bits(), 0x0c);
        assert_eq!(NotifyAction::default().bits(), 0);
    }
}
