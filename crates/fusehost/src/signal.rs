//! SIGINT / SIGTERM listener used to unmount before the process exits.
//!
//! A POSIX mount outlives a killed process, leaving a dead mountpoint
//! behind. While a host is mounted a small thread runs a single-threaded
//! tokio runtime that waits for either signal and invokes the unmount
//! callback. A callback that reports failure leaves the listener armed so
//! the next signal retries.
//!
//! On POSIX the handlers are installed with `sigaction` when the first
//! listener arms and the previous actions are put back when the last one
//! goes away, so the process handles signals as before once no mount is
//! listening.

use std::io;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[cfg(test)]
pub(crate) static SIGNAL_TESTS: parking_lot::Mutex<()> = parking_lot::const_mutex(());

pub(crate) struct SignalListener {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SignalListener {
    /// Starts listening. Returns once the handlers are registered, so a
    /// signal sent right after `arm` returns is not missed.
    ///
    /// `on_signal` returns true when the unmount went through; the
    /// listener then stops on its own.
    pub(crate) fn arm<F>(on_signal: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<()>>();

        #[cfg(unix)]
        let source = posix::register()?;
        #[cfg(not(unix))]
        let source = ();

        let thread = thread::Builder::new()
            .name("fusehost-signal".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                runtime.block_on(listen(source, stop_rx, ready_tx, on_signal));
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(SignalListener {
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(io::Error::other("signal listener exited during startup"))
            }
        }
    }

    /// Stops listening. A callback already running is not interrupted.
    pub(crate) fn disarm(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Disarms and waits for the listener thread to exit. The previous
    /// signal actions are back in place when this returns.
    pub(crate) fn finish(mut self) {
        self.disarm();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("signal listener thread panicked");
            }
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(unix)]
async fn listen<F: FnMut() -> bool>(
    source: posix::Source,
    mut stop: oneshot::Receiver<()>,
    ready: mpsc::Sender<io::Result<()>>,
    mut on_signal: F,
) {
    let posix::Source { registration, wake } = source;
    let wake = match tokio::net::UnixStream::from_std(wake) {
        Ok(wake) => wake,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut buf = [0u8; 16];
    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!("signal listener disarmed");
                break;
            }
            readable = wake.readable() => {
                if let Err(e) = readable {
                    warn!(error = %e, "signal listener stopped");
                    break;
                }
                let n = match wake.try_read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        warn!(error = %e, "signal listener stopped");
                        break;
                    }
                };
                info!(signal = posix::name(buf[n - 1]), "received shutdown signal, unmounting");
                if on_signal() {
                    break;
                }
                warn!("unmount after signal failed; waiting for another signal");
            }
        }
    }
    drop(registration);
}

#[cfg(not(unix))]
async fn listen<F: FnMut() -> bool>(
    _source: (),
    mut stop: oneshot::Receiver<()>,
    ready: mpsc::Sender<io::Result<()>>,
    mut on_signal: F,
) {
    let _ = ready.send(Ok(()));
    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!("signal listener disarmed");
                return;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "signal listener stopped");
                    return;
                }
                info!("received CTRL+C, unmounting");
                if on_signal() {
                    return;
                }
                warn!("unmount after CTRL+C failed; waiting for another one");
            }
        }
    }
}

// ── POSIX handlers ──────────────────────────────────────────────────────────

#[cfg(unix)]
mod posix {
    use std::io;
    use std::mem;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::ptr;
    use std::sync::atomic::{AtomicI32, Ordering};

    use libc::c_int;
    use parking_lot::Mutex;

    const SIGNALS: [c_int; 2] = [libc::SIGINT, libc::SIGTERM];
    const SLOTS: usize = 32;

    /// Write ends of the armed listeners' sockets; -1 when free. The
    /// handler only loads these, so it stays async-signal-safe.
    static WAKE: [AtomicI32; SLOTS] = [const { AtomicI32::new(-1) }; SLOTS];

    struct Installed {
        active: usize,
        previous: Vec<(c_int, libc::sigaction)>,
    }

    static INSTALLED: Mutex<Installed> = parking_lot::const_mutex(Installed {
        active: 0,
        previous: Vec::new(),
    });

    /// What an armed listener owns: its slot, and the read end it waits on.
    pub(super) struct Source {
        pub(super) registration: Registration,
        pub(super) wake: UnixStream,
    }

    pub(super) struct Registration {
        slot: usize,
        _notify: UnixStream,
    }

    pub(super) fn register() -> io::Result<Source> {
        let (wake, notify) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        notify.set_nonblocking(true)?;

        let mut installed = INSTALLED.lock();
        let slot = WAKE
            .iter()
            .position(|fd| fd.load(Ordering::Acquire) < 0)
            .ok_or_else(|| io::Error::other("too many signal listeners"))?;
        if installed.active == 0 {
            installed.previous = install()?;
        }
        installed.active += 1;
        WAKE[slot].store(notify.as_raw_fd(), Ordering::Release);

        Ok(Source {
            registration: Registration {
                slot,
                _notify: notify,
            },
            wake,
        })
    }

    impl Drop for Registration {
        fn drop(&mut self) {
            let mut installed = INSTALLED.lock();
            WAKE[self.slot].store(-1, Ordering::Release);
            installed.active -= 1;
            if installed.active == 0 {
                restore(&mem::take(&mut installed.previous));
            }
        }
    }

    extern "C" fn on_signal(signo: c_int) {
        let byte = signo as u8;
        for fd in &WAKE {
            let fd = fd.load(Ordering::Acquire);
            if fd >= 0 {
                unsafe { libc::write(fd, ptr::addr_of!(byte).cast(), 1) };
            }
        }
    }

    fn install() -> io::Result<Vec<(c_int, libc::sigaction)>> {
        let mut previous = Vec::with_capacity(SIGNALS.len());
        for sig in SIGNALS {
            // SAFETY: both structs are plain data, zero is a valid initial state.
            let mut action: libc::sigaction = unsafe { mem::zeroed() };
            let mut old: libc::sigaction = unsafe { mem::zeroed() };
            action.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            let rc = unsafe {
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(sig, &action, &mut old)
            };
            if rc != 0 {
                let err = io::Error::last_os_error();
                restore(&previous);
                return Err(err);
            }
            previous.push((sig, old));
        }
        Ok(previous)
    }

    fn restore(previous: &[(c_int, libc::sigaction)]) {
        for (sig, old) in previous {
            unsafe { libc::sigaction(*sig, old, ptr::null_mut()) };
        }
    }

    pub(super) fn name(signo: u8) -> &'static str {
        match c_int::from(signo) {
            libc::SIGINT => "SIGINT",
            libc::SIGTERM => "SIGTERM",
            _ => "signal",
        }
    }
}
