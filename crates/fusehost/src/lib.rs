//! fusehost: run a Rust filesystem on top of the platform's FUSE library.
//!
//! The native library (libfuse 2 on Linux/FreeBSD, osxfuse on macOS,
//! WinFsp on Windows) owns the kernel connection and the worker threads.
//! This crate registers a [`FileSystem`] implementation with it, translates
//! each native callback into a trait call, and manages the mount's life.
//!
//! # Architecture
//!
//! - **[`ops`]** - The `FileSystem` trait. Every operation has a default
//!   that returns `ENOSYS`, so partial implementations mount fine.
//!
//! - **[`handle`]** - `HandleRegistry`, mapping the opaque token stored in
//!   the native `private_data` pointer back to the mounted host.
//!
//! - **[`marshal`]** - Neutral `Stat` / `Statfs` / `Timespec` into the
//!   Linux, macOS and WinFsp native layouts.
//!
//! - **`dispatch`** - One adapter per native operation, with panic
//!   containment and the `ENOSYS` fallbacks kernel clients rely on.
//!
//! - **[`host`]** - `Host`, the mount / unmount state machine, plus the
//!   SIGINT / SIGTERM listener that unmounts on POSIX.
//!
//! - **[`opt`]** - `opt_parse`, a small parser for native-style argument
//!   lists.
//!
//! - **[`native`]** - `#[repr(C)]` ABI, runtime library loading and the
//!   `extern "C"` trampolines.
//!
//! # Usage
//!
//! ```rust,no_run
//! use fusehost::{FileSystem, FsResult, Host, Stat};
//!
//! struct Hello;
//!
//! impl FileSystem for Hello {
//!     fn getattr(&self, path: &str, _fh: Option<u64>) -> FsResult<Stat> {
//!         match path {
//!             "/" => Ok(Stat::directory(0o555)),
//!             _ => Err(libc::ENOENT),
//!         }
//!     }
//! }
//!
//! let host = Host::new(Hello);
//! host.mount("/mnt/hello", &["-o", "ro"]);
//! ```

pub mod capability;
pub mod config;
pub mod context;
pub(crate) mod dispatch;
pub mod error;
pub mod handle;
pub mod host;
pub mod marshal;
pub mod native;
pub mod ops;
pub mod opt;
pub(crate) mod signal;

pub use capability::Capabilities;
pub use config::{ConfigError, HostConfig};
pub use context::{get_context, RequestContext};
pub use error::{raise, Errno, HostError, OptError};
pub use handle::Token;
pub use host::{Host, MountState, NotifyAction};
pub use native::{NativeFuse, NativeSession, SystemFuse};
pub use ops::{DirFiller, FileSystem, FsResult, XattrFiller, NO_HANDLE};
pub use opt::{opt_parse, OptSlot};

pub use fusehost_types::{Gid, Pid, Stat, Statfs, Timespec, Uid};
