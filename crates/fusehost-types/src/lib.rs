//! Platform-neutral data model exchanged between filesystem implementations
//! and the native bridge.
//!
//! Nothing in this crate knows about a particular FUSE flavour; the layout
//! specific conversions live in `fusehost::marshal`.

#[macro_use]
pub mod strong_type;

pub mod ids;
pub mod stat;
pub mod time;

pub use ids::{Gid, Pid, Uid};
pub use stat::{Stat, Statfs};
pub use time::Timespec;
