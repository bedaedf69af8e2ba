//! Neutral `Stat` / `Statfs` / `Timespec` to native layouts and back.
//!
//! Every store starts from an all-zero destination. Integer fields are
//! converted with [`fit`], which saturates instead of truncating when a
//! native field is narrower than the neutral one.

use fusehost_types::{Stat, Statfs, Timespec};

use crate::capability::Capabilities;
use crate::native::abi::{fuse_stat, FspStat, FspStatEx, FspStatvfs, FspTimespec};

// ── Saturating conversion ───────────────────────────────────────────────────

pub(crate) trait Bounded {
    const LOWEST: Self;
    const HIGHEST: Self;
}

macro_rules! bounded {
    ($($t:ty)*) => {
        $(impl Bounded for $t {
            const LOWEST: Self = <$t>::MIN;
            const HIGHEST: Self = <$t>::MAX;
        })*
    };
}

bounded!(i8 i16 i32 i64 isize u8 u16 u32 u64 usize);

/// Converts between integer widths, clamping to the destination's range.
pub(crate) fn fit<S, D>(v: S) -> D
where
    S: Copy + PartialOrd + Default,
    D: TryFrom<S> + Bounded,
{
    D::try_from(v).unwrap_or(if v < S::default() { D::LOWEST } else { D::HIGHEST })
}

// ── Layout traits ───────────────────────────────────────────────────────────

/// A native stat record the bridge can fill.
pub trait StatLayout {
    fn store(&mut self, st: &Stat);
}

/// A native statvfs record the bridge can fill.
pub trait StatfsLayout {
    fn store(&mut self, st: &Statfs);
}

/// A native timespec the bridge can read.
pub trait NativeTime {
    /// `(seconds, nanoseconds)` exactly as the native side encoded them.
    fn raw(&self) -> (i64, i64);
}

/// What a `utimens` timestamp asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpdate {
    Now,
    Omit,
    Set(Timespec),
}

#[cfg(target_os = "macos")]
pub(crate) const UTIME_NOW: i64 = -1;
#[cfg(target_os = "macos")]
pub(crate) const UTIME_OMIT: i64 = -2;
#[cfg(not(target_os = "macos"))]
pub(crate) const UTIME_NOW: i64 = (1 << 30) - 1;
#[cfg(not(target_os = "macos"))]
pub(crate) const UTIME_OMIT: i64 = (1 << 30) - 2;

pub fn time_update<T: NativeTime>(ts: &T) -> TimeUpdate {
    match ts.raw() {
        (_, UTIME_NOW) => TimeUpdate::Now,
        (_, UTIME_OMIT) => TimeUpdate::Omit,
        (sec, nsec) => TimeUpdate::Set(Timespec::new(sec, nsec)),
    }
}

pub fn timespec_from_native<T: NativeTime>(ts: &T) -> Timespec {
    let (sec, nsec) = ts.raw();
    Timespec::new(sec, nsec)
}

// ── WinFsp ──────────────────────────────────────────────────────────────────

impl From<Timespec> for FspTimespec {
    fn from(t: Timespec) -> Self {
        FspTimespec {
            tv_sec: fit(t.sec()),
            tv_nsec: fit(t.nsec()),
        }
    }
}

impl NativeTime for FspTimespec {
    fn raw(&self) -> (i64, i64) {
        (self.tv_sec as i64, self.tv_nsec as i64)
    }
}

impl StatLayout for FspStat {
    fn store(&mut self, st: &Stat) {
        *self = FspStat {
            st_dev: fit(st.dev),
            st_ino: st.ino,
            st_mode: st.mode,
            st_nlink: fit(st.nlink),
            st_uid: st.uid,
            st_gid: st.gid,
            st_rdev: fit(st.rdev),
            st_size: st.size,
            st_atim: st.atim.into(),
            st_mtim: st.mtim.into(),
            st_ctim: st.ctim.into(),
            st_blksize: fit(st.blksize),
            st_blocks: st.blocks,
            st_birthtim: st.effective_birthtime().into(),
        };
    }
}

impl StatLayout for FspStatEx {
    fn store(&mut self, st: &Stat) {
        *self = FspStatEx::default();
        self.base.store(st);
        self.st_flags = st.flags;
    }
}

impl StatfsLayout for FspStatvfs {
    fn store(&mut self, st: &Statfs) {
        *self = FspStatvfs {
            f_bsize: st.bsize,
            f_frsize: st.frsize,
            f_blocks: fit(st.blocks),
            f_bfree: fit(st.bfree),
            f_bavail: fit(st.bavail),
            f_files: fit(st.files),
            f_ffree: fit(st.ffree),
            f_favail: fit(st.favail),
            f_fsid: st.fsid,
            f_flag: st.flag,
            f_namemax: st.namemax,
        };
    }
}

// ── POSIX ───────────────────────────────────────────────────────────────────

#[cfg(unix)]
impl NativeTime for libc::timespec {
    fn raw(&self) -> (i64, i64) {
        (self.tv_sec as i64, self.tv_nsec as i64)
    }
}

/// Linux / FreeBSD: no birth time, no flags.
#[cfg(all(unix, not(target_os = "macos")))]
impl StatLayout for libc::stat {
    fn store(&mut self, st: &Stat) {
        // SAFETY: libc::stat is plain integers; all-zero is a valid value.
        *self = unsafe { std::mem::zeroed() };
        self.st_dev = fit(st.dev);
        self.st_ino = fit(st.ino);
        self.st_mode = fit(st.mode);
        self.st_nlink = fit(st.nlink);
        self.st_uid = st.uid;
        self.st_gid = st.gid;
        self.st_rdev = fit(st.rdev);
        self.st_size = fit(st.size);
        self.st_blksize = fit(st.blksize);
        self.st_blocks = fit(st.blocks);
        self.st_atime = fit(st.atim.sec());
        self.st_atime_nsec = fit(st.atim.nsec());
        self.st_mtime = fit(st.mtim.sec());
        self.st_mtime_nsec = fit(st.mtim.nsec());
        self.st_ctime = fit(st.ctim.sec());
        self.st_ctime_nsec = fit(st.ctim.nsec());
    }
}

/// macOS: birth time and BSD flags.
#[cfg(target_os = "macos")]
impl StatLayout for libc::stat {
    fn store(&mut self, st: &Stat) {
        // SAFETY: libc::stat is plain integers; all-zero is a valid value.
        *self = unsafe { std::mem::zeroed() };
        let birth = st.effective_birthtime();
        self.st_dev = fit(st.dev);
        self.st_ino = st.ino;
        self.st_mode = fit(st.mode);
        self.st_nlink = fit(st.nlink);
        self.st_uid = st.uid;
        self.st_gid = st.gid;
        self.st_rdev = fit(st.rdev);
        self.st_size = st.size;
        self.st_blksize = fit(st.blksize);
        self.st_blocks = st.blocks;
        self.st_atime = fit(st.atim.sec());
        self.st_atime_nsec = fit(st.atim.nsec());
        self.st_mtime = fit(st.mtim.sec());
        self.st_mtime_nsec = fit(st.mtim.nsec());
        self.st_ctime = fit(st.ctim.sec());
        self.st_ctime_nsec = fit(st.ctim.nsec());
        self.st_birthtime = fit(birth.sec());
        self.st_birthtime_nsec = fit(birth.nsec());
        self.st_flags = st.flags;
    }
}

#[cfg(unix)]
impl StatfsLayout for libc::statvfs {
    fn store(&mut self, st: &Statfs) {
        // SAFETY: as above, plain integers.
        *self = unsafe { std::mem::zeroed() };
        self.f_bsize = fit(st.bsize);
        self.f_frsize = fit(st.frsize);
        self.f_blocks = fit(st.blocks);
        self.f_bfree = fit(st.bfree);
        self.f_bavail = fit(st.bavail);
        self.f_files = fit(st.files);
        self.f_ffree = fit(st.ffree);
        self.f_favail = fit(st.favail);
        self.f_fsid = fit(st.fsid);
        self.f_flag = fit(st.flag);
        self.f_namemax = fit(st.namemax);
    }
}

// ── Entry points used by the dispatcher ─────────────────────────────────────

/// Stack buffer large enough for whichever stat layout was negotiated.
#[cfg(windows)]
pub(crate) type StatScratch = FspStatEx;
#[cfg(not(windows))]
pub(crate) type StatScratch = fuse_stat;

pub(crate) fn stat_scratch() -> StatScratch {
    // SAFETY: every layout is plain integers; all-zero is valid.
    unsafe { std::mem::zeroed() }
}

/// Fills the native stat record at `dst`.
///
/// On WinFsp the buffer is a `fuse_stat_ex` once `stat_ex` was negotiated,
/// and only then are flags written.
///
/// # Safety
/// `dst` must point to a writable native stat record of the negotiated
/// layout.
pub(crate) unsafe fn store_stat(dst: *mut fuse_stat, st: &Stat, caps: &Capabilities) {
    #[cfg(windows)]
    if caps.stat_ex {
        (*(dst as *mut FspStatEx)).store(st);
        return;
    }
    let _ = caps;
    (*dst).store(st);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Stat {
        Stat {
            dev: 3,
            ino: 42,
            mode: 0o100644,
            nlink: 1,
            uid: 1000,
            gid: 100,
            size: (1i64 << 62) + 5,
            atim: Timespec::new(10, 1),
            mtim: Timespec::new(20, 2),
            ctim: Timespec::new(30, 3),
            blksize: 4096,
            blocks: 8,
            flags: 0x20,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_saturates() {
        assert_eq!(fit::<u32, u16>(70_000), u16::MAX);
        assert_eq!(fit::<i64, i32>(-5_000_000_000), i32::MIN);
        assert_eq!(fit::<i64, u32>(-1), u32::MIN);
        assert_eq!(fit::<u64, u64>(u64::MAX), u64::MAX);
        assert_eq!(fit::<i64, i64>(1 << 62), 1 << 62);
    }

    #[test]
    fn test_fsp_stat_birthtime_falls_back_to_ctime() {
        let mut out = FspStat::default();
        out.store(&sample());
        assert_eq!(out.st_birthtim, out.st_ctim);
        assert_eq!(out.st_birthtim, FspTimespec { tv_sec: 30, tv_nsec: 3 });
    }

    #[test]
    fn test_fsp_stat_birthtime_preserved() {
        let mut st = sample();
        st.birthtim = Timespec::new(5, 500);
        let mut out = FspStat::default();
        out.store(&st);
        assert_eq!(out.st_birthtim, FspTimespec { tv_sec: 5, tv_nsec: 500 });
    }

    #[test]
    fn test_fsp_stat_fields() {
        let mut out = FspStat::default();
        out.store(&Stat {
            nlink: 100_000,
            ..sample()
        });
        assert_eq!(out.st_ino, 42);
        assert_eq!(out.st_size, (1i64 << 62) + 5);
        assert_eq!(out.st_nlink, u16::MAX);
        assert_eq!(out.st_mtim.tv_sec, 20);
    }

    #[test]
    fn test_fsp_stat_ex_flags_and_zeroing() {
        let mut out = FspStatEx {
            st_reserved32: [7; 3],
            ..Default::default()
        };
        out.store(&sample());
        assert_eq!(out.st_flags, 0x20);
        assert_eq!(out.st_reserved32, [0; 3]);
        assert_eq!(out.base.st_mode, 0o100644);
    }

    #[test]
    fn test_fsp_statvfs() {
        let mut out = FspStatvfs::default();
        out.store(&Statfs {
            bsize: 4096,
            blocks: 100,
            bfree: 50,
            namemax: 255,
            ..Default::default()
        });
        assert_eq!(out.f_bsize, 4096);
        assert_eq!(out.f_blocks, 100);
        assert_eq!(out.f_bfree, 50);
        assert_eq!(out.f_namemax, 255);
    }

    #[test]
    fn test_time_update_decoding() {
        let now = FspTimespec {
            tv_sec: 0,
            tv_nsec: UTIME_NOW as isize,
        };
        let omit = FspTimespec {
            tv_sec: 0,
            tv_nsec: UTIME_OMIT as isize,
        };
        let set = FspTimespec { tv_sec: 9, tv_nsec: 8 };
        assert_eq!(time_update(&now), TimeUpdate::Now);
        assert_eq!(time_update(&omit), TimeUpdate::Omit);
        assert_eq!(time_update(&set), TimeUpdate::Set(Timespec::new(9, 8)));
        assert_eq!(timespec_from_native(&set), Timespec::new(9, 8));
    }

    #[cfg(unix)]
    #[test]
    fn test_native_stat_overwrites_previous_contents() {
        // SAFETY: all-zero libc::stat is valid.
        let mut out: libc::stat = unsafe { std::mem::zeroed() };
        out.st_ino = 99;
        out.st_nlink = 7;
        out.store(&Stat::default());
        assert_eq!(out.st_ino, 0);
        assert_eq!(out.st_nlink, 0);

        out.store(&sample());
        assert_eq!(out.st_ino, 42);
        assert_eq!(out.st_size, (1i64 << 62) + 5);
        assert_eq!(out.st_mode as u32, 0o100644);
        assert_eq!(out.st_mtime, 20);
        assert_eq!(out.st_mtime_nsec, 2);
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_macos_stat_birthtime_and_flags() {
        // SAFETY: all-zero libc::stat is valid.
        let mut out: libc::stat = unsafe { std::mem::zeroed() };
        out.store(&sample());
        assert_eq!(out.st_birthtime, 30);
        assert_eq!(out.st_flags, 0x20);
    }

    #[cfg(unix)]
    #[test]
    fn test_native_statvfs() {
        // SAFETY: all-zero libc::statvfs is valid.
        let mut out: libc::statvfs = unsafe { std::mem::zeroed() };
        out.store(&Statfs {
            bsize: 512,
            files: 10,
            ..Default::default()
        });
        assert_eq!(out.f_bsize as u64, 512);
        assert_eq!(out.f_files as u64, 10);
    }
}
