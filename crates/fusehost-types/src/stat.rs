use serde::{Deserialize, Serialize};

use crate::time::Timespec;

// File type bits of `st_mode`. These values are identical on every platform
// the bridge targets, including the WinFsp emulation.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// File metadata in a layout-independent form.
///
/// Field widths are wide enough for every native layout; the marshaling
/// layer clamps on the way out instead of truncating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub atim: Timespec,
    pub mtim: Timespec,
    pub ctim: Timespec,
    /// Zero means "unknown"; layouts that carry a birth time substitute `ctim`.
    pub birthtim: Timespec,
    pub blksize: i64,
    pub blocks: i64,
    /// BSD/Windows file flags. Only transported by layouts that have them.
    pub flags: u32,
}

impl Stat {
    /// Metadata for a directory with the given permission bits.
    pub fn directory(perm: u32) -> Self {
        Stat {
            mode: S_IFDIR | (perm & !S_IFMT),
            nlink: 2,
            ..Default::default()
        }
    }

    /// Metadata for a regular file with the given permission bits and size.
    pub fn regular(perm: u32, size: i64) -> Self {
        Stat {
            mode: S_IFREG | (perm & !S_IFMT),
            nlink: 1,
            size,
            ..Default::default()
        }
    }

    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// Birth time as native layouts report it: `ctim` stands in when unset.
    pub fn effective_birthtime(&self) -> Timespec {
        if self.birthtim.is_zero() {
            self.ctim
        } else {
            self.birthtim
        }
    }

    /// Sets all four timestamps to `t`.
    pub fn set_times(&mut self, t: Timespec) {
        self.atim = t;
        self.mtim = t;
        self.ctim = t;
        self.birthtim = t;
    }
}

/// Filesystem capacity and usage, as reported by `statfs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_predicates() {
        let dir = Stat::directory(0o755);
        assert!(dir.is_dir());
        assert!(!dir.is_regular());
        assert_eq!(dir.mode, 0o040755);

        let file = Stat::regular(0o644, 10);
        assert!(file.is_regular());
        assert_eq!(file.size, 10);

        let link = Stat {
            mode: S_IFLNK | 0o777,
            ..Default::default()
        };
        assert!(link.is_symlink());
    }

    #[test]
    fn test_permission_bits_do_not_change_type() {
        let dir = Stat::directory(S_IFREG | 0o700);
        assert!(dir.is_dir());
        assert_eq!(dir.mode & 0o7777, 0o700);
    }

    #[test]
    fn test_effective_birthtime() {
        let mut st = Stat::regular(0o600, 0);
        st.ctim = Timespec::new(100, 5);
        assert_eq!(st.effective_birthtime(), Timespec::new(100, 5));

        st.birthtim = Timespec::new(50, 0);
        assert_eq!(st.effective_birthtime(), Timespec::new(50, 0));
    }

    #[test]
    fn test_set_times() {
        let mut st = Stat::default();
        st.set_times(Timespec::new(9, 9));
        assert_eq!(st.atim, st.birthtim);
        assert_eq!(st.mtim, Timespec::new(9, 9));
    }
}
