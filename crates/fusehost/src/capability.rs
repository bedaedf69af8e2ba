//! Capability negotiation performed once per mount, in `init`.

use serde::{Deserialize, Serialize};

use crate::native::abi::{
    FSP_FUSE_CAP_CASE_INSENSITIVE, FSP_FUSE_CAP_DELETE_ACCESS, FSP_FUSE_CAP_READDIR_PLUS,
    FSP_FUSE_CAP_STAT_EX, FUSE_CAP_ATOMIC_O_TRUNC, OSXFUSE_ENABLE_CASE_INSENSITIVE,
};

/// Optional behaviours of a mount.
///
/// Used twice: as the set an implementation requests, and as the set that
/// survived negotiation with the native library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Path lookups ignore case (macOS, Windows).
    pub case_insensitive: bool,
    /// `readdir` fills complete attributes (Windows).
    pub readdir_plus: bool,
    /// The kernel asks `access` before deletions (Windows).
    pub delete_access: bool,
    /// `O_TRUNC` is passed to `open` instead of a separate truncate.
    pub open_trunc: bool,
    /// Stat records carry file flags (Windows `fuse_stat_ex`). Never
    /// requested explicitly; wanted whenever the library offers it.
    pub stat_ex: bool,
}

/// Which native library flavour a negotiation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// libfuse 2.x on Linux or FreeBSD.
    Posix,
    /// osxfuse / macFUSE.
    MacOs,
    /// WinFsp-FUSE.
    Windows,
}

impl Platform {
    #[cfg(target_os = "macos")]
    pub const CURRENT: Platform = Platform::MacOs;
    #[cfg(windows)]
    pub const CURRENT: Platform = Platform::Windows;
    #[cfg(not(any(target_os = "macos", windows)))]
    pub const CURRENT: Platform = Platform::Posix;
}

/// Outcome of [`negotiate`]: the bits to OR into `conn->want` (and
/// `conn->enable` on macOS) plus the resulting capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub want: u32,
    pub enable: u32,
    pub caps: Capabilities,
}

/// Intersects what the library advertises in `capable` with what the
/// implementation `requested`.
pub fn negotiate(platform: Platform, capable: u32, requested: &Capabilities) -> Negotiation {
    let mut want = 0;
    let mut enable = 0;
    let mut caps = Capabilities::default();

    let mut offer = |requested: bool, bit: u32| -> bool {
        let granted = requested && capable & bit != 0;
        if granted {
            want |= bit;
        }
        granted
    };

    caps.open_trunc = offer(requested.open_trunc, FUSE_CAP_ATOMIC_O_TRUNC);

    match platform {
        Platform::Posix => {}
        Platform::MacOs => {
            // osxfuse has no capable bit for this; enabling always works.
            if requested.case_insensitive {
                enable |= OSXFUSE_ENABLE_CASE_INSENSITIVE;
                caps.case_insensitive = true;
            }
        }
        Platform::Windows => {
            caps.stat_ex = offer(true, FSP_FUSE_CAP_STAT_EX);
            caps.case_insensitive = offer(requested.case_insensitive, FSP_FUSE_CAP_CASE_INSENSITIVE);
            caps.readdir_plus = offer(requested.readdir_plus, FSP_FUSE_CAP_READDIR_PLUS);
            caps.delete_access = offer(requested.delete_access, FSP_FUSE_CAP_DELETE_ACCESS);
        }
    }

    Negotiation { want, enable, caps }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_requested() -> Capabilities {
        Capabilities {
            case_insensitive: true,
            readdir_plus: true,
            delete_access: true,
            open_trunc: true,
            stat_ex: false,
        }
    }

    #[test]
    fn test_windows_intersects_capable_and_requested() {
        let capable = FSP_FUSE_CAP_STAT_EX | FSP_FUSE_CAP_CASE_INSENSITIVE | FSP_FUSE_CAP_DELETE_ACCESS;
        let requested = Capabilities {
            case_insensitive: true,
            readdir_plus: true,
            ..Default::default()
        };
        let n = negotiate(Platform::Windows, capable, &requested);
        assert!(n.caps.stat_ex);
        assert!(n.caps.case_insensitive);
        assert!(!n.caps.readdir_plus, "not advertised by the library");
        assert!(!n.caps.delete_access, "advertised but not requested");
        assert_eq!(n.want, FSP_FUSE_CAP_STAT_EX | FSP_FUSE_CAP_CASE_INSENSITIVE);
    }

    #[test]
    fn test_windows_without_stat_ex() {
        let n = negotiate(Platform::Windows, 0, &all_requested());
        assert_eq!(n.caps, Capabilities::default());
        assert_eq!(n.want, 0);
    }

    #[test]
    fn test_macos_case_insensitive_uses_enable() {
        let n = negotiate(Platform::MacOs, 0, &all_requested());
        assert!(n.caps.case_insensitive);
        assert!(!n.caps.readdir_plus);
        assert_eq!(n.enable, OSXFUSE_ENABLE_CASE_INSENSITIVE);
        assert_eq!(n.want, 0);
    }

    #[test]
    fn test_posix_only_atomic_trunc() {
        let n = negotiate(Platform::Posix, FUSE_CAP_ATOMIC_O_TRUNC | FSP_FUSE_CAP_STAT_EX, &all_requested());
        assert!(n.caps.open_trunc);
        assert!(!n.caps.stat_ex);
        assert!(!n.caps.case_insensitive);
        assert_eq!(n.want, FUSE_CAP_ATOMIC_O_TRUNC);
    }

    #[test]
    fn test_capabilities_serde_defaults() {
        let caps: Capabilities = toml::from_str("case_insensitive = true").unwrap();
        assert!(caps.case_insensitive);
        assert!(!caps.open_trunc);
    }
}
