use std::fmt;

use thiserror::Error;

/// Errors surfaced by [`crate::Host::try_mount`].
#[derive(Debug, Error)]
pub enum HostError {
    /// No FUSE library could be loaded on this machine.
    #[error("FUSE library not found (tried {tried})")]
    LibraryNotFound { tried: String },

    /// The library loaded but lacks an entry point the bridge needs.
    #[error("FUSE library {library} has no symbol {symbol}")]
    MissingSymbol { library: String, symbol: &'static str },

    /// A mountpoint or option contained an interior NUL byte.
    #[error("argument contains a NUL byte: {0:?}")]
    NulInArgument(String),

    /// `mount` was called while this host was already mounted.
    #[error("host is already mounted")]
    AlreadyMounted,

    /// The native event loop returned a non-zero status.
    #[error("native mount failed with status {0}")]
    NativeFailure(i32),
}

/// Errors from [`crate::opt::opt_parse`]. Nothing is written to the
/// destination slots when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptError {
    #[error("format has {templates} templates but {slots} destinations were supplied")]
    Arity { templates: usize, slots: usize },

    #[error("malformed option template {0:?}")]
    BadTemplate(String),

    #[error("option {0:?} requires a value")]
    MissingValue(String),

    #[error("invalid numeric value {value:?} for option {option:?}")]
    BadNumber { option: String, value: String },

    #[error("value {value:?} for option {option:?} does not fit the destination")]
    OutOfRange { option: String, value: String },
}

/// Panic payload carrying an exact errno out of a filesystem method.
///
/// Raised through [`raise`]; the dispatcher recovers it and returns the code
/// unchanged instead of the generic `EIO` used for other panics.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({})", self.0)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0.abs()))
    }
}

/// Aborts the current filesystem operation with `errno`.
///
/// Useful deep inside helper code where threading a `Result` back to the
/// trait method is awkward. Only meaningful inside a dispatched callback.
pub fn raise(errno: i32) -> ! {
    std::panic::panic_any(Errno(errno))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_carries_errno() {
        let payload = std::panic::catch_unwind(|| raise(libc::EACCES)).unwrap_err();
        assert_eq!(payload.downcast_ref::<Errno>(), Some(&Errno(libc::EACCES)));
    }

    #[test]
    fn test_error_messages() {
        let e = OptError::Arity {
            templates: 2,
            slots: 1,
        };
        assert_eq!(
            e.to_string(),
            "format has 2 templates but 1 destinations were supplied"
        );
        assert_eq!(HostError::NativeFailure(1).to_string(), "native mount failed with status 1");
    }
}
