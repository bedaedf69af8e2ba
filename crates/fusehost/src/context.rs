//! Caller identity for the request currently being dispatched.

use fusehost_types::{Gid, Pid, Uid};

use crate::native::library;

/// uid/gid/pid of the process whose system call produced the current
/// request, plus its umask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub uid: Uid,
    pub gid: Gid,
    pub pid: Pid,
    pub umask: u32,
}

/// Returns the caller of the filesystem operation running on this thread.
///
/// Only meaningful inside a [`crate::FileSystem`] method; elsewhere the
/// native library reports a zeroed context or none at all.
pub fn get_context() -> Option<RequestContext> {
    library::loaded().and_then(|lib| lib.context())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fields() {
        let ctx = RequestContext {
            uid: Uid(1000),
            gid: Gid(100),
            pid: Pid(42),
            umask: 0o022,
        };
        assert_eq!(*ctx.uid, 1000);
        assert_eq!(ctx, ctx.clone());
    }
}
