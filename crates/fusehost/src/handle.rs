//! Token registry handing native code an opaque identity for Rust objects.
//!
//! The native library carries exactly one `void *` per mount (the
//! `private_data` / `user_data` pointer). Rather than exporting the address
//! of a Rust object, each registration allocates a one byte block whose
//! address becomes the token. The block stays allocated until the token is
//! released, so a live token can never be handed out twice.

use std::collections::HashMap;
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use crate::host::HostInner;

// ── Token ───────────────────────────────────────────────────────────────────

/// Opaque identity of one registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(NonZeroUsize);

impl Token {
    /// The token as the pointer value handed to native code.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    /// Recovers a token from a pointer received from native code.
    /// Returns `None` for null.
    pub fn from_ptr(ptr: *const c_void) -> Option<Token> {
        NonZeroUsize::new(ptr as usize).map(Token)
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Mutex guarded `Token -> Arc<T>` map.
///
/// Critical sections only touch the map; values are cloned out or moved
/// out before the lock is dropped so no user code ever runs under it.
pub struct HandleRegistry<T: ?Sized> {
    table: Mutex<HashMap<Token, Arc<T>>>,
}

impl<T: ?Sized> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `value` under a freshly allocated token.
    pub fn register(&self, value: Arc<T>) -> Token {
        let block = Box::into_raw(Box::new(0u8));
        // Box never yields null.
        let token = Token(NonZeroUsize::new(block as usize).unwrap_or(NonZeroUsize::MIN));
        self.table.lock().insert(token, value);
        token
    }

    pub fn lookup(&self, token: Token) -> Option<Arc<T>> {
        self.table.lock().get(&token).cloned()
    }

    /// Removes the mapping and frees the token's block.
    pub fn release(&self, token: Token) -> Option<Arc<T>> {
        let removed = self.table.lock().remove(&token);
        if removed.is_some() {
            // SAFETY: the token was produced by `register` from
            // `Box::into_raw` and was still mapped, so the block is live and
            // owned by this registry.
            drop(unsafe { Box::from_raw(token.0.get() as *mut u8) });
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live", &self.len())
            .finish()
    }
}

static HOSTS: LazyLock<HandleRegistry<HostInner>> = LazyLock::new(HandleRegistry::new);

/// The process-wide registry of mounted (or mounting) hosts, the only state
/// the host and the dispatcher share.
pub(crate) fn registry() -> &'static HandleRegistry<HostInner> {
    &HOSTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_register_lookup_release() {
        let reg: HandleRegistry<String> = HandleRegistry::new();
        let value = Arc::new("fs".to_string());
        let token = reg.register(value.clone());

        let found = reg.lookup(token).unwrap();
        assert!(Arc::ptr_eq(&found, &value));

        let released = reg.release(token).unwrap();
        assert!(Arc::ptr_eq(&released, &value));
        assert!(reg.lookup(token).is_none());
        assert!(reg.release(token).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_token_is_not_the_object_address() {
        let reg: HandleRegistry<u64> = HandleRegistry::new();
        let value = Arc::new(7u64);
        let token = reg.register(value.clone());
        assert_ne!(token.as_ptr() as usize, Arc::as_ptr(&value) as usize);
        reg.release(token);
    }

    #[test]
    fn test_live_tokens_are_unique() {
        let reg: HandleRegistry<usize> = HandleRegistry::new();
        let tokens: Vec<Token> = (0..64).map(|i| reg.register(Arc::new(i))).collect();
        let distinct: HashSet<Token> = tokens.iter().copied().collect();
        assert_eq!(distinct.len(), tokens.len());
        for (i, t) in tokens.iter().enumerate() {
            assert_eq!(*reg.lookup(*t).unwrap(), i);
        }
        for t in tokens {
            reg.release(t);
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn test_pointer_round_trip() {
        let reg: HandleRegistry<u8> = HandleRegistry::new();
        let token = reg.register(Arc::new(1));
        assert_eq!(Token::from_ptr(token.as_ptr()), Some(token));
        assert_eq!(Token::from_ptr(std::ptr::null()), None);
        reg.release(token);
    }

    #[test]
    fn test_concurrent_access() {
        let reg: Arc<HandleRegistry<usize>> = Arc::new(HandleRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|w| {
                let reg = reg.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let t = reg.register(Arc::new(w * 1000 + i));
                        assert_eq!(*reg.lookup(t).unwrap(), w * 1000 + i);
                        assert!(reg.release(t).is_some());
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert!(reg.is_empty());
    }
}
