//! Re-registerable sign-out hook.
//!
//! The pipeline and the refresh coordinator fire this hook whenever the
//! session can no longer be kept alive. The session manager registers
//! the callback; a registration only ever removes its own callback, so a
//! stale registration dropped after a newer one was installed is harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Slot {
    generation: u64,
    callback: Option<Callback>,
}

#[derive(Default)]
struct HookInner {
    slot: Mutex<Slot>,
    next_generation: AtomicU64,
}

#[derive(Clone, Default)]
pub struct SignOutHook {
    inner: Arc<HookInner>,
}

impl SignOutHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `callback`, replacing whatever was registered before.
    #[must_use = "dropping the registration detaches the callback"]
    pub fn register<F>(&self, callback: F) -> SignOutRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.generation = generation;
        slot.callback = Some(Arc::new(callback));
        debug!(generation, "Sign-out callback registered");

        SignOutRegistration {
            hook: Arc::downgrade(&self.inner),
            generation,
        }
    }

    /// Invoke the registered callback, if any.
    pub fn fire(&self) {
        let callback = {
            let slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.callback.clone()
        };
        match callback {
            Some(callback) => callback(),
            None => debug!("Sign-out requested with no callback registered"),
        }
    }

    pub fn is_registered(&self) -> bool {
        let slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.callback.is_some()
    }
}

/// Handle returned by `SignOutHook::register`. Detaches on drop.
pub struct SignOutRegistration {
    hook: Weak<HookInner>,
    generation: u64,
}

impl SignOutRegistration {
    pub fn detach(self) {
        // Drop does the work.
    }
}

impl Drop for SignOutRegistration {
    fn drop(&mut self) {
        let Some(inner) = self.hook.upgrade() else {
            return;
        };
        let mut slot = inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.generation == self.generation {
            slot.callback = None;
            debug!(generation = self.generation, "Sign-out callback detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fire_without_callback_is_noop() {
        let hook = SignOutHook::new();
        hook.fire();
        assert!(!hook.is_registered());
    }

    #[test]
    fn test_fire_invokes_registered_callback() {
        let hook = SignOutHook::new();
        let (count, cb) = counter();
        let _registration = hook.register(cb);
        hook.fire();
        hook.fire();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_detach_removes_callback() {
        let hook = SignOutHook::new();
        let (count, cb) = counter();
        hook.register(cb).detach();
        hook.fire();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!hook.is_registered());
    }

    #[test]
    fn test_stale_registration_does_not_remove_newer_callback() {
        let hook = SignOutHook::new();
        let (old_count, old_cb) = counter();
        let (new_count, new_cb) = counter();

        let old = hook.register(old_cb);
        let _new = hook.register(new_cb);
        drop(old);

        hook.fire();
        assert_eq!(old_count.load(Ordering::SeqCst), 0);
        assert_eq!(new_count.load(Ordering::SeqCst), 1);
    }
}
