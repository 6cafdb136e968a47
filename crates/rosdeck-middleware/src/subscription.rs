//! Disposable subscription handles.
//!
//! A [`Subscription`] is the only thing a consumer holds for a live topic,
//! whether the messages come from the robot bridge or from the in-process
//! simulator bus. Disposal is synchronous and authoritative: once
//! [`Subscription::dispose`] returns, the callback is never invoked again,
//! even for a message the transport was already dispatching.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

/// Open/closed flag guarding callback invocation.
///
/// Invocation holds the lock for the whole callback, so `close` waits for an
/// in-progress delivery on another thread to finish. The lock is re-entrant so
/// a callback may dispose its own subscription.
pub(crate) struct Gate(ReentrantMutex<Cell<bool>>);

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self(ReentrantMutex::new(Cell::new(true))))
    }

    /// Run `f` only while the gate is open.
    pub(crate) fn run(&self, f: impl FnOnce()) -> bool {
        let open = self.0.lock();
        if open.get() {
            f();
            true
        } else {
            false
        }
    }

    /// Close the gate; returns `true` on the first call only.
    pub(crate) fn close(&self) -> bool {
        let open = self.0.lock();
        open.replace(false)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.0.lock().get()
    }
}

/// Handle to one active subscription. Dropping it disposes it.
pub struct Subscription {
    label: String,
    gate: Arc<Gate>,
    on_dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(
        label: impl Into<String>,
        gate: Arc<Gate>,
        on_dispose: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            gate,
            on_dispose: Some(Box::new(on_dispose)),
        }
    }

    /// Stop delivery and release the underlying resources. Idempotent.
    pub fn dispose(&mut self) {
        self.gate.close();
        if let Some(release) = self.on_dispose.take() {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    /// Wire path or bus topic this subscription listens on.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispose_runs_release_exactly_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut sub = Subscription::new("/battery", Gate::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.dispose();
        sub.dispose();
        drop(sub);

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_gate_blocks_invocation() {
        let gate = Gate::new();
        assert!(gate.run(|| {}));
        assert!(gate.close());
        assert!(!gate.close());
        let mut ran = false;
        assert!(!gate.run(|| ran = true));
        assert!(!ran);
    }

    #[test]
    fn callback_may_close_its_own_gate() {
        let gate = Gate::new();
        let inner = Arc::clone(&gate);
        gate.run(|| {
            inner.close();
        });
        assert!(!gate.is_open());
    }
}
