//! A one-shot, manual-reset wait handle.
//!
//! Once raised a `Signal` stays raised: every current and future waiter is
//! released. Tasks use one as their completion signal, and the dispatcher
//! hands one to each blocked `enqueue_and_wait` caller.
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub(crate) struct Signal {
    raised: Mutex<bool>,
    released: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn raise(&self) {
        let mut raised = self.raised.lock();
        if !*raised {
            *raised = true;
            self.released.notify_all();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Blocks the calling thread until [`raise`](Self::raise) has been called.
    pub(crate) fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.released.wait(&mut raised);
        }
    }
}
