//! A single-consumer action queue.
//!
//! Producers on any thread push closures; the one thread the dispatcher is
//! bound to drains them with [`Dispatch::pump`], typically once per iteration
//! of its own loop. Tasks built with [`Task::with_dispatcher`](crate::Task::with_dispatcher)
//! route every callback through here so that callbacks touching
//! thread-bound resources run on the owning thread.
//!
//! # Examples
//!
//! ```
//! use promise_dispatch::{Dispatch, Dispatcher};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let dispatcher = Arc::new(Dispatcher::new());
//! let remote = dispatcher.clone();
//! let producer = thread::spawn(move || {
//!     remote.enqueue(Box::new(|| println!("running on the consumer thread")));
//! });
//! producer.join().expect("The producer thread has panicked");
//! assert_eq!(dispatcher.pump(), 1);
//! ```
use std::{
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, ThreadId},
};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::{error::panic_message, signal::Signal};

/// A unit of work queued for the consumer thread.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// The contract a task uses to hand callbacks to a consumer thread.
pub trait Dispatch: Send + Sync {
    /// Queues `action` for the next pump cycle and returns immediately.
    ///
    /// Tasks call this while holding their own lock, so implementations must
    /// not run `action` before returning.
    fn enqueue(&self, action: Action);

    /// Queues `action` and blocks until a pump cycle has run it.
    ///
    /// Called from the consumer thread itself, the action runs inline instead,
    /// since that thread cannot pump while it is blocked.
    fn enqueue_and_wait(&self, action: Action);

    /// Runs every action queued so far, in enqueue order, then releases the
    /// callers waiting on them. Returns how many actions ran.
    fn pump(&self) -> usize;
}

#[derive(Default)]
struct Queue {
    actions: Vec<Action>,
    waiters: Vec<Arc<Signal>>,
}

/// The standard [`Dispatch`] implementation, bound to one consumer thread.
pub struct Dispatcher {
    consumer: ThreadId,
    queue: Mutex<Queue>,
}

impl Dispatcher {
    /// Binds the dispatcher to the calling thread.
    pub fn new() -> Self {
        Self::for_thread(thread::current().id())
    }

    /// Binds the dispatcher to `consumer`, for owners that build it before
    /// handing it to the thread that will pump.
    pub fn for_thread(consumer: ThreadId) -> Self {
        Self {
            consumer,
            queue: Mutex::new(Queue::default()),
        }
    }

    pub fn consumer_thread(&self) -> ThreadId {
        self.consumer
    }

    pub fn is_consumer_thread(&self) -> bool {
        thread::current().id() == self.consumer
    }

    /// Number of actions waiting for the next pump cycle.
    pub fn pending(&self) -> usize {
        self.queue.lock().actions.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("Dispatcher")
            .field("consumer", &self.consumer)
            .field("actions", &queue.actions.len())
            .field("waiters", &queue.waiters.len())
            .finish()
    }
}

impl Dispatch for Dispatcher {
    fn enqueue(&self, action: Action) {
        self.queue.lock().actions.push(action);
    }

    fn enqueue_and_wait(&self, action: Action) {
        if self.is_consumer_thread() {
            action();
            return;
        }
        let signal = Arc::new(Signal::new());
        {
            let mut queue = self.queue.lock();
            queue.actions.push(action);
            queue.waiters.push(signal.clone());
        }
        signal.wait();
    }

    fn pump(&self) -> usize {
        let current = thread::current().id();
        if current != self.consumer {
            panic!(
                "Dispatcher::pump called from {:?}, but the dispatcher is bound to {:?}",
                current, self.consumer
            );
        }

        // Swap the batch out so producers enqueue into the next cycle.
        let batch = mem::take(&mut *self.queue.lock());
        let count = batch.actions.len();
        if count > 0 {
            debug!(actions = count, waiters = batch.waiters.len(), "pumping dispatcher");
        }

        for action in batch.actions {
            run_guarded(action);
        }
        for waiter in batch.waiters {
            waiter.raise();
        }
        count
    }
}

/// Runs `action`, logging instead of propagating a panic. Returns false if
/// the action panicked.
pub(crate) fn run_guarded(action: Action) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(()) => true,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "dispatched callback panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[test]
    fn test_pump_runs_in_enqueue_order() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            dispatcher.enqueue(Box::new(move || log.lock().push(i)));
        }
        assert_eq!(dispatcher.pending(), 5);
        assert_eq!(dispatcher.pump(), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(dispatcher.pump(), 0);
    }

    #[test]
    fn test_actions_enqueued_while_pumping_run_next_cycle() {
        let dispatcher = Arc::new(Dispatcher::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let inner_dispatcher = dispatcher.clone();
        let inner_ran = ran.clone();
        dispatcher.enqueue(Box::new(move || {
            let ran = inner_ran.clone();
            inner_dispatcher.enqueue(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(dispatcher.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[traced_test]
    #[test]
    fn test_panicking_action_is_logged_and_does_not_stop_batch() {
        let dispatcher = Dispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..4 {
            let ran = ran.clone();
            dispatcher.enqueue(Box::new(move || {
                if i == 2 {
                    panic!("action {} failed", i);
                }
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(dispatcher.pump(), 4);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(logs_contain("dispatched callback panicked"));
        assert!(logs_contain("action 2 failed"));
    }

    #[test]
    fn test_enqueue_and_wait_on_consumer_thread_runs_inline() {
        let dispatcher = Dispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        dispatcher.enqueue_and_wait(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_pump_from_other_thread_panics() {
        let dispatcher = Arc::new(Dispatcher::new());
        let remote = dispatcher.clone();
        let result = thread::spawn(move || remote.pump()).join();
        assert!(result.is_err());
    }

    #[test]
    fn test_for_thread_binds_given_thread() {
        let dispatcher = Arc::new(Dispatcher::new());
        let consumer = thread::spawn(|| thread::current().id())
            .join()
            .expect("The consumer thread has panicked");
        let bound = Dispatcher::for_thread(consumer);
        assert_eq!(bound.consumer_thread(), consumer);
        assert!(!bound.is_consumer_thread());
        assert!(dispatcher.is_consumer_thread());
    }
}
