//! The single-assignment [`Task`].
//!
//! A task starts pending and is settled exactly once, either fulfilled with a
//! value or rejected with a [`TaskError`]. Any number of handles may be cloned
//! off it; any of them may settle it, attach callbacks, block on the outcome
//! or `.await` it.
use std::{
    fmt,
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    dispatcher::{run_guarded, Action, Dispatch},
    error::{SettleError, TaskError},
    signal::Signal,
};

type SuccessFn<T> = Box<dyn FnOnce(T) + Send + 'static>;
type FailureFn = Box<dyn FnOnce(TaskError) + Send + 'static>;
type ProgressFn = Arc<dyn Fn(f32) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Pending => "pending",
            TaskState::Fulfilled => "fulfilled",
            TaskState::Rejected => "rejected",
        })
    }
}

/// A bundle of callbacks for [`Task::attach`]. Every slot is optional.
///
/// ```
/// use promise_dispatch::{Callbacks, Task};
///
/// let task = Task::<u32>::new();
/// task.attach(
///     Callbacks::new()
///         .on_fulfilled(|value| println!("done: {}", value))
///         .on_failure(|err| println!("failed: {}", err))
///         .on_progress(|p| println!("{:.0}%", p * 100.0))
///         .on_end(|| println!("finished either way")),
/// );
/// task.notify(0.5);
/// task.resolve(7);
/// ```
pub struct Callbacks<T> {
    on_fulfilled: Option<SuccessFn<T>>,
    on_failure: Option<FailureFn>,
    on_progress: Option<ProgressFn>,
    on_end: Option<Action>,
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self {
            on_fulfilled: None,
            on_failure: None,
            on_progress: None,
            on_end: None,
        }
    }

    pub fn on_fulfilled(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_fulfilled = Some(Box::new(f));
        self
    }

    pub fn on_failure(mut self, f: impl FnOnce(TaskError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Fires on every [`Task::notify`] while the task is still pending.
    pub fn on_progress(mut self, f: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Fires once, whichever way the task settles.
    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_fulfilled", &self.on_fulfilled.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

#[derive(Clone)]
enum Outcome<T> {
    Pending,
    Fulfilled(T),
    Rejected(TaskError),
}

impl<T> Outcome<T> {
    fn state(&self) -> TaskState {
        match self {
            Outcome::Pending => TaskState::Pending,
            Outcome::Fulfilled(_) => TaskState::Fulfilled,
            Outcome::Rejected(_) => TaskState::Rejected,
        }
    }
}

struct Inner<T> {
    outcome: Outcome<T>,
    success: Vec<SuccessFn<T>>,
    failure: Vec<FailureFn>,
    progress: Vec<ProgressFn>,
    end: Vec<Action>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    completed: Signal,
    dispatcher: Option<Arc<dyn Dispatch>>,
}

/// A single-assignment result shared between a producer and its observers.
///
/// Callbacks run inline on the thread that settles the task, or, for a task
/// built with [`with_dispatcher`](Self::with_dispatcher), are each queued to
/// the dispatcher and run by its consumer thread.
///
/// # Examples
///
/// ```
/// use promise_dispatch::Task;
/// use std::thread;
///
/// let task = Task::<String>::new();
/// task.then(|value| println!("Received {:?}", value));
///
/// let producer = task.clone();
/// let worker = thread::spawn(move || producer.resolve("Hi".into()));
/// worker.join().expect("The worker thread has panicked.");
///
/// assert_eq!(task.result().unwrap(), "Hi");
/// ```
pub struct Task<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("state", &self.shared.inner.lock().outcome.state())
            .field("dispatched", &self.shared.dispatcher.is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for Task<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// A pending task whose callbacks run inline.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A pending task whose callbacks are each handed to `dispatcher`.
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self::build(Some(dispatcher))
    }

    pub(crate) fn build(dispatcher: Option<Arc<dyn Dispatch>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    outcome: Outcome::Pending,
                    success: Vec::new(),
                    failure: Vec::new(),
                    progress: Vec::new(),
                    end: Vec::new(),
                    wakers: Vec::new(),
                }),
                completed: Signal::new(),
                dispatcher,
            }),
        }
    }

    pub fn state(&self) -> TaskState {
        self.shared.inner.lock().outcome.state()
    }

    pub fn is_settled(&self) -> bool {
        self.state() != TaskState::Pending
    }

    /// Fulfills the task with `value`.
    ///
    /// # Panics
    ///
    /// Panics if the task is already settled. Use
    /// [`try_resolve`](Self::try_resolve) where a late settlement is expected.
    pub fn resolve(&self, value: T) {
        if let Err(err) = self.try_resolve(value) {
            panic!("{}", err);
        }
    }

    /// Rejects the task with `err`.
    ///
    /// # Panics
    ///
    /// Panics if the task is already settled.
    pub fn reject(&self, err: impl Into<TaskError>) {
        if let Err(err) = self.try_reject(err) {
            panic!("{}", err);
        }
    }

    pub fn try_resolve(&self, value: T) -> Result<(), SettleError> {
        self.settle("resolve", Outcome::Fulfilled(value))
    }

    pub fn try_reject(&self, err: impl Into<TaskError>) -> Result<(), SettleError> {
        self.settle("reject", Outcome::Rejected(err.into()))
    }

    fn settle(&self, op: &'static str, outcome: Outcome<T>) -> Result<(), SettleError> {
        let (inline, wakers) = {
            let mut inner = self.shared.inner.lock();
            let state = inner.outcome.state();
            if state != TaskState::Pending {
                return Err(SettleError { op, state });
            }
            inner.outcome = outcome.clone();
            inner.progress.clear();

            let mut actions: Vec<Action> = Vec::new();
            match outcome {
                Outcome::Fulfilled(value) => {
                    for callback in mem::take(&mut inner.success) {
                        let value = value.clone();
                        actions.push(Box::new(move || callback(value)));
                    }
                    inner.failure.clear();
                }
                Outcome::Rejected(err) => {
                    for callback in mem::take(&mut inner.failure) {
                        let err = err.clone();
                        actions.push(Box::new(move || callback(err)));
                    }
                    inner.success.clear();
                }
                Outcome::Pending => {}
            }
            actions.append(&mut inner.end);
            (self.route(actions), mem::take(&mut inner.wakers))
        };

        self.shared.completed.raise();
        for waker in wakers {
            waker.wake();
        }
        run_inline(inline);
        Ok(())
    }

    /// Reports progress to every progress callback. Ignored once the task is
    /// settled.
    pub fn notify(&self, progress: f32) {
        let inline = {
            let inner = self.shared.inner.lock();
            if !matches!(inner.outcome, Outcome::Pending) {
                trace!(progress, state = %inner.outcome.state(), "notify on a settled task ignored");
                return;
            }
            let actions: Vec<Action> = inner
                .progress
                .iter()
                .map(|callback| {
                    let callback = callback.clone();
                    // Dispatched notifications can run after settlement; drop them then.
                    let task = self.clone();
                    Box::new(move || {
                        if !task.is_settled() {
                            callback(progress)
                        }
                    }) as Action
                })
                .collect();
            self.route(actions)
        };
        run_inline(inline);
    }

    /// Registers `callbacks`. Slots matching an outcome the task already has
    /// fire right away; the rest wait for settlement. Progress callbacks
    /// attached to a settled task never fire.
    pub fn attach(&self, callbacks: Callbacks<T>) -> &Self {
        let Callbacks {
            on_fulfilled,
            on_failure,
            on_progress,
            on_end,
        } = callbacks;

        let mut ready: Vec<Action> = Vec::new();
        let inline = {
            let mut guard = self.shared.inner.lock();
            let inner = &mut *guard;
            match &inner.outcome {
                Outcome::Pending => {
                    inner.success.extend(on_fulfilled);
                    inner.failure.extend(on_failure);
                    inner.progress.extend(on_progress);
                    inner.end.extend(on_end);
                }
                Outcome::Fulfilled(value) => {
                    if let Some(callback) = on_fulfilled {
                        let value = value.clone();
                        ready.push(Box::new(move || callback(value)));
                    }
                    ready.extend(on_end);
                }
                Outcome::Rejected(err) => {
                    if let Some(callback) = on_failure {
                        let err = err.clone();
                        ready.push(Box::new(move || callback(err)));
                    }
                    ready.extend(on_end);
                }
            }
            self.route(ready)
        };
        run_inline(inline);
        self
    }

    pub fn then(&self, f: impl FnOnce(T) + Send + 'static) -> &Self {
        self.attach(Callbacks::new().on_fulfilled(f))
    }

    pub fn on_failure(&self, f: impl FnOnce(TaskError) + Send + 'static) -> &Self {
        self.attach(Callbacks::new().on_failure(f))
    }

    pub fn on_progress(&self, f: impl Fn(f32) + Send + Sync + 'static) -> &Self {
        self.attach(Callbacks::new().on_progress(f))
    }

    pub fn on_end(&self, f: impl FnOnce() + Send + 'static) -> &Self {
        self.attach(Callbacks::new().on_end(f))
    }

    /// Blocks until the task settles, then returns its value or its error.
    ///
    /// Calling this on the thread that is supposed to settle the task blocks
    /// forever.
    pub fn result(&self) -> Result<T, TaskError> {
        self.shared.completed.wait();
        match self.try_result() {
            Some(result) => result,
            None => unreachable!("completion signal raised on a pending task"),
        }
    }

    /// The outcome so far, without blocking. `None` while pending.
    pub fn try_result(&self) -> Option<Result<T, TaskError>> {
        match &self.shared.inner.lock().outcome {
            Outcome::Pending => None,
            Outcome::Fulfilled(value) => Some(Ok(value.clone())),
            Outcome::Rejected(err) => Some(Err(err.clone())),
        }
    }

    /// Hands `actions` to the dispatcher, if there is one, and returns the
    /// ones left to run inline. Called with `inner` locked, so dispatched
    /// callbacks reach the queue in registration order.
    fn route(&self, actions: Vec<Action>) -> Vec<Action> {
        match &self.shared.dispatcher {
            Some(dispatcher) => {
                for action in actions {
                    dispatcher.enqueue(action);
                }
                Vec::new()
            }
            None => actions,
        }
    }
}

impl<T: Clone + Send + 'static> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.shared.inner.lock();
        let inner = &mut *guard;
        match &inner.outcome {
            Outcome::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            Outcome::Rejected(err) => Poll::Ready(Err(err.clone())),
            Outcome::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

fn run_inline(actions: Vec<Action>) {
    for action in actions {
        run_guarded(action);
    }
}
