use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use tracing::warn;

use crate::{dispatcher::Dispatch, error::TaskError, task::Task};

impl<T: Clone + Send + 'static> Task<T> {
    /// Runs `action` on a fresh, unnamed thread and hands it the task to
    /// settle.
    ///
    /// If the action returns an error or panics while the task is still
    /// pending, the task is rejected with that failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_dispatch::{Task, TaskError};
    ///
    /// let task = Task::run_on_new_thread(
    ///     |task| {
    ///         task.notify(0.5);
    ///         task.resolve(6 * 7);
    ///         Ok::<(), TaskError>(())
    ///     },
    ///     None,
    /// );
    /// assert_eq!(task.result().unwrap(), 42);
    ///
    /// let failed = Task::<u32>::run_on_new_thread(|_| Err("no route"), None);
    /// assert_eq!(failed.result().unwrap_err().to_string(), "no route");
    /// ```
    pub fn run_on_new_thread<F, E>(action: F, dispatcher: Option<Arc<dyn Dispatch>>) -> Self
    where
        F: FnOnce(Task<T>) -> Result<(), E> + Send + 'static,
        E: Into<TaskError> + 'static,
    {
        let task = Task::build(dispatcher);
        let worker = task.clone();
        let spawned = thread::Builder::new().spawn(move || {
            let handle = worker.clone();
            let failure = match panic::catch_unwind(AssertUnwindSafe(move || action(handle))) {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err.into(),
                Err(payload) => TaskError::from_panic(payload.as_ref()),
            };
            if let Err(settled) = worker.try_reject(failure.clone()) {
                warn!(error = %failure, state = %settled.state, "worker action failed after settling its task");
            }
        });
        if let Err(err) = spawned {
            task.reject(err);
        }
        task
    }
}
