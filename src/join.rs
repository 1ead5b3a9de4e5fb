//! Fail-fast combinators over [`Task`]s.
use std::{
    collections::VecDeque,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::TaskError,
    task::{Callbacks, Task},
};

struct Parallel<T> {
    results: Vec<Option<T>>,
    remaining: usize,
    failed: bool,
}

/// Combines tasks that are already running into one task of all their values,
/// in input order.
///
/// The first rejection rejects the combined task at once; whatever the other
/// tasks do afterwards is ignored.
///
/// ```
/// use promise_dispatch::{join_all, Task};
///
/// let tasks: Vec<Task<&str>> = (0..3).map(|_| Task::new()).collect();
/// let all = join_all(tasks.clone());
/// tasks[2].resolve("c");
/// tasks[0].resolve("a");
/// tasks[1].resolve("b");
/// assert_eq!(all.result().unwrap(), vec!["a", "b", "c"]);
/// ```
pub fn join_all<T, I>(tasks: I) -> Task<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Task<T>>,
{
    let tasks: Vec<Task<T>> = tasks.into_iter().collect();
    let combined = Task::new();
    if tasks.is_empty() {
        combined.resolve(Vec::new());
        return combined;
    }

    let join = Arc::new(Mutex::new(Parallel {
        results: vec![None; tasks.len()],
        remaining: tasks.len(),
        failed: false,
    }));

    for (index, task) in tasks.iter().enumerate() {
        let (on_value, on_error) = (join.clone(), join.clone());
        let (resolved, rejected) = (combined.clone(), combined.clone());
        task.attach(
            Callbacks::new()
                .on_fulfilled(move |value| {
                    let values = {
                        let mut join = on_value.lock();
                        if join.failed {
                            return;
                        }
                        join.results[index] = Some(value);
                        join.remaining -= 1;
                        if join.remaining > 0 {
                            return;
                        }
                        mem::take(&mut join.results)
                    };
                    let _ = resolved.try_resolve(values.into_iter().flatten().collect());
                })
                .on_failure(move |err| {
                    let first = !mem::replace(&mut on_error.lock().failed, true);
                    if first {
                        debug!(index, error = %err, "join_all failing fast");
                        let _ = rejected.try_reject(err);
                    }
                }),
        );
    }
    combined
}

struct Sequence<T, F> {
    pending: VecDeque<F>,
    results: Vec<T>,
}

/// Runs task factories one after another: factory `i + 1` is only called once
/// the task from factory `i` has fulfilled.
///
/// The first rejection, or a panicking factory, rejects the combined task and
/// no further factories are called.
///
/// ```
/// use promise_dispatch::{join_sequential, Task, TaskError};
///
/// let steps = (1..=3).map(|n| {
///     move || Task::run_on_new_thread(move |task| {
///         task.resolve(n * 10);
///         Ok::<(), TaskError>(())
///     }, None)
/// });
/// assert_eq!(join_sequential(steps).result().unwrap(), vec![10, 20, 30]);
/// ```
pub fn join_sequential<T, F, I>(factories: I) -> Task<Vec<T>>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Task<T> + Send + 'static,
    I: IntoIterator<Item = F>,
{
    let pending: VecDeque<F> = factories.into_iter().collect();
    let combined = Task::new();
    if pending.is_empty() {
        combined.resolve(Vec::new());
        return combined;
    }

    let results = Vec::with_capacity(pending.len());
    let sequence = Arc::new(Mutex::new(Sequence { pending, results }));
    run_next(sequence, combined.clone());
    combined
}

fn run_next<T, F>(sequence: Arc<Mutex<Sequence<T, F>>>, combined: Task<Vec<T>>)
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Task<T> + Send + 'static,
{
    // Tasks that come back already fulfilled are consumed here rather than
    // through a callback, so long runs of them do not grow the stack.
    let (task, index) = loop {
        let (next, index) = {
            let mut sequence = sequence.lock();
            (sequence.pending.pop_front(), sequence.results.len())
        };
        let Some(factory) = next else {
            let results = mem::take(&mut sequence.lock().results);
            let _ = combined.try_resolve(results);
            return;
        };

        let task = match panic::catch_unwind(AssertUnwindSafe(factory)) {
            Ok(task) => task,
            Err(payload) => {
                let err = TaskError::from_panic(payload.as_ref());
                debug!(index, error = %err, "join_sequential factory panicked");
                let _ = combined.try_reject(err);
                return;
            }
        };

        match task.try_result() {
            Some(Ok(value)) => sequence.lock().results.push(value),
            Some(Err(err)) => {
                debug!(index, error = %err, "join_sequential stopping");
                let _ = combined.try_reject(err);
                return;
            }
            None => break (task, index),
        }
    };

    let rejected = combined.clone();
    task.attach(
        Callbacks::new()
            .on_fulfilled(move |value| {
                sequence.lock().results.push(value);
                run_next(sequence, combined);
            })
            .on_failure(move |err| {
                debug!(index, error = %err, "join_sequential stopping");
                let _ = rejected.try_reject(err);
            }),
    );
}
