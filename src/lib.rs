//! Single-assignment tasks for thread-based code, with optional delivery of
//! their callbacks onto one designated thread.
//!
//! # Overview
//!
//! A [`Task`] is settled exactly once, from any thread, with either a value
//! ([`Task::resolve`]) or a [`TaskError`] ([`Task::reject`]). Observers attach
//! callbacks before or after that happens and see the same outcome either
//! way; blocking code calls [`Task::result`], async code `.await`s the task.
//!
//! Work that has to happen on one particular thread, such as a render or UI
//! loop, goes through a [`Dispatcher`]: a task built with
//! [`Task::with_dispatcher`] queues each callback there, and the owning thread
//! runs them when it calls [`Dispatch::pump`].
//!
//! [`join_all`] and [`join_sequential`] combine tasks, failing fast on the
//! first rejection.
//!
//! # Usage
//!
//! ```
//! use promise_dispatch::{join_all, Dispatch, Dispatcher, Task, TaskError};
//! use std::sync::Arc;
//!
//! // Built on the thread that will pump it.
//! let dispatcher: Arc<dyn Dispatch> = Arc::new(Dispatcher::new());
//!
//! let downloads: Vec<Task<usize>> = (1..=3)
//!     .map(|n| {
//!         Task::run_on_new_thread(
//!             move |task| {
//!                 task.resolve(n * 1024);
//!                 Ok::<(), TaskError>(())
//!             },
//!             Some(dispatcher.clone()),
//!         )
//!     })
//!     .collect();
//!
//! // The combinator's own callbacks on the downloads go through the
//! // dispatcher too, so this thread keeps pumping until everything is in.
//! let all = join_all(downloads);
//! while !all.is_settled() {
//!     dispatcher.pump();
//!     std::thread::yield_now();
//! }
//! let total: usize = all.result().unwrap().iter().sum();
//! assert_eq!(total, 6 * 1024);
//! ```

mod dispatcher;
mod error;
mod join;
mod signal;
mod task;
mod worker;

pub use dispatcher::{Action, Dispatch, Dispatcher};
pub use error::{SettleError, TaskError};
pub use join::{join_all, join_sequential};
pub use task::{Callbacks, Task, TaskState};
