use std::{any::Any, error::Error, fmt, io, sync::Arc};

use crate::task::TaskState;

/// The failure a task settles with.
///
/// Cloned out to every failure callback and to every caller of
/// [`Task::result`](crate::Task::result), so the payload is shared behind an
/// `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(Arc<dyn Error + Send + Sync + 'static>),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        TaskError::Failed(Arc::from(err.into()))
    }

    pub fn msg(message: impl fmt::Display) -> Self {
        TaskError::new(message.to_string())
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        TaskError::Panicked(panic_message(payload))
    }

    /// True when the task ended because its action panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::new(message)
    }
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        TaskError::new(err)
    }
}

/// Returned when a task is settled a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {op} a task that is already {state}")]
pub struct SettleError {
    pub op: &'static str,
    pub state: TaskState,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}
