//! Errors - エラー型
//!
//! - `PoolError`: 設定・内部整合性のエラー（スケジューラ自身が出すもの）
//! - `TaskError`: `TaskHandle` が返すエラー（タスク自身の失敗）
//!
//! 失敗の分類はしない。retry するかどうかは残り retry 回数だけで決まる。

use thiserror::Error;

use super::ids::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("concurrency limit must be positive, got {0}")]
    InvalidConcurrency(usize),

    #[error("no tokio runtime available; build inside a runtime or pass a handle")]
    NoRuntime,

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
}

/// Final outcome of a task that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError<E> {
    /// The attempt that exhausted the retry budget failed with this error.
    #[error("task failed: {0}")]
    Failed(E),

    /// The task stopped without settling (its work panicked).
    #[error("task was abandoned before it settled")]
    Abandoned,
}

impl<E> TaskError<E> {
    /// The error of the final attempt, if the task failed rather than being abandoned.
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            TaskError::Abandoned => None,
        }
    }
}
