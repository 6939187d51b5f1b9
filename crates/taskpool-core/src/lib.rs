//! taskpool-core
//!
//! Bounded-concurrency async task pool with per-task retries and a live,
//! ordered status projection.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskId, TaskStatus, StatusPatch, AddOptions, errors）
//! - **ports**: 差し替え可能な依存（IdGenerator, Clock）
//! - **queue**: TaskRecord + pending queue / active set
//! - **scheduler**: admission / retry / settlement ループ
//! - **projection**: ステータスボードと購読（watch）
//! - **pool**: 公開 API（TaskPool, TaskHandle, TaskPoolBuilder）
//!
//! ```ignore
//! let pool = TaskPool::<String, String>::with_concurrency(2)?;
//! let handle = pool.add_with_retries(|| async { fetch().await }, 3);
//! let value = handle.await?;
//! ```

pub mod config;
pub mod domain;
pub mod pool;
pub mod ports;
pub mod projection;
mod queue;
mod scheduler;
pub mod work;

pub use config::{Concurrency, PoolConfig};
pub use domain::{
    AddOptions, PoolError, StatusCounts, StatusPatch, TaskError, TaskId, TaskPhase, TaskStatus,
};
pub use pool::{TaskHandle, TaskPool, TaskPoolBuilder};
pub use projection::{StatusBoard, StatusWatcher};
pub use work::Work;
