//! Domain model (ids, status records, options, errors).

pub mod errors;
pub mod ids;
pub mod options;
pub mod status;

pub use errors::{PoolError, TaskError};
pub use ids::{ParseTaskIdError, TaskId};
pub use options::AddOptions;
pub use status::{StatusCounts, StatusPatch, TaskPhase, TaskStatus};
