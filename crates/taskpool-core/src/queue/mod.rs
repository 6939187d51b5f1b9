//! Queue module: task records, pending queue and active set.

mod record;
mod state;

pub use record::TaskRecord;
pub use state::SchedulerState;
