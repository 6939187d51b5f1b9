//! Pending queue + active set.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use super::TaskRecord;
use crate::config::Concurrency;
use crate::domain::TaskId;

/// Bookkeeping for an admitted attempt.
#[derive(Debug, Clone, Copy)]
pub struct ActiveAttempt {
    pub attempt: u32,
    pub started_at: Instant,
}

/// Scheduler state guarded by one mutex.
///
/// Invariants:
/// - a task id is either in `pending` or in `active`, never both
/// - `active.len()` never exceeds the concurrency limit
pub struct SchedulerState<T, E> {
    /// FIFO. Retries are pushed at the back like fresh arrivals.
    pending: VecDeque<TaskRecord<T, E>>,

    active: HashMap<TaskId, ActiveAttempt>,

    /// Highest `active.len()` observed.
    peak_active: usize,
}

impl<T, E> SchedulerState<T, E> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            active: HashMap::new(),
            peak_active: 0,
        }
    }

    pub fn enqueue(&mut self, record: TaskRecord<T, E>) {
        self.pending.push_back(record);
    }

    /// Move the front record into the active set if capacity allows.
    pub fn admit_next(&mut self, concurrency: Concurrency) -> Option<TaskRecord<T, E>> {
        if !concurrency.has_capacity(self.active.len()) {
            return None;
        }
        let mut record = self.pending.pop_front()?;
        record.start_attempt();
        self.active.insert(
            record.id,
            ActiveAttempt {
                attempt: record.attempts,
                started_at: Instant::now(),
            },
        );
        self.peak_active = self.peak_active.max(self.active.len());
        Some(record)
    }

    /// Drop a settled attempt from the active set.
    pub fn release(&mut self, id: TaskId) -> Option<ActiveAttempt> {
        self.active.remove(&id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active
    }
}

impl<T, E> Default for SchedulerState<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{IdGenerator, SequentialIdGenerator};
    use tokio::sync::oneshot;

    fn record(ids: &SequentialIdGenerator) -> TaskRecord<(), ()> {
        let (tx, _rx) = oneshot::channel();
        let work = || async { Ok::<(), ()>(()) };
        TaskRecord::new(ids.generate_task_id(), Box::new(work), tx, 0)
    }

    #[test]
    fn admits_in_fifo_order_up_to_limit() {
        let ids = SequentialIdGenerator::new();
        let mut state = SchedulerState::new();
        let r1 = record(&ids);
        let r2 = record(&ids);
        let r3 = record(&ids);
        let (id1, id2, id3) = (r1.id, r2.id, r3.id);
        state.enqueue(r1);
        state.enqueue(r2);
        state.enqueue(r3);

        let limit = Concurrency::limited(2).unwrap();
        assert_eq!(state.admit_next(limit).map(|r| r.id), Some(id1));
        assert_eq!(state.admit_next(limit).map(|r| r.id), Some(id2));
        assert!(state.admit_next(limit).is_none());
        assert_eq!(state.active_len(), 2);
        assert_eq!(state.pending_len(), 1);

        state.release(id1);
        assert_eq!(state.active_len(), 1);
        assert_eq!(state.admit_next(limit).map(|r| r.id), Some(id3));
        assert_eq!(state.peak_active(), 2);
    }

    #[test]
    fn admission_marks_attempt_number() {
        let ids = SequentialIdGenerator::new();
        let mut state = SchedulerState::new();
        let r = record(&ids);
        let id = r.id;
        state.enqueue(r);

        let admitted = state.admit_next(Concurrency::Unbounded).unwrap();
        assert_eq!(admitted.attempts, 1);
        assert_eq!(state.release(id).map(|a| a.attempt), Some(1));
        assert!(state.release(id).is_none());
    }

    #[test]
    fn empty_queue_admits_nothing() {
        let mut state: SchedulerState<(), ()> = SchedulerState::new();
        assert!(state.admit_next(Concurrency::Unbounded).is_none());
        assert_eq!(state.active_len(), 0);
    }
}
