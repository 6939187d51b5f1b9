//! Status projection: the ordered, observable view of every submitted task.
//!
//! The board lives inside a `tokio::sync::watch` channel. Every merge goes
//! through `send_if_modified`, so it is atomic and wakes subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::{PoolError, StatusCounts, StatusPatch, TaskId, TaskStatus};
use crate::ports::Clock;

/// Status records in submission order, indexed by id.
#[derive(Debug, Clone)]
pub struct StatusBoard<T, E> {
    records: Vec<TaskStatus<T, E>>,
    index: HashMap<TaskId, usize>,
}

impl<T, E> StatusBoard<T, E> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Append a record. Returns `false` if the id is already present.
    pub fn insert(&mut self, status: TaskStatus<T, E>) -> bool {
        if self.index.contains_key(&status.id) {
            return false;
        }
        self.index.insert(status.id, self.records.len());
        self.records.push(status);
        true
    }

    /// Merge `patch` into the record for `id`, keeping its position.
    pub fn upsert(
        &mut self,
        id: TaskId,
        patch: StatusPatch<T, E>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), PoolError> {
        let slot = *self.index.get(&id).ok_or(PoolError::UnknownTask(id))?;
        patch.apply(&mut self.records[slot], now);
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskStatus<T, E>> {
        self.index.get(&id).map(|&slot| &self.records[slot])
    }

    pub fn records(&self) -> &[TaskStatus<T, E>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.records)
    }

    /// Every record has settled.
    pub fn is_idle(&self) -> bool {
        self.records.iter().all(TaskStatus::is_settled)
    }
}

impl<T, E> Default for StatusBoard<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer side of the projection, owned by the scheduler.
pub(crate) struct StatusProjection<T, E> {
    tx: watch::Sender<StatusBoard<T, E>>,
    clock: Arc<dyn Clock>,
}

impl<T, E> StatusProjection<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(StatusBoard::new());
        Self { tx, clock }
    }

    /// Register a freshly submitted task.
    pub fn insert(&self, id: TaskId) -> bool {
        let status = TaskStatus::queued(id, self.clock.now());
        self.tx.send_if_modified(|board| board.insert(status))
    }

    pub fn upsert(&self, id: TaskId, patch: StatusPatch<T, E>) -> Result<(), PoolError> {
        let now = self.clock.now();
        let mut result = Ok(());
        self.tx.send_if_modified(|board| {
            result = board.upsert(id, patch, now);
            result.is_ok()
        });
        result
    }

    pub fn snapshot(&self) -> Vec<TaskStatus<T, E>> {
        self.tx.borrow().records().to_vec()
    }

    pub fn get(&self, id: TaskId) -> Option<TaskStatus<T, E>> {
        self.tx.borrow().get(id).cloned()
    }

    pub fn counts(&self) -> StatusCounts {
        self.tx.borrow().counts()
    }

    pub fn subscribe(&self) -> StatusWatcher<T, E> {
        StatusWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only subscription to the status board.
///
/// ```ignore
/// let mut watcher = pool.subscribe();
/// while watcher.changed().await {
///     render(&watcher.snapshot());
/// }
/// ```
#[derive(Clone)]
pub struct StatusWatcher<T, E> {
    rx: watch::Receiver<StatusBoard<T, E>>,
}

impl<T, E> StatusWatcher<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Wait for the next change. Returns `false` once the pool is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn snapshot(&mut self) -> Vec<TaskStatus<T, E>> {
        self.rx.borrow_and_update().records().to_vec()
    }

    pub fn counts(&self) -> StatusCounts {
        self.rx.borrow().counts()
    }

    /// Wait until `predicate` holds for the board and return that snapshot.
    ///
    /// The predicate sees a copy of the board, so it may call back into the pool.
    /// Returns `None` if the pool went away before the predicate held.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&StatusBoard<T, E>) -> bool,
    ) -> Option<Vec<TaskStatus<T, E>>> {
        loop {
            let board = self.rx.borrow_and_update().clone();
            if predicate(&board) {
                return Some(board.records().to_vec());
            }
            self.rx.changed().await.ok()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, IdGenerator, SequentialIdGenerator};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn projection() -> StatusProjection<String, String> {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        StatusProjection::new(Arc::new(FixedClock::new(at)))
    }

    #[test]
    fn insert_preserves_submission_order() {
        let ids = SequentialIdGenerator::new();
        let projection = projection();
        let submitted: Vec<TaskId> = (0..4).map(|_| ids.generate_task_id()).collect();
        for id in &submitted {
            assert!(projection.insert(*id));
        }

        // Updating later records does not move them.
        projection
            .upsert(submitted[3], StatusPatch::succeeded("d".into()))
            .unwrap();
        projection.upsert(submitted[1], StatusPatch::started()).unwrap();

        let seen: Vec<TaskId> = projection.snapshot().iter().map(|s| s.id).collect();
        assert_eq!(seen, submitted);
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let ids = SequentialIdGenerator::new();
        let projection = projection();
        let id = ids.generate_task_id();

        assert!(projection.insert(id));
        projection.upsert(id, StatusPatch::started()).unwrap();
        assert!(!projection.insert(id));

        let snapshot = projection.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].running);
    }

    #[test]
    fn upsert_unknown_id_fails() {
        let ids = SequentialIdGenerator::new();
        let projection = projection();
        let id = ids.generate_task_id();

        assert_eq!(
            projection.upsert(id, StatusPatch::started()),
            Err(PoolError::UnknownTask(id))
        );
        assert!(projection.get(id).is_none());
    }

    #[test]
    fn earlier_snapshots_are_not_affected_by_later_updates() {
        let ids = SequentialIdGenerator::new();
        let projection = projection();
        let id = ids.generate_task_id();
        projection.insert(id);

        let before = projection.snapshot();
        projection.upsert(id, StatusPatch::started()).unwrap();

        assert!(!before[0].running);
        assert!(projection.get(id).unwrap().running);
    }

    #[tokio::test]
    async fn watcher_sees_updates() {
        let ids = SequentialIdGenerator::new();
        let projection = projection();
        let id = ids.generate_task_id();
        let mut watcher = projection.subscribe();

        projection.insert(id);
        assert!(watcher.changed().await);
        assert_eq!(watcher.counts().queued, 1);

        projection
            .upsert(id, StatusPatch::failed("e".into()))
            .unwrap();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(1),
            watcher.wait_for(StatusBoard::is_idle),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(snapshot[0].error.as_deref(), Some("e"));
    }

    #[tokio::test]
    async fn watcher_reports_closed_projection() {
        let projection = projection();
        let mut watcher = projection.subscribe();
        drop(projection);
        assert!(!watcher.changed().await);
    }
}
