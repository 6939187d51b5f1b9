//! Task record: the work plus everything needed to settle it.

use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::TaskId;
use crate::work::Work;

/// One pending or executing attempt of a logical task.
///
/// Design:
/// - `id` is shared by every attempt of the task.
/// - `settle` is moved (never cloned) into the retry record, so a task can be
///   settled at most once.
/// - A record lives in the pending queue or inside its running attempt, never both.
pub struct TaskRecord<T, E> {
    pub id: TaskId,
    pub work: Box<dyn Work<T, E>>,
    settle: oneshot::Sender<Result<T, E>>,

    /// Attempts still allowed after the current one fails.
    pub retries_left: u32,

    /// Attempts started so far.
    pub attempts: u32,
}

impl<T, E> TaskRecord<T, E> {
    pub fn new(
        id: TaskId,
        work: Box<dyn Work<T, E>>,
        settle: oneshot::Sender<Result<T, E>>,
        retries: u32,
    ) -> Self {
        Self {
            id,
            work,
            settle,
            retries_left: retries,
            attempts: 0,
        }
    }

    pub fn start_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Consume one retry. Returns the record back as `Err` when the budget is spent.
    pub fn into_retry(mut self) -> Result<Self, Self> {
        if self.retries_left == 0 {
            return Err(self);
        }
        self.retries_left -= 1;
        Ok(self)
    }

    /// Deliver the final outcome to the submitter.
    pub fn resolve(self, outcome: Result<T, E>) {
        if self.settle.send(outcome).is_err() {
            debug!(task_id = %self.id, "TaskRecord::resolve: handle dropped, outcome discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn record(retries: u32) -> (TaskRecord<u8, String>, oneshot::Receiver<Result<u8, String>>) {
        let (tx, rx) = oneshot::channel();
        let work = || async { Ok::<u8, String>(1) };
        (TaskRecord::new(TaskId::from(Ulid::new()), Box::new(work), tx, retries), rx)
    }

    #[test]
    fn retry_consumes_budget_and_keeps_identity() {
        let (record, _rx) = record(2);
        let id = record.id;

        let record = record.into_retry().ok().unwrap();
        assert_eq!(record.retries_left, 1);
        let record = record.into_retry().ok().unwrap();
        assert_eq!(record.retries_left, 0);
        assert_eq!(record.id, id);

        assert!(record.into_retry().is_err());
    }

    #[tokio::test]
    async fn resolve_reaches_receiver_once() {
        let (record, rx) = record(0);
        record.resolve(Err("boom".to_string()));
        assert_eq!(rx.await.unwrap(), Err("boom".to_string()));
    }

    #[test]
    fn resolve_without_receiver_is_silent() {
        let (record, rx) = record(0);
        drop(rx);
        record.resolve(Ok(1));
    }
}
