//! Scheduler loop: admission, attempt lifecycle, retry and settlement.
//!
//! `pump` は「pending / active が変わったら必ず呼ぶ」関数。
//! React の effect による再計算の代わりに、変更箇所から明示的に呼び出す。
//!
//! ロック順序: `state` (std Mutex) -> projection (watch の内部ロック)。
//! ロックを保持したまま `.await` しない。
//!
//! panic は attempt 内で `catch_unwind` して `abandon` に回す。
//! `AttemptGuard` が drop で発火するのは runtime が future を捨てた時だけ
//! (shutdown)。その場合は slot を解放するだけで、次の admission はしない。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{Instrument, debug, debug_span, warn};

use crate::config::Concurrency;
use crate::domain::{StatusPatch, TaskId};
use crate::projection::StatusProjection;
use crate::queue::{SchedulerState, TaskRecord};

pub(crate) struct Scheduler<T, E> {
    state: Mutex<SchedulerState<T, E>>,
    projection: StatusProjection<T, E>,
    concurrency: Concurrency,
    runtime: Handle,
    /// Set once the runtime has started dropping attempts. Nothing is admitted after that.
    runtime_closed: AtomicBool,
}

impl<T, E> Scheduler<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(concurrency: Concurrency, projection: StatusProjection<T, E>, runtime: Handle) -> Self {
        Self {
            state: Mutex::new(SchedulerState::new()),
            projection,
            concurrency,
            runtime,
            runtime_closed: AtomicBool::new(false),
        }
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn projection(&self) -> &StatusProjection<T, E> {
        &self.projection
    }

    /// Every critical section leaves the state consistent, so a poisoned lock is still usable.
    pub fn lock(&self) -> MutexGuard<'_, SchedulerState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new task and try to admit it.
    ///
    /// The status record and the queue entry are added under the same lock, so
    /// projection order matches queue order.
    pub fn submit(self: &Arc<Self>, record: TaskRecord<T, E>) {
        {
            let mut state = self.lock();
            self.projection.insert(record.id);
            debug!(
                task_id = %record.id,
                retries = record.retries_left,
                pending = state.pending_len() + 1,
                "Scheduler::submit: queued"
            );
            state.enqueue(record);
        }
        self.pump();
    }

    /// Admit as many pending records as capacity allows and start them.
    pub fn pump(self: &Arc<Self>) {
        if self.runtime_closed.load(Ordering::Acquire) {
            return;
        }
        let admitted = {
            let mut state = self.lock();
            let mut admitted = Vec::new();
            while let Some(record) = state.admit_next(self.concurrency) {
                self.update(record.id, StatusPatch::started());
                debug!(
                    task_id = %record.id,
                    attempt = record.attempts,
                    active = state.active_len(),
                    "Scheduler::pump: admitted"
                );
                admitted.push(record);
            }
            admitted
        };

        for record in admitted {
            self.spawn_attempt(record);
        }
    }

    fn spawn_attempt(self: &Arc<Self>, record: TaskRecord<T, E>) {
        let span = debug_span!("attempt", task_id = %record.id, attempt = record.attempts);
        let scheduler = Arc::clone(self);
        // Created before spawning so a future dropped unpolled still frees its slot.
        let mut guard = AttemptGuard::new(Arc::clone(self), record.id);
        self.runtime.spawn(
            async move {
                guard.mark_started();
                let outcome = AssertUnwindSafe(record.work.run()).catch_unwind().await;
                guard.disarm();
                match outcome {
                    Ok(outcome) => scheduler.settle(record, outcome),
                    Err(_) => scheduler.abandon(record),
                }
            }
            .instrument(span),
        );
    }

    /// Handle the end of one attempt, then re-run admission.
    fn settle(self: &Arc<Self>, record: TaskRecord<T, E>, outcome: Result<T, E>) {
        let id = record.id;
        {
            let mut state = self.lock();
            let elapsed_ms = state
                .release(id)
                .map(|active| active.started_at.elapsed().as_millis());
            match outcome {
                Ok(value) => {
                    debug!(
                        task_id = %id,
                        attempt = record.attempts,
                        ?elapsed_ms,
                        "Scheduler::settle: succeeded"
                    );
                    self.update(id, StatusPatch::succeeded(value.clone()));
                    record.resolve(Ok(value));
                }
                Err(error) => match record.into_retry() {
                    Ok(retry) => {
                        debug!(
                            task_id = %id,
                            attempt = retry.attempts,
                            retries_left = retry.retries_left,
                            "Scheduler::settle: failed, requeued"
                        );
                        self.update(id, StatusPatch::requeued());
                        state.enqueue(retry);
                    }
                    Err(record) => {
                        debug!(
                            task_id = %id,
                            attempt = record.attempts,
                            "Scheduler::settle: failed, retries exhausted"
                        );
                        self.update(id, StatusPatch::failed(error.clone()));
                        record.resolve(Err(error));
                    }
                },
            }
        }
        self.pump();
    }

    /// The work panicked. The record is dropped unsettled, so its handle sees `Abandoned`.
    fn abandon(self: &Arc<Self>, record: TaskRecord<T, E>) {
        let id = record.id;
        {
            let mut state = self.lock();
            state.release(id);
            warn!(task_id = %id, attempt = record.attempts, "Scheduler::abandon: work panicked");
            self.update(id, StatusPatch::abandoned());
        }
        drop(record);
        self.pump();
    }

    /// The runtime dropped an attempt's future. Frees the slot and stops admission.
    ///
    /// Never calls `pump`: spawning on a closing runtime would drop the next
    /// attempt right away and land back here for every pending record.
    fn cancel(&self, id: TaskId, started: bool) {
        self.runtime_closed.store(true, Ordering::Release);
        let mut state = self.lock();
        let attempt = state.release(id).map(|a| a.attempt);
        debug!(
            task_id = %id,
            ?attempt,
            started,
            pending = state.pending_len(),
            "Scheduler::cancel: attempt dropped by the runtime"
        );
        let patch = if started {
            StatusPatch::abandoned()
        } else {
            StatusPatch::withdrawn()
        };
        self.update(id, patch);
    }

    fn update(&self, id: TaskId, patch: StatusPatch<T, E>) {
        if let Err(e) = self.projection.upsert(id, patch) {
            warn!(task_id = %id, error = %e, "Scheduler::update: status upsert failed");
        }
    }
}

/// Frees the attempt's slot if the runtime drops its future before it settles.
struct AttemptGuard<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    scheduler: Option<Arc<Scheduler<T, E>>>,
    id: TaskId,
    /// The future was polled, so the work has been called.
    started: bool,
}

impl<T, E> AttemptGuard<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn new(scheduler: Arc<Scheduler<T, E>>, id: TaskId) -> Self {
        Self {
            scheduler: Some(scheduler),
            id,
            started: false,
        }
    }

    fn mark_started(&mut self) {
        self.started = true;
    }

    fn disarm(mut self) {
        self.scheduler = None;
    }
}

impl<T, E> Drop for AttemptGuard<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.cancel(self.id, self.started);
        }
    }
}
