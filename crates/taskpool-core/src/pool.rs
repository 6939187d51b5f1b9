//! TaskPool - submission API and builder.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::{Concurrency, PoolConfig};
use crate::domain::{AddOptions, PoolError, StatusCounts, TaskError, TaskId, TaskStatus};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::projection::{StatusProjection, StatusWatcher};
use crate::queue::TaskRecord;
use crate::scheduler::Scheduler;
use crate::work::Work;

/// Bounded-concurrency task pool.
///
/// Cloning is cheap and every clone drives the same queue.
pub struct TaskPool<T, E> {
    scheduler: Arc<Scheduler<T, E>>,
    ids: Arc<dyn IdGenerator>,
    default_retries: u32,
}

impl<T, E> Clone for TaskPool<T, E> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            ids: Arc::clone(&self.ids),
            default_retries: self.default_retries,
        }
    }
}

impl<T, E> TaskPool<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn builder() -> TaskPoolBuilder<T, E> {
        TaskPoolBuilder::new()
    }

    /// Build from a config on the current Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::builder().config(config).build()
    }

    /// Shorthand for a pool with `n` slots and default everything else.
    pub fn with_concurrency(n: usize) -> Result<Self, PoolError> {
        Self::builder().concurrency(Concurrency::limited(n)?).build()
    }

    /// Submit `work`.
    ///
    /// Never blocks and never fails by itself: the returned handle settles
    /// once, with the first successful value or with the error of the attempt
    /// that used up the retry budget.
    pub fn add<W>(&self, work: W, options: AddOptions) -> TaskHandle<T, E>
    where
        W: Work<T, E>,
    {
        let id = self.ids.generate_task_id();
        let retries = options.resolve_retries(self.default_retries);
        let (tx, rx) = oneshot::channel();

        debug!(task_id = %id, retries, "TaskPool::add: called");
        self.scheduler
            .submit(TaskRecord::new(id, Box::new(work), tx, retries));

        TaskHandle { id, rx }
    }

    pub fn add_with_retries<W>(&self, work: W, retries: u32) -> TaskHandle<T, E>
    where
        W: Work<T, E>,
    {
        self.add(work, AddOptions::retries(retries))
    }

    /// Snapshot of every status record, in submission order.
    pub fn tasks(&self) -> Vec<TaskStatus<T, E>> {
        self.scheduler.projection().snapshot()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus<T, E>> {
        self.scheduler.projection().get(id)
    }

    pub fn counts(&self) -> StatusCounts {
        self.scheduler.projection().counts()
    }

    pub fn subscribe(&self) -> StatusWatcher<T, E> {
        self.scheduler.projection().subscribe()
    }

    /// Wait until every submitted task has settled.
    pub async fn wait_idle(&self) {
        let mut watcher = self.subscribe();
        // The pool itself keeps the projection alive, so this only returns once idle.
        let _ = watcher.wait_for(|board| board.is_idle()).await;
    }

    pub fn concurrency(&self) -> Concurrency {
        self.scheduler.concurrency()
    }

    pub fn pending_len(&self) -> usize {
        self.scheduler.lock().pending_len()
    }

    pub fn active_len(&self) -> usize {
        self.scheduler.lock().active_len()
    }

    /// Highest number of attempts that ran at the same time.
    pub fn peak_active(&self) -> usize {
        self.scheduler.lock().peak_active()
    }
}

/// Future for the outcome of one submitted task.
#[must_use = "the task runs regardless, but its outcome is lost if the handle is dropped"]
#[derive(Debug)]
pub struct TaskHandle<T, E> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(TaskError::Failed(error)),
            // The sender went away without settling.
            Err(_) => Err(TaskError::Abandoned),
        })
    }
}

/// TaskPoolBuilder は TaskPool を構築
///
/// # 使用例
/// ```ignore
/// let pool = TaskPool::<String, String>::builder()
///     .concurrency(Concurrency::limited(4)?)
///     .default_retries(2)
///     .build()?;
/// ```
pub struct TaskPoolBuilder<T, E> {
    config: PoolConfig,
    ids: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
    runtime: Option<Handle>,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<T, E> TaskPoolBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            ids: None,
            clock: None,
            runtime: None,
            _marker: PhantomData,
        }
    }

    /// Replace the whole config.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn default_retries(mut self, retries: u32) -> Self {
        self.config.default_retries = retries;
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Runtime used to spawn attempts. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<TaskPool<T, E>, PoolError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| PoolError::NoRuntime)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        debug!(
            concurrency = %self.config.concurrency,
            default_retries = self.config.default_retries,
            "TaskPoolBuilder::build: called"
        );
        let projection = StatusProjection::new(clock);
        let scheduler = Scheduler::new(self.config.concurrency, projection, runtime);

        Ok(TaskPool {
            scheduler: Arc::new(scheduler),
            ids,
            default_retries: self.config.default_retries,
        })
    }
}

impl<T, E> Default for TaskPoolBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
