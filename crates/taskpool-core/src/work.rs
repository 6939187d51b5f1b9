use std::future::Future;

use async_trait::async_trait;

/// A unit of asynchronous work that can be attempted more than once.
///
/// Every retry calls [`Work::run`] again on the same value, so implementations
/// must be able to produce a fresh attempt each time.
///
/// Closures returning a future implement this automatically:
///
/// ```ignore
/// pool.add(|| async { Ok::<_, String>(42) }, AddOptions::default());
/// ```
#[async_trait]
pub trait Work<T, E>: Send + Sync + 'static {
    async fn run(&self) -> Result<T, E>;
}

#[async_trait]
impl<F, Fut, T, E> Work<T, E> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn run(&self) -> Result<T, E> {
        (self)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Countdown {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Work<&'static str, String> for Countdown {
        async fn run(&self) -> Result<&'static str, String> {
            let left = self.failures_left.load(Ordering::Relaxed);
            if left > 0 {
                self.failures_left.fetch_sub(1, Ordering::Relaxed);
                return Err(format!("intentional failure (left={left})"));
            }
            Ok("done")
        }
    }

    #[tokio::test]
    async fn closures_are_work() {
        let work = || async { Ok::<_, String>(7) };
        assert_eq!(Work::run(&work).await, Ok(7));
        assert_eq!(Work::run(&work).await, Ok(7));
    }

    #[tokio::test]
    async fn structs_can_carry_attempt_state() {
        let work = Countdown {
            failures_left: AtomicU32::new(1),
        };
        assert!(work.run().await.is_err());
        assert_eq!(work.run().await, Ok("done"));
    }
}
