//! Bounded worker pool for adapter calls.
//!
//! Each call runs as its own tokio task behind a semaphore. A panic ends the
//! task with a join error; a hang ends at the branch timeout. Either way
//! only the caller's branch fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::ResolveError;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(width: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(width.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `task` on the pool. `label` names the branch in logs.
    pub async fn run<T, F>(&self, label: &str, task: F) -> Result<T, ResolveError>
    where
        F: Future<Output = Result<T, ResolveError>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ResolveError::Adapter("worker pool closed".into()))?;
        let handle = tokio::spawn(async move {
            let _permit = permit;
            task.await
        });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => {
                warn!(branch = label, "Adapter call panicked");
                Err(ResolveError::Adapter(format!("{label} panicked")))
            }
            Ok(Err(join)) => Err(ResolveError::Adapter(format!("{label} cancelled: {join}"))),
            Err(_) => {
                abort.abort();
                warn!(branch = label, timeout = ?self.timeout, "Adapter call timed out");
                Err(ResolveError::TimedOut(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_task_result() {
        let pool = WorkerPool::new(2, Duration::from_secs(1));
        assert_eq!(pool.run("ok", async { Ok(7) }).await.unwrap(), 7);
        let err = pool
            .run::<(), _>("fail", async { Err(ResolveError::ParseMismatch("x".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ParseMismatch(_)));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let pool = WorkerPool::new(1, Duration::from_secs(1));
        let err = pool
            .run::<(), _>("boom", async { panic!("adapter bug") })
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Adapter(ref m) if m.contains("panicked")));
        // the permit was released
        assert_eq!(pool.run("after", async { Ok(1) }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn hang_times_out() {
        let pool = WorkerPool::new(1, Duration::from_millis(20));
        let err = pool
            .run::<(), _>("hang", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::TimedOut(Duration::from_millis(20)));
    }
}
