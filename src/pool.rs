//! Bounded pool for CPU-bound proof verification.
//!
//! Jobs run on tokio's blocking threads; a semaphore caps how many run at once.
//! Each call has its own deadline covering both queueing and execution. A job
//! that outlives its deadline keeps its permit until it finishes, so the bound
//! holds even for abandoned work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Errors that can occur when running a job on the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("verification pool is shut down")]
    PoolClosed,

    #[error("verification timed out after {0:?}")]
    Timeout(Duration),

    #[error("verification job panicked")]
    Panicked,
}

/// Bounded verification worker pool.
#[derive(Clone)]
pub struct VerificationPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
    workers: usize,
}

impl VerificationPool {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            timeout,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `job` on a blocking thread once a slot is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| PoolError::PoolClosed)?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "Verification job failed to complete");
                PoolError::Panicked
            })
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Verification job timed out");
                Err(PoolError::Timeout(self.timeout))
            }
        }
    }

    /// Reject new jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        debug!("Shutting down verification pool");
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
