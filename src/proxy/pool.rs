//! Bounded worker pool shared by every network call of a batch

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default ceiling on concurrent network calls
pub const DEFAULT_WORKERS: usize = 500;

/// A fixed ceiling on concurrent network calls.
///
/// Clones share the same permits. Permits are only held around a single
/// network call, never while waiting on other pooled work, so nested fan-out
/// through the same pool cannot deadlock.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `task` once a permit is free
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail
        let _permit = self.semaphore.acquire().await.ok();
        task.await
    }

    /// Drive `f` over every item with at most `size` futures in flight and
    /// return once all of them completed. Results arrive in completion order.
    pub async fn map<I, F, Fut, T>(&self, items: I, f: F) -> Vec<T>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        stream::iter(items)
            .map(f)
            .buffer_unordered(self.size)
            .collect()
            .await
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
