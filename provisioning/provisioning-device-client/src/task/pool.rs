// Copyright (c) Microsoft. All rights reserved.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::Error;

/// Runs sub-tasks on the tokio runtime, at most `max_workers` at a time.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    permits: Arc<tokio::sync::Semaphore>,
    in_flight: Mutex<BTreeMap<u64, tokio::task::AbortHandle>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl WorkerPool {
    pub(crate) fn new(max_workers: usize) -> Self {
        WorkerPool {
            permits: Arc::new(tokio::sync::Semaphore::new(max_workers)),
            in_flight: Mutex::default(),
            next_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Spawns `task` and waits up to `timeout` for it. A task that runs out of time is aborted.
    pub(crate) async fn execute<F, T>(&self, task: F, timeout: Duration) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(shut_down());
        }

        let permits = self.permits.clone();
        let mut handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| shut_down())?;

            task.await
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.in_flight().insert(id, handle.abort_handle());

        let result = tokio::time::timeout(timeout, &mut handle).await;
        self.in_flight().remove(&id);

        match result {
            Ok(Ok(result)) => result,
            Ok(Err(err)) if err.is_cancelled() => {
                Err(Error::Execution("task was cancelled".to_string()))
            }
            Ok(Err(err)) => Err(Error::Execution(format!("task failed: {}", err))),
            Err(_) => {
                handle.abort();
                log::warn!("Provisioning sub-task did not finish within {:?}.", timeout);

                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Stops accepting work and aborts whatever is running. Returns `false` if the pool was
    /// already shut down.
    pub(crate) fn shutdown_now(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.permits.close();

        let in_flight = std::mem::take(&mut *self.in_flight());
        if !in_flight.is_empty() {
            log::debug!("Aborting {} in-flight provisioning sub-tasks.", in_flight.len());
        }

        for handle in in_flight.into_values() {
            handle.abort();
        }

        true
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, tokio::task::AbortHandle>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn shut_down() -> Error {
    Error::Execution("worker pool is shut down".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::WorkerPool;
    use crate::Error;

    #[tokio::test]
    async fn returns_task_result() {
        let pool = WorkerPool::new(2);

        let value = pool
            .execute(async { Ok(5) }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, 5);

        let err = pool
            .execute(
                async { Err::<(), _>(Error::client("bad")) },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_times_out() {
        let pool = WorkerPool::new(1);

        let err = pool
            .execute(
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
                Duration::from_secs(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(timeout) if timeout == Duration::from_secs(10)));

        // The aborted task released its permit.
        pool.execute(async { Ok(()) }, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn limits_concurrency() {
        let pool = Arc::new(WorkerPool::new(1));
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let running = running.clone();
                let max_running = max_running.clone();

                tokio::spawn(async move {
                    pool.execute(
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            max_running.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            running.fetch_sub(1, Ordering::SeqCst);

                            Ok(())
                        },
                        Duration::from_secs(5),
                    )
                    .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_tasks() {
        let pool = Arc::new(WorkerPool::new(2));

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let running = {
            let pool = pool.clone();

            tokio::spawn(async move {
                pool.execute(
                    async move {
                        let _ = started_tx.send(());
                        futures_util::future::pending::<()>().await;
                        Ok(())
                    },
                    Duration::from_secs(3600),
                )
                .await
            })
        };

        started_rx.await.unwrap();

        assert!(pool.shutdown_now());
        assert!(!pool.shutdown_now());
        assert!(pool.is_shut_down());

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Execution(_)));

        let err = pool
            .execute(async { Ok(()) }, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
