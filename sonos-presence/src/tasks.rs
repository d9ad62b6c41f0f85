//! Scoped background task host
//!
//! Every piece of scheduled work (search bursts, backoff retries, mute ticks,
//! deadline timers and fire-and-forget device calls) is spawned through a
//! [`TaskHost`]. The host is initialized once, runs indefinitely, and
//! [`TaskHost::shutdown`] cancels everything still pending.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::error::{PresenceError, Result};

/// Default number of worker threads for an owned runtime
pub const DEFAULT_WORKER_THREADS: usize = 2;

#[derive(Default)]
struct HostTasks {
    shut_down: bool,
    handles: Vec<AbortHandle>,
}

struct HostInner {
    handle: Handle,
    /// Present only when the host built its own runtime
    runtime: Mutex<Option<Runtime>>,
    tasks: Mutex<HostTasks>,
}

impl Drop for HostInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

/// Cloneable handle to a shared pool of background tasks
///
/// # Example
///
/// ```rust,ignore
/// let host = TaskHost::with_worker_threads(2)?;
/// host.spawn(async { tokio::time::sleep(Duration::from_secs(2)).await });
/// host.shutdown(); // aborts the sleeping task
/// ```
#[derive(Clone)]
pub struct TaskHost {
    inner: Arc<HostInner>,
}

impl TaskHost {
    /// Attach to the tokio runtime running on the calling thread
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| PresenceError::NoRuntime(e.to_string()))?;
        Ok(Self::from_handle(handle))
    }

    /// Spawn onto an existing runtime
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(HostInner {
                handle,
                runtime: Mutex::new(None),
                tasks: Mutex::new(HostTasks::default()),
            }),
        }
    }

    /// Build and own a small multi-threaded runtime
    ///
    /// Use this from hosts that are not async themselves.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self> {
        if worker_threads == 0 {
            return Err(PresenceError::Configuration(
                "Worker thread count must be greater than 0".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("sonos-mute-worker")
            .enable_all()
            .build()?;

        debug!(worker_threads, "Built worker runtime");

        Ok(Self {
            inner: Arc::new(HostInner {
                handle: runtime.handle().clone(),
                runtime: Mutex::new(Some(runtime)),
                tasks: Mutex::new(HostTasks::default()),
            }),
        })
    }

    /// Spawn a task, returning `None` once the host has been shut down
    pub fn spawn<F>(&self, future: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut tasks = self.inner.tasks.lock();
        if tasks.shut_down {
            debug!("Task host is shut down, dropping task");
            return None;
        }

        tasks.handles.retain(|handle| !handle.is_finished());
        let join = self.inner.handle.spawn(future);
        tasks.handles.push(join.abort_handle());
        Some(join)
    }

    /// Number of spawned tasks that have not finished yet
    pub fn active_tasks(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .handles
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.tasks.lock().shut_down
    }

    /// Abort every pending task and refuse new ones
    pub fn shutdown(&self) {
        let aborted = {
            let mut tasks = self.inner.tasks.lock();
            if tasks.shut_down {
                return;
            }
            tasks.shut_down = true;
            let handles = std::mem::take(&mut tasks.handles);
            for handle in &handles {
                handle.abort();
            }
            handles.len()
        };

        info!(aborted, "Task host shut down");

        if let Some(runtime) = self.inner.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for TaskHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHost")
            .field("active_tasks", &self.active_tasks())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_spawn_runs_task() {
        let host = TaskHost::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let join = host.spawn(async move { flag.store(true, Ordering::SeqCst) }).unwrap();
        join.await.unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(host.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_pending_tasks() {
        let host = TaskHost::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let join = host
            .spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(host.active_tasks(), 1);

        host.shutdown();
        assert!(join.await.unwrap_err().is_cancelled());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_is_refused() {
        let host = TaskHost::current().unwrap();
        host.shutdown();

        assert!(host.is_shut_down());
        assert!(host.spawn(async {}).is_none());
    }

    #[test]
    fn test_current_without_runtime_fails() {
        assert!(matches!(TaskHost::current(), Err(PresenceError::NoRuntime(_))));
    }

    #[test]
    fn test_owned_runtime_runs_tasks() {
        let host = TaskHost::with_worker_threads(1).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        host.spawn(async move {
            let _ = tx.send(42);
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        host.shutdown();
    }

    #[test]
    fn test_zero_worker_threads_rejected() {
        assert!(matches!(
            TaskHost::with_worker_threads(0),
            Err(PresenceError::Configuration(_))
        ));
    }
}
