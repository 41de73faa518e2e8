//! Manages the lifecycle of all spawned tasks in the application.
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type NamedHandle = (&'static str, JoinHandle<()>);

/// A centralized manager for spawned tasks.
///
/// Tasks are expected to watch the shutdown receiver handed out by
/// [`TaskManager::shutdown_rx`] and return once it flips to `true`.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<NamedHandle>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a new task and adds its handle to the manager.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.take_lock().push((name, handle));
    }

    /// Returns a clone of the shutdown receiver.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn len(&self) -> usize {
        self.take_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_lock(&self) -> std::sync::MutexGuard<'_, Vec<NamedHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self) -> Vec<NamedHandle> {
        self.take_lock().drain(..).collect()
    }

    /// Waits for every managed task to finish, reporting any that panicked.
    /// Returns the number of panicked tasks.
    pub async fn join(self) -> usize {
        let handles = self.drain();
        let task_names: Vec<&'static str> = handles.iter().map(|(name, _)| *name).collect();
        debug!(tasks = ?task_names, "Awaiting all tasks.");

        let results = join_all(handles.into_iter().map(|(_, handle)| handle)).await;

        let mut panicked = 0;
        for (task_name, result) in task_names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name, "Task finished."),
                Err(e) if e.is_cancelled() => debug!(task_name, "Task was aborted."),
                Err(e) => {
                    error!(task_name, error = %e, "Task panicked.");
                    panicked += 1;
                }
            }
        }
        panicked
    }

    /// Waits up to `grace` for all tasks to observe the shutdown signal,
    /// then aborts whatever is still running.
    pub async fn shutdown(self, grace: Duration) {
        let abort_handles: Vec<_> = self
            .take_lock()
            .iter()
            .map(|(name, handle)| (*name, handle.abort_handle()))
            .collect();
        info!(
            "TaskManager shutting down. Waiting for {} tasks to complete...",
            abort_handles.len()
        );

        let join = self.join();
        tokio::pin!(join);
        let panicked = match tokio::time::timeout(grace, &mut join).await {
            Ok(panicked) => panicked,
            Err(_) => {
                for (name, abort) in &abort_handles {
                    if !abort.is_finished() {
                        warn!(task_name = *name, "Task ignored shutdown, aborting.");
                        abort.abort();
                    }
                }
                join.await
            }
        };

        if panicked > 0 {
            error!("{} tasks panicked during shutdown.", panicked);
        } else {
            info!("All tasks shut down gracefully.");
        }
    }
}
