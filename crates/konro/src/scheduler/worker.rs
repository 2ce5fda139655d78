//! Background worker management for the dispatch coordinator.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{sync::Notify, task::JoinHandle};

/// Handle to the long-running dispatch task.
///
/// Owns the running flag and wake-up notifier for the coordinator loop and
/// shuts the loop down gracefully when dropped, so a scheduler going out of
/// scope never leaves a detached dispatcher behind.
pub(crate) struct WorkerHandle {
    /// Cleared to ask the dispatch loop to exit at its next iteration.
    running: Arc<AtomicBool>,

    /// Spawned dispatch task; taken once shutdown begins.
    handle: Option<JoinHandle<()>>,

    /// Wakes the dispatch loop when new work or a freed slot appears.
    notifier: Arc<Notify>,
}

impl WorkerHandle {
    /// Spawns the dispatch task. The closure receives the shared running
    /// flag and notifier and must return the spawned `JoinHandle`.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> JoinHandle<()> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let handle = task(running.clone(), notifier.clone());

        Self {
            running,
            handle: Some(handle),
            notifier,
        }
    }

    /// Wakes the dispatch loop to re-examine the queue and slot state.
    pub fn notify(&self) {
        self.notifier.notify_one();
    }

    #[allow(dead_code)]
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Asks the dispatch loop to stop and detaches a task to await it.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();

        if let Some(handle) = self.handle.take() {
            tokio::spawn(async move {
                let _ = handle.await;
            });
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
