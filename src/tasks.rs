//! Supervision for the hub's background work (heartbeat, rate-limit sweep,
//! AI request simulation).

use std::{future::Future, time::Duration};
use tokio::{
    sync::{Mutex, watch},
    task::JoinSet,
};

pub struct TaskSupervisor {
    tasks: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(JoinSet::new()),
            shutdown,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Spawns `task`, cancelling it when shutdown is signalled.
    /// Returns `false` once shutdown has started.
    pub async fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            tracing::debug!(task = name, "Refusing to spawn task during shutdown");
            return false;
        }

        let shutdown = self.shutdown.subscribe();
        let mut tasks = self.tasks.lock().await;
        reap_finished(&mut tasks);
        tasks.spawn(async move {
            tokio::select! {
                _ = task => tracing::trace!(task = name, "Task finished"),
                _ = stopped(shutdown) => tracing::debug!(task = name, "Task cancelled by shutdown"),
            }
        });
        true
    }

    pub async fn len(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        reap_finished(&mut tasks);
        tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Signals every task to stop without waiting for them.
    pub fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Signals shutdown and waits up to `grace` for tasks to wind down,
    /// aborting whatever is still running afterwards.
    pub async fn shutdown(&self, grace: Duration) {
        self.signal_shutdown();
        let mut tasks = self.tasks.lock().await;
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "Aborting tasks that outlived the shutdown grace period");
            tasks.abort_all();
        }
    }
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            if e.is_panic() {
                tracing::error!(error = %e, "Background task panicked");
            }
        }
    }
}
