//! Worker pool draining the reconciler's queues.
//!
//! Each queue gets `workers` tasks. A worker takes one key, syncs it, and
//! re-queues it after `requeue_delay` when the failure is retryable. A
//! resync task periodically enqueues every cached snapshot and content so
//! permanent failures are looked at again once their inputs change.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vsnap_core::Resource;

use crate::error::Result;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;

/// Which queue a worker drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Snapshots,
    Contents,
}

impl QueueKind {
    fn queue(self, reconciler: &Reconciler) -> &Arc<WorkQueue> {
        match self {
            Self::Snapshots => reconciler.snapshot_queue(),
            Self::Contents => reconciler.content_queue(),
        }
    }
}

/// Runs a [`Reconciler`] until stopped.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Controller {
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            stop_tx,
            stop_rx,
        }
    }

    /// A handle that stops the controller from elsewhere.
    #[must_use]
    pub fn stopper(&self) -> ControllerStopper {
        ControllerStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Spawn the workers and the resync task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(self) -> ControllerHandle {
        let config = self.reconciler.config().clone();
        info!(
            workers = config.workers,
            resync_ms = config.resync_period.as_millis(),
            "starting snapshot controller"
        );

        let mut tasks = Vec::with_capacity(config.workers * 2 + 1);
        for kind in [QueueKind::Snapshots, QueueKind::Contents] {
            for worker in 0..config.workers {
                tasks.push(tokio::spawn(run_worker(
                    Arc::clone(&self.reconciler),
                    kind,
                    worker,
                    config.requeue_delay,
                )));
            }
        }
        tasks.push(tokio::spawn(run_resync(
            Arc::clone(&self.reconciler),
            config.resync_period,
            self.stop_rx,
        )));

        ControllerHandle {
            reconciler: self.reconciler,
            stop_tx: self.stop_tx,
            tasks,
        }
    }
}

/// Stop signal for a running controller.
#[derive(Clone)]
pub struct ControllerStopper {
    stop_tx: watch::Sender<bool>,
}

impl ControllerStopper {
    /// Ask the controller to stop. The resync task exits at once; workers
    /// exit once [`ControllerHandle::stop`] shuts the queues down.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// A started controller.
pub struct ControllerHandle {
    reconciler: Arc<Reconciler>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    #[must_use]
    pub const fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Stop resyncing, let the workers drain what is queued, and wait for
    /// every task to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        self.reconciler.snapshot_queue().shut_down().await;
        self.reconciler.content_queue().shut_down().await;

        for joined in join_all(self.tasks).await {
            if let Err(e) = joined {
                warn!(error = %e, "controller task ended abnormally");
            }
        }
        info!("snapshot controller stopped");
    }
}

/// Queue every cached snapshot and content. Returns the number of keys
/// handed to the queues.
///
/// # Errors
///
/// Returns a cache error if a store cannot be read.
pub async fn enqueue_all(reconciler: &Reconciler) -> Result<usize> {
    let snapshots = reconciler.cache().snapshots.list()?;
    let contents = reconciler.cache().contents.list()?;

    for snapshot in &snapshots {
        reconciler.snapshot_queue().add(snapshot.key()).await;
    }
    for content in &contents {
        reconciler.content_queue().add(content.key()).await;
    }
    Ok(snapshots.len() + contents.len())
}

async fn run_worker(
    reconciler: Arc<Reconciler>,
    kind: QueueKind,
    worker: usize,
    requeue_delay: Duration,
) {
    let queue = Arc::clone(kind.queue(&reconciler));
    debug!(queue = queue.name(), worker, "worker started");

    while let Some(key) = queue.get().await {
        let result = match kind {
            QueueKind::Snapshots => reconciler.sync_snapshot_by_key(&key).await,
            QueueKind::Contents => reconciler.sync_content_by_key(&key).await,
        };
        queue.done(&key).await;

        match result {
            Ok(()) => debug!(queue = queue.name(), key = %key, "synced"),
            Err(e) if e.is_retryable() => {
                warn!(queue = queue.name(), key = %key, error = %e, "sync failed, requeueing");
                queue.add_after(key, requeue_delay);
            }
            Err(e) => {
                error!(queue = queue.name(), key = %key, error = %e, "sync failed permanently");
            }
        }
    }

    debug!(queue = queue.name(), worker, "worker stopped");
}

async fn run_resync(
    reconciler: Arc<Reconciler>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match enqueue_all(&reconciler).await {
                    Ok(count) => debug!(count, "resync queued cached records"),
                    Err(e) => warn!(error = %e, "resync failed"),
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    debug!("resync stopped");
                    return;
                }
            }
        }
    }
}
