//! Drives a [`Reconciler`] from the change feed with a bounded worker pool.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::task::JoinSet;

use super::queue::{Backoff, WorkQueue};
use super::{ReconcileError, Reconciler};
use crate::context::Context;
use crate::pagination::{ListParams, Paginator};
use crate::resource::{DomainSpec, Object, ObjectKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub workers: usize,
    pub backoff: Backoff,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            backoff: Backoff::default(),
        }
    }
}

pub struct Controller<S: DomainSpec> {
    reconciler: Arc<Reconciler<S>>,
    queue: Arc<WorkQueue>,
    workers: usize,
}

impl<S: DomainSpec> Controller<S> {
    pub fn new(reconciler: Reconciler<S>, config: ControllerConfig) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue: WorkQueue::new(config.backoff),
            workers: config.workers.max(1),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Runs until `ctx` is done. Every existing object is reconciled once on
    /// startup; afterwards reconciles are driven by change events and
    /// requeues.
    pub async fn run(self, ctx: Context) -> Result<(), ReconcileError> {
        let repo = Arc::clone(self.reconciler.repository());

        // Subscribe before listing so that nothing written in between is lost.
        let mut watch = repo.watch(&ctx, &ObjectKey::default()).await?;
        let existing = Paginator::new(repo.as_ref(), ListParams::new()).collect_all(&ctx).await?;
        info!("Queued {} existing {} objects", existing.len(), S::KIND);
        for obj in &existing {
            self.queue.add(obj.key());
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&self.queue),
                Arc::clone(&self.reconciler),
                ctx.clone(),
            ));
        }
        info!("Started {} workers for {}", self.workers, S::KIND);

        while let Some(obj) = watch.recv().await {
            self.queue.add(obj.key());
        }
        if !ctx.is_done() {
            warn!("Change feed for {} closed unexpectedly", S::KIND);
        }

        self.queue.shutdown();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker panicked: {}", e);
            }
        }
        info!("All workers have stopped");
        Ok(())
    }
}

async fn run_worker<S: DomainSpec>(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler<S>>,
    ctx: Context,
) {
    debug!("Worker {} started", worker_id);

    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&ctx, &key).await {
            Ok(result) => {
                queue.forget(&key);
                if let Some(after) = result.requeue_after {
                    queue.add_after(key.clone(), after);
                }
            }
            Err(e) => {
                warn!("Worker {} failed to reconcile {}: {}", worker_id, key, e);
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }

    debug!("Worker {} stopped", worker_id);
}
