//! Simulated backend. Completes provisioning and deprovisioning of volumes
//! after a configurable delay.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::volume::{is_ready, Volume, PROVISIONER_FINALIZER};
use crate::context::Context;
use crate::repository::{Repository, RepositoryError, Watch};
use crate::resource::{ConditionState, ObjectKey, StatusCondition};

const MAX_ATTEMPTS: usize = 3;

pub(crate) struct Provisioner {
    volumes: Arc<dyn Repository<Volume>>,
    delay: Duration,
}

impl Provisioner {
    pub(crate) fn new(volumes: Arc<dyn Repository<Volume>>, delay: Duration) -> Self {
        Self { volumes, delay }
    }

    pub(crate) async fn run(self, ctx: Context, mut watch: Watch<Volume>) {
        info!("Dummy provisioner started");
        while let Some(volume) = watch.recv().await {
            let key = volume.metadata.key();
            match self.handle(&ctx, volume).await {
                Ok(()) => {}
                Err(RepositoryError::Cancelled) | Err(RepositoryError::DeadlineExceeded) => break,
                Err(e) => warn!("Failed to settle volume {}: {}", key, e),
            }
        }
        info!("Dummy provisioner stopped");
    }

    async fn handle(&self, ctx: &Context, volume: Volume) -> Result<(), RepositoryError> {
        let meta = &volume.metadata;
        if meta.is_removed() {
            return Ok(());
        }
        if meta.is_terminating() {
            if meta.has_finalizer(PROVISIONER_FINALIZER) {
                self.settle(ctx).await?;
                self.release(ctx, &meta.key()).await?;
            }
            return Ok(());
        }
        if !is_ready(&volume) {
            self.settle(ctx).await?;
            self.provision(ctx, &meta.key()).await?;
        }
        Ok(())
    }

    async fn settle(&self, ctx: &Context) -> Result<(), RepositoryError> {
        if self.delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            err = ctx.done() => Err(err.into()),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        }
    }

    async fn provision(&self, ctx: &Context, key: &ObjectKey) -> Result<(), RepositoryError> {
        for _ in 0..MAX_ATTEMPTS {
            let Some(mut volume) = self.latest(ctx, key).await? else {
                return Ok(());
            };
            if volume.metadata.is_terminating() || is_ready(&volume) {
                return Ok(());
            }
            let generation = volume.metadata.generation;
            let size = volume.spec.size_gb;
            let status = volume.status_mut();
            status.state = ConditionState::Active;
            status.observed_generation = generation;
            status.set_condition(StatusCondition::new(
                "Provisioned",
                ConditionState::Active,
                "Provisioned",
                format!("{}GB allocated", size),
            ));
            match self.volumes.update_status(ctx, volume).await {
                Ok(_) => {
                    debug!("Provisioned volume {} at generation {}", key, generation);
                    return Ok(());
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        warn!("Gave up provisioning volume {} after {} conflicts", key, MAX_ATTEMPTS);
        Ok(())
    }

    async fn release(&self, ctx: &Context, key: &ObjectKey) -> Result<(), RepositoryError> {
        for _ in 0..MAX_ATTEMPTS {
            let Some(mut volume) = self.latest(ctx, key).await? else {
                return Ok(());
            };
            if !volume.metadata.remove_finalizer(PROVISIONER_FINALIZER) {
                return Ok(());
            }
            match self.volumes.update(ctx, volume).await {
                Ok(_) => {
                    debug!("Released volume {}", key);
                    return Ok(());
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        warn!("Gave up releasing volume {} after {} conflicts", key, MAX_ATTEMPTS);
        Ok(())
    }

    async fn latest(&self, ctx: &Context, key: &ObjectKey) -> Result<Option<Volume>, RepositoryError> {
        match self.volumes.load(ctx, key).await {
            Ok(volume) => Ok(Some(volume)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
