//! Stage constructors and repository-backed stage implementations.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, FutureExt};

use super::{
    ConditionFn, ConvertFn, MutateFn, PropagateFn, ResolveSourceFn, ResolveTargetFn, WaitFn,
};
use crate::context::{Context, ContextError};
use crate::error::BoxError;
use crate::repository::{Repository, RepositoryError};
use crate::resource::Object;

// ============================================================================
// Constructors
// ============================================================================

pub fn resolve_source<S, SB, F, Fut>(f: F) -> ResolveSourceFn<S, SB>
where
    F: Fn(Context, S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SB, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx: Context, source: S| f(ctx, source).boxed())
}

pub fn convert<SB, AB, F>(f: F) -> ConvertFn<SB, AB>
where
    F: Fn(&SB) -> Result<AB, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn resolve_target<AB, F, Fut>(f: F) -> ResolveTargetFn<AB>
where
    F: Fn(Context, AB) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AB, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx: Context, target: AB| f(ctx, target).boxed())
}

pub fn mutate<AB, SB, F>(f: F) -> MutateFn<AB, SB>
where
    F: Fn(&mut AB, &SB) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn propagate<AB, F, Fut>(f: F) -> PropagateFn<AB>
where
    F: Fn(Context, AB) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AB, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx: Context, target: AB| f(ctx, target).boxed())
}

pub fn condition<AB, F>(f: F) -> ConditionFn<AB>
where
    F: Fn(&AB) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn wait<AB, F, Fut>(f: F) -> WaitFn<AB>
where
    F: Fn(Context, AB, ConditionFn<AB>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AB, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx: Context, target: AB, condition: ConditionFn<AB>| {
        f(ctx, target, condition).boxed()
    })
}

// ============================================================================
// Bypass stages
// ============================================================================

/// Passes the source through unchanged.
pub fn bypass_resolve_source<S: Send + 'static>() -> ResolveSourceFn<S, S> {
    resolve_source(|_ctx, source: S| future::ready(Ok(source)))
}

/// Passes the converted target through unchanged.
pub fn bypass_resolve_target<AB: Send + 'static>() -> ResolveTargetFn<AB> {
    resolve_target(|_ctx, target: AB| future::ready(Ok(target)))
}

/// Leaves the target as converted.
pub fn bypass_mutate<AB: 'static, SB: 'static>() -> MutateFn<AB, SB> {
    mutate(|_target: &mut AB, _source: &SB| Ok(()))
}

// ============================================================================
// Repository-backed stages
// ============================================================================

/// Replaces the converted target with the stored object when one exists,
/// so that mutate applies changes on top of the current backend state.
pub fn load_existing<T: Object>(repo: Arc<dyn Repository<T>>) -> ResolveTargetFn<T> {
    resolve_target(move |ctx, target: T| load_or_keep(Arc::clone(&repo), ctx, target))
}

pub fn propagate_create<T: Object>(repo: Arc<dyn Repository<T>>) -> PropagateFn<T> {
    propagate(move |ctx: Context, target: T| {
        let repo = Arc::clone(&repo);
        async move { repo.create(&ctx, target).await.map_err(BoxError::from) }
    })
}

pub fn propagate_update<T: Object>(repo: Arc<dyn Repository<T>>) -> PropagateFn<T> {
    propagate(move |ctx: Context, target: T| {
        let repo = Arc::clone(&repo);
        async move { repo.update(&ctx, target).await.map_err(BoxError::from) }
    })
}

/// Creates targets that were never stored, updates the others.
pub fn propagate_apply<T: Object>(repo: Arc<dyn Repository<T>>) -> PropagateFn<T> {
    propagate(move |ctx: Context, target: T| {
        let repo = Arc::clone(&repo);
        async move {
            let written = if target.meta().resource_version == 0 {
                repo.create(&ctx, target).await
            } else {
                repo.update(&ctx, target).await
            };
            written.map_err(BoxError::from)
        }
    })
}

/// Requests deletion. A target that is already gone counts as deleted.
pub fn propagate_delete<T: Object>(repo: Arc<dyn Repository<T>>) -> PropagateFn<T> {
    propagate(move |ctx: Context, target: T| {
        let repo = Arc::clone(&repo);
        async move {
            match repo.delete(&ctx, &target).await {
                Ok(()) => Ok(target),
                Err(e) if e.is_not_found() => Ok(target),
                Err(e) => Err(BoxError::from(e)),
            }
        }
    })
}

/// Waits through [`Repository::wait_until`].
pub fn wait_with<T: Object>(repo: Arc<dyn Repository<T>>) -> WaitFn<T> {
    wait(move |ctx: Context, target: T, condition: ConditionFn<T>| {
        let repo = Arc::clone(&repo);
        async move {
            repo.wait_until(&ctx, &target, &*condition)
                .await
                .map_err(BoxError::from)
        }
    })
}

/// Waits until the target has been removed from the store, returning its
/// final revision. Returns the target itself when it is already absent.
pub fn wait_removed<T: Object>(repo: Arc<dyn Repository<T>>) -> WaitFn<T> {
    wait(move |ctx: Context, target: T, condition: ConditionFn<T>| {
        wait_for_removal(Arc::clone(&repo), ctx, target, condition)
    })
}

async fn load_or_keep<T: Object>(
    repo: Arc<dyn Repository<T>>,
    ctx: Context,
    target: T,
) -> Result<T, BoxError> {
    match repo.load(&ctx, &target.key()).await {
        Ok(existing) => Ok(existing),
        Err(e) if e.is_not_found() => Ok(target),
        Err(e) => Err(e.into()),
    }
}

async fn wait_for_removal<T: Object>(
    repo: Arc<dyn Repository<T>>,
    ctx: Context,
    target: T,
    condition: ConditionFn<T>,
) -> Result<T, BoxError> {
    let key = target.key();
    // Subscribe before probing so a removal between the two is not missed.
    let mut watch = repo.watch(&ctx, &key).await?;
    match repo.load(&ctx, &key).await {
        Err(e) if e.is_not_found() => return Ok(target),
        Err(e) => return Err(e.into()),
        Ok(_) => {}
    }

    while let Some(revision) = watch.recv().await {
        if condition(&revision) {
            return Ok(revision);
        }
    }
    let err = match watch.context_err() {
        Some(ContextError::DeadlineExceeded) => RepositoryError::ConditionTimeout,
        Some(ContextError::Cancelled) => RepositoryError::Cancelled,
        None => RepositoryError::WatchClosed,
    };
    Err(err.into())
}
