//! Delegated operations: a six-stage pipeline that realizes one domain
//! resource against a backend.
//!
//! ```text
//! resolve_source -> convert -> resolve_target -> mutate -> propagate -> wait
//! ```
//!
//! Each stage is an injected function. The pipeline runs them strictly in
//! order and stops at the first error, which is returned tagged with its
//! stage. Nothing is retried here; retries happen through reconcile requeue.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{info_span, Instrument};

use crate::context::Context;
use crate::error::BoxError;

pub mod adapters;
pub mod error;

pub use error::{DelegatedError, Stage};

/// Loads whatever the source needs before conversion.
pub type ResolveSourceFn<S, SB> =
    Arc<dyn Fn(Context, S) -> BoxFuture<'static, Result<SB, BoxError>> + Send + Sync>;

/// Shapes the source bundle into the backend's representation.
pub type ConvertFn<SB, AB> = Arc<dyn Fn(&SB) -> Result<AB, BoxError> + Send + Sync>;

/// Completes the target, e.g. by loading its current backend state.
pub type ResolveTargetFn<AB> =
    Arc<dyn Fn(Context, AB) -> BoxFuture<'static, Result<AB, BoxError>> + Send + Sync>;

/// Applies the desired state from the source onto the target.
pub type MutateFn<AB, SB> = Arc<dyn Fn(&mut AB, &SB) -> Result<(), BoxError> + Send + Sync>;

/// Writes the target to the backend and returns the written revision.
pub type PropagateFn<AB> =
    Arc<dyn Fn(Context, AB) -> BoxFuture<'static, Result<AB, BoxError>> + Send + Sync>;

/// Decides whether the backend reached the desired state.
pub type ConditionFn<AB> = Arc<dyn Fn(&AB) -> bool + Send + Sync>;

/// Blocks until the condition holds for the target.
pub type WaitFn<AB> =
    Arc<dyn Fn(Context, AB, ConditionFn<AB>) -> BoxFuture<'static, Result<AB, BoxError>> + Send + Sync>;

/// A delegated operation over source `S`, source bundle `SB` and target `AB`.
pub struct Delegated<S, SB, AB> {
    resolve_source: ResolveSourceFn<S, SB>,
    convert: ConvertFn<SB, AB>,
    resolve_target: ResolveTargetFn<AB>,
    mutate: MutateFn<AB, SB>,
    propagate: PropagateFn<AB>,
    condition: ConditionFn<AB>,
    wait: WaitFn<AB>,
}

impl<S, SB, AB> Clone for Delegated<S, SB, AB> {
    fn clone(&self) -> Self {
        Self {
            resolve_source: Arc::clone(&self.resolve_source),
            convert: Arc::clone(&self.convert),
            resolve_target: Arc::clone(&self.resolve_target),
            mutate: Arc::clone(&self.mutate),
            propagate: Arc::clone(&self.propagate),
            condition: Arc::clone(&self.condition),
            wait: Arc::clone(&self.wait),
        }
    }
}

impl<S, SB, AB> Delegated<S, SB, AB>
where
    S: Send + 'static,
    SB: Send + Sync + 'static,
    AB: Send + 'static,
{
    pub fn new(
        resolve_source: ResolveSourceFn<S, SB>,
        convert: ConvertFn<SB, AB>,
        resolve_target: ResolveTargetFn<AB>,
        mutate: MutateFn<AB, SB>,
        propagate: PropagateFn<AB>,
        condition: ConditionFn<AB>,
        wait: WaitFn<AB>,
    ) -> Self {
        Self {
            resolve_source,
            convert,
            resolve_target,
            mutate,
            propagate,
            condition,
            wait,
        }
    }

    /// Runs all stages in order. Returns the revision that satisfied the
    /// condition.
    pub async fn perform(&self, ctx: &Context, resource: S) -> Result<AB, DelegatedError> {
        let source = (self.resolve_source)(ctx.clone(), resource)
            .instrument(info_span!("resolve_source"))
            .await
            .map_err(DelegatedError::at(Stage::ResolveSource))?;

        let target = {
            let _stage = info_span!("convert").entered();
            (self.convert)(&source).map_err(DelegatedError::at(Stage::Convert))?
        };

        let mut target = (self.resolve_target)(ctx.clone(), target)
            .instrument(info_span!("resolve_target"))
            .await
            .map_err(DelegatedError::at(Stage::ResolveTarget))?;

        {
            let _stage = info_span!("mutate").entered();
            (self.mutate)(&mut target, &source).map_err(DelegatedError::at(Stage::Mutate))?;
        }

        let written = (self.propagate)(ctx.clone(), target)
            .instrument(info_span!("propagate"))
            .await
            .map_err(DelegatedError::at(Stage::Propagate))?;

        (self.wait)(ctx.clone(), written, Arc::clone(&self.condition))
            .instrument(info_span!("wait"))
            .await
            .map_err(DelegatedError::at(Stage::Wait))
    }
}

impl<S, AB> Delegated<S, S, AB>
where
    S: Send + Sync + 'static,
    AB: Send + 'static,
{
    /// A pipeline whose source needs no resolution and whose target is
    /// propagated as converted.
    pub fn straight(
        convert: ConvertFn<S, AB>,
        mutate: MutateFn<AB, S>,
        propagate: PropagateFn<AB>,
        condition: ConditionFn<AB>,
        wait: WaitFn<AB>,
    ) -> Self {
        Self::new(
            adapters::bypass_resolve_source(),
            convert,
            adapters::bypass_resolve_target(),
            mutate,
            propagate,
            condition,
            wait,
        )
    }
}
