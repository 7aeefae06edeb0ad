//! Pipeline stage attribution for errors.

use std::fmt;

use thiserror::Error;

use crate::error::BoxError;

/// The six stages of a delegated operation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveSource,
    Convert,
    ResolveTarget,
    Mutate,
    Propagate,
    Wait,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ResolveSource => write!(f, "resolve_source"),
            Stage::Convert => write!(f, "convert"),
            Stage::ResolveTarget => write!(f, "resolve_target"),
            Stage::Mutate => write!(f, "mutate"),
            Stage::Propagate => write!(f, "propagate"),
            Stage::Wait => write!(f, "wait"),
        }
    }
}

/// The first stage error of a delegated operation. The original error is
/// kept intact and can be downcast.
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct DelegatedError {
    pub stage: Stage,
    #[source]
    pub source: BoxError,
}

impl DelegatedError {
    pub fn new(stage: Stage, source: BoxError) -> Self {
        Self { stage, source }
    }

    /// Adapter for `map_err`.
    pub(crate) fn at(stage: Stage) -> impl FnOnce(BoxError) -> Self {
        move |source| Self::new(stage, source)
    }

    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}
