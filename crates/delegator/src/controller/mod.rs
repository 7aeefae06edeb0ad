//! Reconciliation controller: per-resource state machine, work queue and
//! worker pool.

pub mod error;
pub mod queue;
pub mod reconciler;
pub mod runtime;

pub use error::ReconcileError;
pub use queue::{Backoff, WorkQueue};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcileResult, DEFAULT_FINALIZER};
pub use runtime::{Controller, ControllerConfig};
