//! Shared test utilities for delegator integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring repositories, plugins and reconcilers over
//!   in-memory or SQLite stores
//! - Builders for domain resources and stub plugins

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
