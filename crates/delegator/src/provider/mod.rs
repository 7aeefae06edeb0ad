//! Built-in providers.

pub mod dummy;

pub use dummy::{DummyConfig, DummyProvider};
