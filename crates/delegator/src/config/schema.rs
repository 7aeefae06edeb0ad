use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::{Backoff, ControllerConfig, ReconcilerConfig, DEFAULT_FINALIZER};
use crate::provider::DummyConfig;
use crate::resource::ConditionState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatorConfig {
    #[serde(default = "default_finalizer")]
    pub finalizer: String,
    #[serde(default = "default_requeue_floor_secs")]
    pub requeue_floor_secs: u64,
    /// Condition state recorded for plugin states this build does not know.
    #[serde(default)]
    pub unknown_plugin_state: ConditionState,
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_error_backoff_base_ms")]
    pub error_backoff_base_ms: u64,
    #[serde(default = "default_error_backoff_max_secs")]
    pub error_backoff_max_secs: u64,
    /// SQLite database file. The in-memory store is used when absent.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_watch_poll_interval_ms")]
    pub watch_poll_interval_ms: u64,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub dummy_provision_delay_ms: u64,
}

fn default_finalizer() -> String {
    DEFAULT_FINALIZER.to_string()
}

fn default_requeue_floor_secs() -> u64 {
    2
}

fn default_max_concurrent_reconciles() -> usize {
    2
}

fn default_wait_timeout_secs() -> u64 {
    300
}

fn default_error_backoff_base_ms() -> u64 {
    500
}

fn default_error_backoff_max_secs() -> u64 {
    300
}

fn default_watch_poll_interval_ms() -> u64 {
    500
}

impl Default for DelegatorConfig {
    fn default() -> Self {
        Self {
            finalizer: default_finalizer(),
            requeue_floor_secs: default_requeue_floor_secs(),
            unknown_plugin_state: ConditionState::Pending,
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            wait_timeout_secs: default_wait_timeout_secs(),
            error_backoff_base_ms: default_error_backoff_base_ms(),
            error_backoff_max_secs: default_error_backoff_max_secs(),
            database: None,
            watch_poll_interval_ms: default_watch_poll_interval_ms(),
            region: None,
            dummy_provision_delay_ms: 0,
        }
    }
}

impl DelegatorConfig {
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            finalizer: self.finalizer.clone(),
            requeue_floor: Duration::from_secs(self.requeue_floor_secs),
            unknown_state: self.unknown_plugin_state,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.max_concurrent_reconciles,
            backoff: Backoff {
                base: Duration::from_millis(self.error_backoff_base_ms),
                max: Duration::from_secs(self.error_backoff_max_secs),
            },
        }
    }

    pub fn dummy_config(&self) -> DummyConfig {
        DummyConfig {
            region: self.region.clone(),
            provision_delay: Duration::from_millis(self.dummy_provision_delay_ms),
            wait_timeout: Some(self.wait_timeout()),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_interval_ms)
    }
}
