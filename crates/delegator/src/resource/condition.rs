//! Status conditions and their upsert rules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONDITION_VALIDATED: &str = "Validated";
pub const CONDITION_READY: &str = "Ready";

/// Per-provider conditions are keyed `Provider:<plugin name>`.
pub const PROVIDER_CONDITION_PREFIX: &str = "Provider:";

pub fn provider_condition_type(plugin: &str) -> String {
    format!("{}{}", PROVIDER_CONDITION_PREFIX, plugin)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionState {
    #[default]
    Pending,
    Active,
    Error,
    Deleting,
}

impl fmt::Display for ConditionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionState::Pending => write!(f, "Pending"),
            ConditionState::Active => write!(f, "Active"),
            ConditionState::Error => write!(f, "Error"),
            ConditionState::Deleting => write!(f, "Deleting"),
        }
    }
}

impl std::str::FromStr for ConditionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ConditionState::Pending),
            "active" => Ok(ConditionState::Active),
            "error" => Ok(ConditionState::Error),
            "deleting" => Ok(ConditionState::Deleting),
            _ => Err(format!("Unknown condition state: {}", s)),
        }
    }
}

/// A named, timestamped observation along one axis of a resource's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub state: ConditionState,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_at: DateTime<Utc>,
}

impl StatusCondition {
    pub fn new(
        condition_type: impl Into<String>,
        state: ConditionState,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            state,
            reason: reason.into(),
            message: message.into(),
            last_transition_at: Utc::now(),
        }
    }
}

/// Observed state of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub state: ConditionState,
    /// Generation the status was computed from.
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StatusCondition>,
}

impl ResourceStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&StatusCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn set_condition(&mut self, condition: StatusCondition) {
        upsert_condition(&mut self.conditions, condition);
    }
}

/// Inserts or replaces the condition with the same type.
///
/// The previous `last_transition_at` is kept when the state did not change.
pub fn upsert_condition(conditions: &mut Vec<StatusCondition>, mut condition: StatusCondition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.state == condition.state {
                condition.last_transition_at = existing.last_transition_at;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}
