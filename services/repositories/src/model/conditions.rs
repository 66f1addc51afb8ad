//! Status conditions reported by the reconciler.
//!
//! # Purpose
//! Conditions are the only channel through which asynchronous progress is
//! reported back on an object. Repositories read them; only the reconciler
//! writes them.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_STAGING: &str = "Staging";
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(condition_type: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = reason.into();
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.condition_type == condition_type)
}

pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type)
        .is_some_and(|condition| condition.status == ConditionStatus::True)
}

pub fn is_condition_false(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type)
        .is_some_and(|condition| condition.status == ConditionStatus::False)
}

/// Insert or replace a condition, keeping the transition time when the status
/// does not change.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|existing| existing.condition_type == condition.condition_type)
    {
        Some(existing) => {
            let transition = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = condition;
            existing.last_transition_time = transition;
        }
        None => conditions.push(condition),
    }
}
