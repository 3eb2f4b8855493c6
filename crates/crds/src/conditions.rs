//! Cluster API style status conditions
//!
//! Conditions are kept as an ordered list on each status. Setting a condition
//! with an unchanged status keeps its original transition time so repeated
//! reconciles do not produce spurious status writes.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status, serialized as the Kubernetes strings "True"/"False"/"Unknown"
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    #[serde(alias = "true")]
    True,
    #[serde(alias = "false")]
    False,
    #[default]
    #[serde(alias = "unknown")]
    Unknown,
}

/// Severity of a false condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "K8sNodeBootstrapSucceeded")
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    pub status: ConditionStatus,

    /// Severity, only meaningful when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// CamelCase machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn true_condition(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            last_transition_time: Some(Utc::now()),
            reason: None,
            message: None,
        }
    }

    pub fn false_condition(
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
        }
    }

    /// Same status, reason, severity and message; transition time is ignored.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Look up a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::False)
}

/// Reason of the condition of `type_`, if any.
pub fn reason_of<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a str> {
    get_condition(conditions, type_).and_then(|c| c.reason.as_deref())
}

/// Insert or replace a condition.
///
/// Returns `true` if the list changed. When the status is unchanged the
/// existing transition time is kept.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.same_state(&condition) {
                return false;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

pub fn mark_true(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    set_condition(conditions, Condition::true_condition(type_))
}

pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) -> bool {
    set_condition(
        conditions,
        Condition::false_condition(type_, reason, severity, message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_keeps_transition_time_on_same_status() {
        let mut conditions = Vec::new();
        assert!(mark_false(
            &mut conditions,
            "Ready",
            "Waiting",
            ConditionSeverity::Info,
            ""
        ));
        let first = conditions[0].last_transition_time;

        // Same state: no change
        assert!(!mark_false(
            &mut conditions,
            "Ready",
            "Waiting",
            ConditionSeverity::Info,
            ""
        ));

        // Different reason, same status: transition time preserved
        assert!(mark_false(
            &mut conditions,
            "Ready",
            "Other",
            ConditionSeverity::Warning,
            "details"
        ));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(reason_of(&conditions, "Ready"), Some("Other"));
    }

    #[test]
    fn test_mark_true_flips_status() {
        let mut conditions = Vec::new();
        mark_false(&mut conditions, "Ready", "Waiting", ConditionSeverity::Info, "");
        assert!(is_false(&conditions, "Ready"));
        assert!(mark_true(&mut conditions, "Ready"));
        assert!(is_true(&conditions, "Ready"));
        assert_eq!(conditions[0].reason, None);
    }

    #[test]
    fn test_condition_wire_format() {
        let condition = Condition::false_condition(
            "BYOHostReady",
            "BYOHostsUnavailable",
            ConditionSeverity::Info,
            "",
        );
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "BYOHostReady");
        assert_eq!(json["status"], "False");
        assert_eq!(json["severity"], "Info");
        assert!(json.get("message").is_none());
        assert!(json.get("lastTransitionTime").is_some());
    }
}
