//! Kubernetes-style status conditions
//!
//! Remediation verdicts are surfaced as a `Synced` condition plus a
//! `Terminal` condition, following Kubernetes API conventions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting whether desired and observed state agree
pub const CONDITION_SYNCED: &str = "Synced";

/// Condition type reporting that remediation stopped for good
pub const CONDITION_TERMINAL: &str = "Terminal";

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (Synced, Terminal)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Same type, status, reason and message, ignoring the timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Whether `next` would change anything in `current`
///
/// Used to skip status writes that only bump timestamps.
pub fn conditions_changed(current: &[Condition], next: &[Condition]) -> bool {
    if current.len() != next.len() {
        return true;
    }
    next.iter().any(|n| {
        !current
            .iter()
            .any(|c| c.type_ == n.type_ && c.same_state(n))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kubernetes_field_names() {
        let cond = Condition::new(CONDITION_SYNCED, ConditionStatus::True, "Converged", "ok");
        let json = serde_json::to_value(&cond).expect("serializable");
        assert_eq!(json["type"], "Synced");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn timestamps_do_not_count_as_changes() {
        let a = vec![Condition::new(
            CONDITION_SYNCED,
            ConditionStatus::False,
            "Wait",
            "resource is being deleted",
        )];
        let mut b = a.clone();
        b[0].last_transition_time = Utc::now() + chrono::Duration::seconds(60);
        assert!(!conditions_changed(&a, &b));

        b[0].message = "resource in state CREATING".to_string();
        assert!(conditions_changed(&a, &b));
    }

    #[test]
    fn added_condition_is_a_change() {
        let synced = Condition::new(CONDITION_SYNCED, ConditionStatus::False, "Terminal", "x");
        let terminal = Condition::new(CONDITION_TERMINAL, ConditionStatus::True, "Terminal", "x");
        assert!(conditions_changed(
            std::slice::from_ref(&synced),
            &[synced.clone(), terminal]
        ));
    }
}
