//! Remote lifecycle status classification
//!
//! The remote API reports status as a string (`ACTIVE`, `CREATE_FAILED`, ...).
//! [`Phase`] is the closed set of states the engine understands and
//! [`StatusClassifier`] carries, per resource kind, which of them are
//! terminal. Nothing here performs transitions; it only classifies a snapshot.

use std::fmt;
use std::str::FromStr;

use converge_common::EngineConfig;

/// Lifecycle phase of a remote resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Being created
    Creating,
    /// Ready for modification
    Active,
    /// An asynchronous update is in flight
    Updating,
    /// Being deleted
    Deleting,
    /// Running with reduced health
    Degraded,
    /// Creation failed
    CreateFailed,
    /// Deletion failed
    DeleteFailed,
    /// An update failed
    UpdateFailed,
    /// Generic failure (clusters)
    Failed,
    /// Accepted but not yet started
    Pending,
    /// A status string the engine doesn't recognise
    Unknown(String),
}

impl Phase {
    /// Remote spelling of the phase
    pub fn as_remote_str(&self) -> &str {
        match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::Degraded => "DEGRADED",
            Self::CreateFailed => "CREATE_FAILED",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::Failed => "FAILED",
            Self::Pending => "PENDING",
            Self::Unknown(raw) => raw,
        }
    }
}

impl FromStr for Phase {
    type Err = std::convert::Infallible;

    /// Case and separator insensitive: `CREATE_FAILED`, `CreateFailed`
    /// and `create-failed` all parse the same
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Ok(match normalized.as_str() {
            "CREATING" => Self::Creating,
            "ACTIVE" => Self::Active,
            "UPDATING" => Self::Updating,
            "DELETING" => Self::Deleting,
            "DEGRADED" => Self::Degraded,
            "CREATEFAILED" => Self::CreateFailed,
            "DELETEFAILED" => Self::DeleteFailed,
            "UPDATEFAILED" => Self::UpdateFailed,
            "FAILED" => Self::Failed,
            "PENDING" => Self::Pending,
            _ => Self::Unknown(s.to_string()),
        })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_remote_str())
    }
}

/// Per-kind classification of observed status strings
#[derive(Clone, Debug)]
pub struct StatusClassifier {
    kind: &'static str,
    terminal: Vec<Phase>,
    absent: Option<Phase>,
}

impl StatusClassifier {
    /// Classifier for a kind whose terminal set is `terminal`
    pub fn new(kind: &'static str, terminal: &[Phase]) -> Self {
        Self {
            kind,
            terminal: terminal.to_vec(),
            absent: None,
        }
    }

    /// Classifier for a kind with no remote lifecycle; it is always Active
    pub fn always_active(kind: &'static str) -> Self {
        Self {
            kind,
            terminal: Vec::new(),
            absent: Some(Phase::Active),
        }
    }

    /// Add or remove Degraded from the terminal set
    pub fn with_degraded_terminal(mut self, terminal: bool) -> Self {
        self.terminal.retain(|p| *p != Phase::Degraded);
        if terminal {
            self.terminal.push(Phase::Degraded);
        }
        self
    }

    /// Apply the engine's per-kind overrides
    pub fn configured(self, config: &EngineConfig) -> Self {
        let degraded = config.degraded_is_terminal(self.kind);
        self.with_degraded_terminal(degraded)
    }

    /// Resource kind this classifier is for
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Classify a status snapshot; `None` means the remote reported none
    pub fn classify(&self, status: Option<&str>) -> Option<Phase> {
        match status {
            Some(raw) if !raw.is_empty() => raw.parse().ok(),
            _ => self.absent.clone(),
        }
    }

    /// Resource accepts modifications
    pub fn is_active(&self, phase: Option<&Phase>) -> bool {
        matches!(phase, Some(Phase::Active))
    }

    /// Resource is going away
    pub fn is_deleting(&self, phase: Option<&Phase>) -> bool {
        matches!(phase, Some(Phase::Deleting))
    }

    /// No automated remediation is possible from this phase
    pub fn is_terminal(&self, phase: Option<&Phase>) -> bool {
        phase.is_some_and(|p| self.terminal.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::screaming("CREATE_FAILED", Phase::CreateFailed)]
    #[case::pascal("CreateFailed", Phase::CreateFailed)]
    #[case::kebab("delete-failed", Phase::DeleteFailed)]
    #[case::active("ACTIVE", Phase::Active)]
    #[case::degraded("Degraded", Phase::Degraded)]
    #[case::unknown("RESIZING", Phase::Unknown("RESIZING".to_string()))]
    fn parses_remote_spellings(#[case] raw: &str, #[case] expected: Phase) {
        assert_eq!(raw.parse::<Phase>().ok(), Some(expected));
    }

    #[test]
    fn display_uses_remote_spelling() {
        assert_eq!(Phase::UpdateFailed.to_string(), "UPDATE_FAILED");
        assert_eq!(Phase::Unknown("Resizing".into()).to_string(), "Resizing");
    }

    /// Story: terminal membership differs per resource kind
    #[test]
    fn degraded_terminality_is_per_kind() {
        let terminal = [Phase::CreateFailed, Phase::UpdateFailed, Phase::DeleteFailed];
        let config = EngineConfig {
            degraded_terminal_kinds: vec!["Addon".to_string()],
            ..Default::default()
        };

        let addon = StatusClassifier::new("Addon", &terminal).configured(&config);
        let nodegroup = StatusClassifier::new("Nodegroup", &terminal).configured(&config);

        let degraded = addon.classify(Some("DEGRADED"));
        assert!(addon.is_terminal(degraded.as_ref()));
        assert!(!nodegroup.is_terminal(degraded.as_ref()));
    }

    #[test]
    fn predicates_on_snapshots() {
        let classifier =
            StatusClassifier::new("Nodegroup", &[Phase::CreateFailed, Phase::DeleteFailed]);

        let active = classifier.classify(Some("ACTIVE"));
        assert!(classifier.is_active(active.as_ref()));
        assert!(!classifier.is_deleting(active.as_ref()));
        assert!(!classifier.is_terminal(active.as_ref()));

        let deleting = classifier.classify(Some("DELETING"));
        assert!(classifier.is_deleting(deleting.as_ref()));

        let failed = classifier.classify(Some("CREATE_FAILED"));
        assert!(classifier.is_terminal(failed.as_ref()));
        assert!(!classifier.is_active(failed.as_ref()));
    }

    #[test]
    fn missing_status_is_neither_active_nor_terminal() {
        let classifier = StatusClassifier::new("Cluster", &[Phase::Failed]);
        assert_eq!(classifier.classify(None), None);
        assert_eq!(classifier.classify(Some("")), None);
        assert!(!classifier.is_active(None));
        assert!(!classifier.is_terminal(None));
    }

    #[test]
    fn statusless_kinds_are_always_active() {
        let classifier = StatusClassifier::always_active("AccessEntry");
        let phase = classifier.classify(None);
        assert!(classifier.is_active(phase.as_ref()));
    }

    #[test]
    fn degraded_override_can_be_removed() {
        let classifier = StatusClassifier::new("Addon", &[Phase::Degraded])
            .with_degraded_terminal(false);
        assert!(!classifier.is_terminal(Some(&Phase::Degraded)));
    }
}
