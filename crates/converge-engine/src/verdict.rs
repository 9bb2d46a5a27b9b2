//! Remediation verdicts and how they reach the cluster
//!
//! A verdict is the single outcome of one remediation pass. It maps onto a
//! pair of status conditions and onto a requeue decision for the
//! controller runtime.

use std::fmt;
use std::time::Duration;

use converge_common::condition::{CONDITION_SYNCED, CONDITION_TERMINAL};
use converge_common::{Condition, ConditionStatus, EngineConfig, Error};
use kube::runtime::controller::Action;
use tracing::{error, warn};

/// Requeue delay after an unexpected error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Outcome of one remediation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemediationVerdict {
    /// The resource is busy; try again later
    Wait {
        /// Why we are waiting
        reason: String,
        /// Suggested delay before the next pass
        retry_after: Duration,
    },
    /// Needs user intervention; do not retry until the spec changes
    Terminal {
        /// Message for the user
        reason: String,
    },
    /// One category of update was sent
    Applied {
        /// Update group that was applied
        category: String,
    },
    /// Desired and observed agree
    Converged,
}

impl RemediationVerdict {
    /// Wait with the given reason
    pub fn wait(reason: impl Into<String>, retry_after: Duration) -> Self {
        Self::Wait {
            reason: reason.into(),
            retry_after,
        }
    }

    /// Terminal with the given message
    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
        }
    }

    /// Applied for the given category
    pub fn applied(category: impl Into<String>) -> Self {
        Self::Applied {
            category: category.into(),
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Wait { .. } => "wait",
            Self::Terminal { .. } => "terminal",
            Self::Applied { .. } => "applied",
            Self::Converged => "converged",
        }
    }

    /// Whether remediation gave up for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }

    /// `Synced` and `Terminal` conditions describing this verdict
    pub fn conditions(&self) -> Vec<Condition> {
        let (synced, reason, message) = match self {
            Self::Converged => (ConditionStatus::True, "Converged", String::new()),
            Self::Applied { category } => (
                ConditionStatus::False,
                "UpdateInProgress",
                format!("applied {category} update"),
            ),
            Self::Wait { reason, .. } => (ConditionStatus::False, "Waiting", reason.clone()),
            Self::Terminal { reason } => (ConditionStatus::False, "Terminal", reason.clone()),
        };

        let terminal = match self {
            Self::Terminal { reason } => Condition::new(
                CONDITION_TERMINAL,
                ConditionStatus::True,
                "TerminalError",
                reason.clone(),
            ),
            _ => Condition::new(CONDITION_TERMINAL, ConditionStatus::False, "NoError", ""),
        };

        vec![
            Condition::new(CONDITION_SYNCED, synced, reason, message),
            terminal,
        ]
    }

    /// Requeue decision for the controller runtime
    pub fn to_action(&self, config: &EngineConfig) -> Action {
        match self {
            Self::Wait { retry_after, .. } => Action::requeue(*retry_after),
            Self::Applied { .. } => Action::requeue(config.async_update_requeue()),
            Self::Converged => Action::requeue(config.resync_period()),
            Self::Terminal { .. } => Action::await_change(),
        }
    }
}

impl fmt::Display for RemediationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait {
                reason,
                retry_after,
            } => write!(f, "wait {}s: {}", retry_after.as_secs(), reason),
            Self::Terminal { reason } => write!(f, "terminal: {reason}"),
            Self::Applied { category } => write!(f, "applied {category}"),
            Self::Converged => f.write_str("converged"),
        }
    }
}

/// Requeue decision after a pass returned an error
///
/// Retryable errors come back quickly. Everything else waits for the object
/// to change, since a retry would fail the same way.
pub fn error_policy(err: &Error) -> Action {
    if err.is_retryable() {
        warn!(error = %err, "remediation failed, will retry");
        Action::requeue(ERROR_REQUEUE)
    } else {
        error!(error = %err, "remediation failed permanently");
        Action::await_change()
    }
}
