//! Remote error classification
//!
//! Every remote-call failure passes through [`ErrorClassifier::classify`]
//! before it leaves the engine. The engine never sleeps on the result; the
//! backoff is a hint for the external scheduler.

use std::collections::BTreeSet;
use std::time::Duration;

use converge_common::{EngineConfig, RemoteError};

/// The resource already has an asynchronous operation in flight
pub const RESOURCE_IN_USE_EXCEPTION: &str = "ResourceInUseException";

/// Remote codes no amount of retrying will fix
pub const TERMINAL_CODES: &[&str] = &[
    "ResourceLimitExceeded",
    "ResourceNotFound",
    "ResourceInUse",
    "OptInRequired",
    "InvalidParameterCombination",
    "InvalidParameterValue",
    "InvalidParameterException",
    "InvalidQueryParameter",
    "MalformedQueryString",
    "MissingAction",
    "MissingParameter",
    "ValidationError",
    "AccessDeniedException",
];

/// What kind of failure a remote error represents
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Needs a user change; stop retrying
    Terminal,
    /// Raced an in-flight operation; retry shortly
    TransientConflict,
    /// Not recognised; propagate unchanged
    Unknown,
}

/// Classification plus the suggested delay before the next attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDirective {
    /// Failure category
    pub classification: Classification,
    /// Suggested delay; only set for transient conflicts
    pub backoff: Option<Duration>,
}

/// Maps remote error codes to retry directives
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    conflict_codes: BTreeSet<String>,
    terminal_codes: BTreeSet<String>,
    conflict_backoff: Duration,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl ErrorClassifier {
    /// Classifier using the built-in code lists plus configured extras
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            conflict_codes: BTreeSet::from([RESOURCE_IN_USE_EXCEPTION.to_string()]),
            terminal_codes: TERMINAL_CODES
                .iter()
                .map(|c| c.to_string())
                .chain(config.extra_terminal_codes.iter().cloned())
                .collect(),
            conflict_backoff: config.conflict_backoff(),
        }
    }

    /// Classify one remote failure
    pub fn classify(&self, err: &RemoteError) -> RetryDirective {
        if self.conflict_codes.contains(&err.code) {
            RetryDirective {
                classification: Classification::TransientConflict,
                backoff: Some(self.conflict_backoff),
            }
        } else if self.terminal_codes.contains(&err.code) {
            RetryDirective {
                classification: Classification::Terminal,
                backoff: None,
            }
        } else {
            RetryDirective {
                classification: Classification::Unknown,
                backoff: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::in_flight_update("ResourceInUseException", Classification::TransientConflict)]
    #[case::bad_parameter("InvalidParameterException", Classification::Terminal)]
    #[case::limit("ResourceLimitExceeded", Classification::Terminal)]
    #[case::validation("ValidationError", Classification::Terminal)]
    #[case::permission("AccessDeniedException", Classification::Terminal)]
    #[case::in_use_without_suffix("ResourceInUse", Classification::Terminal)]
    #[case::throttled("ThrottlingException", Classification::Unknown)]
    #[case::server("ServerException", Classification::Unknown)]
    fn classifies_codes(#[case] code: &str, #[case] expected: Classification) {
        let directive = ErrorClassifier::default().classify(&RemoteError::new(code, "message"));
        assert_eq!(directive.classification, expected);
    }

    #[test]
    fn only_conflicts_carry_a_backoff() {
        let classifier = ErrorClassifier::default();
        let conflict = classifier.classify(&RemoteError::new(RESOURCE_IN_USE_EXCEPTION, "busy"));
        assert_eq!(conflict.backoff, Some(Duration::from_secs(15)));

        let terminal = classifier.classify(&RemoteError::new("ValidationError", "bad"));
        assert_eq!(terminal.backoff, None);
    }

    #[test]
    fn configured_codes_extend_the_terminal_list() {
        let config = EngineConfig {
            extra_terminal_codes: vec!["UnsupportedAvailabilityZoneException".to_string()],
            conflict_backoff_secs: 5,
            ..Default::default()
        };
        let classifier = ErrorClassifier::new(&config);

        let directive = classifier.classify(&RemoteError::new(
            "UnsupportedAvailabilityZoneException",
            "us-east-1e",
        ));
        assert_eq!(directive.classification, Classification::Terminal);

        let conflict = classifier.classify(&RemoteError::new(RESOURCE_IN_USE_EXCEPTION, "busy"));
        assert_eq!(conflict.backoff, Some(Duration::from_secs(5)));
    }
}
