//! Metrics for converge observability
//!
//! Provides OpenTelemetry metrics for:
//! - Remote API calls (kind, operation, outcome)
//! - Remediation verdicts per resource kind
//! - Remediation pass duration
//!
//! Instruments hang off the global meter, so they export through whatever
//! meter provider the host process installs.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::error::RemoteError;

/// Global meter for converge metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("converge"));

// ============================================================================
// Remote API Metrics
// ============================================================================

/// Counter of remote API calls
///
/// Labels:
/// - `kind`: READ_ONE, READ_MANY, CREATE, UPDATE, DELETE
/// - `operation`: remote operation name (e.g. UpdateNodegroupConfig)
/// - `outcome`: success, error
/// - `code`: remote error code, empty on success
pub static REMOTE_CALLS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("converge_remote_calls_total")
        .with_description("Total number of remote resource API calls")
        .with_unit("{calls}")
        .build()
});

// ============================================================================
// Remediation Metrics
// ============================================================================

/// Counter of remediation verdicts
///
/// Labels:
/// - `resource_kind`: Cluster, Nodegroup, Addon, AccessEntry, FargateProfile
/// - `verdict`: wait, terminal, applied, converged
pub static VERDICTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("converge_verdicts_total")
        .with_description("Total number of remediation verdicts by kind")
        .with_unit("{verdicts}")
        .build()
});

/// Histogram of remediation pass duration
///
/// Labels:
/// - `resource_kind`: resource kind
/// - `result`: success, error
pub static REMEDIATION_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("converge_remediation_duration_seconds")
        .with_description("Duration of a remediation pass in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Kind of remote operation, used as the `kind` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Describe a single resource
    ReadOne,
    /// List a collection (e.g. current tags)
    ReadMany,
    /// Create a resource
    Create,
    /// Update some part of a resource
    Update,
    /// Delete a resource
    Delete,
}

impl OperationKind {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOne => "READ_ONE",
            Self::ReadMany => "READ_MANY",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observes remote calls. Invoked once per call, never changes behavior.
pub trait MetricsRecorder: Send + Sync {
    /// Record the outcome of one remote call
    fn record(&self, kind: OperationKind, operation: &str, error: Option<&RemoteError>);
}

/// Recorder backed by the OpenTelemetry instruments above
#[derive(Clone, Debug, Default)]
pub struct OtelMetricsRecorder;

impl MetricsRecorder for OtelMetricsRecorder {
    fn record(&self, kind: OperationKind, operation: &str, error: Option<&RemoteError>) {
        let (outcome, code) = match error {
            Some(err) => ("error", err.code.clone()),
            None => ("success", String::new()),
        };
        REMOTE_CALLS.add(
            1,
            &[
                KeyValue::new("kind", kind.as_str()),
                KeyValue::new("operation", operation.to_string()),
                KeyValue::new("outcome", outcome),
                KeyValue::new("code", code),
            ],
        );
    }
}

/// Recorder that drops everything
#[derive(Clone, Debug, Default)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn record(&self, _kind: OperationKind, _operation: &str, _error: Option<&RemoteError>) {}
}

/// One call seen by [`InMemoryMetricsRecorder`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    /// Operation kind
    pub kind: OperationKind,
    /// Remote operation name
    pub operation: String,
    /// Error code, if the call failed
    pub error_code: Option<String>,
}

/// Recorder that keeps calls in memory, for tests and local debugging
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetricsRecorder {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl InMemoryMetricsRecorder {
    /// Calls recorded so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl MetricsRecorder for InMemoryMetricsRecorder {
    fn record(&self, kind: OperationKind, operation: &str, error: Option<&RemoteError>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                kind,
                operation: operation.to_string(),
                error_code: error.map(|e| e.code.clone()),
            });
        }
    }
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a verdict for a resource kind
pub fn record_verdict(resource_kind: &str, verdict: &str) {
    VERDICTS.add(
        1,
        &[
            KeyValue::new("resource_kind", resource_kind.to_string()),
            KeyValue::new("verdict", verdict.to_string()),
        ],
    );
}

/// Times one remediation pass
pub struct RemediationTimer {
    resource_kind: &'static str,
    start: Instant,
}

impl RemediationTimer {
    /// Start timing a remediation pass
    pub fn start(resource_kind: &'static str) -> Self {
        Self {
            resource_kind,
            start: Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        self.finish("success");
    }

    /// Record error completion
    pub fn error(self) {
        self.finish("error");
    }

    fn finish(self, result: &'static str) {
        REMEDIATION_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("resource_kind", self.resource_kind),
                KeyValue::new("result", result),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_labels_match_remote_conventions() {
        assert_eq!(OperationKind::ReadOne.as_str(), "READ_ONE");
        assert_eq!(OperationKind::ReadMany.as_str(), "READ_MANY");
        assert_eq!(OperationKind::Create.as_str(), "CREATE");
        assert_eq!(OperationKind::Update.to_string(), "UPDATE");
        assert_eq!(OperationKind::Delete.as_str(), "DELETE");
    }

    #[test]
    fn recorders_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OtelMetricsRecorder>();
        assert_send_sync::<NoopMetricsRecorder>();
    }

    /// Recording without an installed meter provider must be harmless
    #[test]
    fn otel_recorder_works_without_provider() {
        let recorder = OtelMetricsRecorder;
        recorder.record(OperationKind::Update, "UpdateClusterVersion", None);
        recorder.record(
            OperationKind::Update,
            "UpdateClusterVersion",
            Some(&RemoteError::new("ResourceInUseException", "busy")),
        );
        record_verdict("Cluster", "applied");
        RemediationTimer::start("Cluster").success();
        RemediationTimer::start("Cluster").error();
    }

    #[test]
    fn in_memory_recorder_keeps_call_order() {
        let recorder = InMemoryMetricsRecorder::default();
        recorder.record(OperationKind::ReadMany, "ListTagsForResource", None);
        recorder.record(
            OperationKind::Update,
            "TagResource",
            Some(&RemoteError::new("ResourceInUseException", "busy")),
        );

        let calls = recorder.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, "ListTagsForResource");
        assert_eq!(calls[0].error_code, None);
        assert_eq!(calls[1].kind, OperationKind::Update);
        assert_eq!(calls[1].error_code.as_deref(), Some("ResourceInUseException"));
    }
}
