//! Update orchestrator
//!
//! One remediation pass for one resource. The pass looks at the observed
//! lifecycle status, syncs tags, computes the delta and then applies the
//! first update group the delta touches. At most one category of change is
//! sent per pass; the next pass re-reads the resource and continues.
//!
//! The orchestrator holds no state between passes. Two passes for the same
//! resource must never run concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use converge_common::metrics::{
    record_verdict, MetricsRecorder, OperationKind, OtelMetricsRecorder, RemediationTimer,
};
use converge_common::{Annotations, EngineConfig, Error, RemoteError, Result};
use tracing::{debug, info, instrument, warn};

use crate::classify::{Classification, ErrorClassifier};
use crate::delta::{Delta, DeltaComputer};
use crate::kind::{GroupPlan, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::{CallError, Observed, RemoteApi, TagApi};
use crate::status::{Phase, StatusClassifier};
use crate::tags::{read_tags, sync_tags};
use crate::verdict::RemediationVerdict;

/// User-declared target state of one resource
#[derive(Clone, Debug, PartialEq)]
pub struct Desired<S> {
    /// Desired spec
    pub spec: S,
    /// Out-of-band signals attached to the object
    pub annotations: Annotations,
    /// ARN recorded by an earlier pass, if the resource was created
    pub known_arn: Option<String>,
}

impl<S> Desired<S> {
    /// Desired state without annotations or a recorded ARN
    pub fn new(spec: S) -> Self {
        Self {
            spec,
            annotations: Annotations::default(),
            known_arn: None,
        }
    }

    /// Attach annotations
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// Record the ARN of an already-created resource
    pub fn with_known_arn(mut self, arn: impl Into<String>) -> Self {
        self.known_arn = Some(arn.into());
        self
    }
}

/// Result of one remediation pass
#[derive(Clone, Debug, PartialEq)]
pub struct Remediation<S> {
    /// What happened
    pub verdict: RemediationVerdict,
    /// Delta the pass acted on (empty when it stopped before diffing)
    pub delta: Delta,
    /// Desired spec merged with observed identity and status
    pub resource: Observed<S>,
}

/// Build the state handed back to the caller
///
/// The spec comes from `desired`, identity and status from `observed`. When
/// an asynchronous update was just sent the status is `UPDATING`, so the
/// caller does not act on a stale `ACTIVE`.
pub fn merge_observed<S: Clone>(
    desired: &Desired<S>,
    observed: &Observed<S>,
    transitioning: bool,
) -> Observed<S> {
    let status = if transitioning {
        Some(Phase::Updating.to_string())
    } else {
        observed.status.clone()
    };
    Observed {
        spec: desired.spec.clone(),
        status,
        arn: observed.arn.clone().or_else(|| desired.known_arn.clone()),
        tags: observed.tags.clone(),
    }
}

/// Drives remediation passes for one resource kind
pub struct Orchestrator<K: ResourceKind> {
    pub(crate) remote: Arc<dyn RemoteApi<K>>,
    pub(crate) tags: Arc<dyn TagApi>,
    pub(crate) metrics: Arc<dyn MetricsRecorder>,
    pub(crate) errors: ErrorClassifier,
    pub(crate) status: StatusClassifier,
    delta: DeltaComputer<K::Spec>,
    groups: Vec<UpdateGroup<K>>,
    pub(crate) config: EngineConfig,
}

/// Builder for [`Orchestrator`]
///
/// ```text
/// let orchestrator = Orchestrator::<Nodegroup>::builder(remote, tags)
///     .config(EngineConfig::from_env(&OsEnv)?)
///     .build();
/// ```
pub struct OrchestratorBuilder<K: ResourceKind> {
    remote: Arc<dyn RemoteApi<K>>,
    tags: Arc<dyn TagApi>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    config: EngineConfig,
}

impl<K: ResourceKind> OrchestratorBuilder<K> {
    /// Override the metrics recorder (defaults to OpenTelemetry)
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Engine configuration (defaults to [`EngineConfig::default`])
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> Orchestrator<K> {
        Orchestrator {
            remote: self.remote,
            tags: self.tags,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(OtelMetricsRecorder)),
            errors: ErrorClassifier::new(&self.config),
            status: K::status_classifier().configured(&self.config),
            delta: K::delta_computer(),
            groups: K::update_groups(),
            config: self.config,
        }
    }
}

impl<K: ResourceKind> Orchestrator<K> {
    /// Create a builder around the remote and tag APIs
    pub fn builder(remote: Arc<dyn RemoteApi<K>>, tags: Arc<dyn TagApi>) -> OrchestratorBuilder<K> {
        OrchestratorBuilder {
            remote,
            tags,
            metrics: None,
            config: EngineConfig::default(),
        }
    }

    /// Engine configuration in effect
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Delta between desired and observed, after post-compare policies
    pub fn delta(&self, desired: &Desired<K::Spec>, observed: &Observed<K::Spec>) -> Delta {
        self.delta
            .compute(&desired.spec, &observed.spec, &desired.annotations)
    }

    /// Run one remediation pass against an already-described resource
    #[instrument(
        skip(self, desired, observed),
        fields(kind = K::KIND, resource = %K::resource_id(&desired.spec))
    )]
    pub async fn remediate(
        &self,
        desired: &Desired<K::Spec>,
        observed: &Observed<K::Spec>,
    ) -> Result<Remediation<K::Spec>> {
        let timer = RemediationTimer::start(K::KIND);
        let result = self.remediate_pass(desired, observed).await;
        match &result {
            Ok(remediation) => {
                timer.success();
                record_verdict(K::KIND, remediation.verdict.label());
                info!(verdict = %remediation.verdict, "remediation pass finished");
            }
            Err(err) => {
                timer.error();
                warn!(error = %err, "remediation pass failed");
            }
        }
        result
    }

    async fn remediate_pass(
        &self,
        desired: &Desired<K::Spec>,
        observed: &Observed<K::Spec>,
    ) -> Result<Remediation<K::Spec>> {
        let done = |verdict, delta| conclude::<K>(desired, observed, verdict, delta);

        let phase = self.status.classify(observed.status.as_deref());
        if self.status.is_deleting(phase.as_ref()) {
            debug!(status = ?phase, "resource is being deleted");
            return Ok(done(
                RemediationVerdict::wait(
                    format!("{} is currently being deleted", K::KIND),
                    self.config.wait_backoff(),
                ),
                Delta::new(),
            ));
        }
        if !self.status.is_active(phase.as_ref()) {
            let status = observed.status.as_deref().unwrap_or("unknown");
            let verdict = if self.status.is_terminal(phase.as_ref()) {
                RemediationVerdict::terminal(format!("{} is in '{}' status", K::KIND, status))
            } else {
                RemediationVerdict::wait(
                    format!(
                        "{} in '{}' state, cannot be modified until '{}'",
                        K::KIND,
                        status,
                        Phase::Active
                    ),
                    self.config.wait_backoff(),
                )
            };
            debug!(status, verdict = %verdict, "resource is not active");
            return Ok(done(verdict, Delta::new()));
        }

        let synced_tags = match self.sync_resource_tags(desired, observed).await {
            Ok(tags) => tags,
            Err(failure) => return self.call_failed(failure).map(|v| done(v, Delta::new())),
        };

        let delta = self.delta(desired, observed);
        let mut remediation = self.apply_first_group(desired, observed, delta).await?;
        if let Some(tags) = synced_tags {
            remediation.resource.tags = Some(tags);
        }
        Ok(remediation)
    }

    /// Walk the update groups; the first group with something to send wins
    async fn apply_first_group(
        &self,
        desired: &Desired<K::Spec>,
        observed: &Observed<K::Spec>,
        delta: Delta,
    ) -> Result<Remediation<K::Spec>> {
        let finish = |verdict, delta| conclude::<K>(desired, observed, verdict, delta);

        if delta.is_empty() {
            debug!("desired and observed agree");
            return Ok(finish(RemediationVerdict::Converged, delta));
        }
        debug!(delta = %delta, "computed delta");

        let input = PlanInput {
            desired: &desired.spec,
            observed: &observed.spec,
            delta: &delta,
            annotations: &desired.annotations,
        };
        if let Some(reason) = K::check_delta(&input) {
            warn!(reason = %reason, "rejecting delta");
            return Ok(finish(RemediationVerdict::terminal(reason), delta));
        }

        for group in self.groups.iter().filter(|g| g.matches(&delta)) {
            let calls = match (group.plan)(&input) {
                GroupPlan::Skip => {
                    debug!(category = group.category, "nothing to send for group");
                    continue;
                }
                GroupPlan::Terminal(reason) => {
                    warn!(category = group.category, reason = %reason, "invalid transition");
                    return Ok(finish(RemediationVerdict::terminal(reason), delta));
                }
                GroupPlan::Calls(calls) => calls,
            };

            let id = K::resource_id(&desired.spec);
            for update in &calls {
                let operation = K::update_operation(update);
                let result = self.remote.update(&id, update).await;
                self.metrics
                    .record(OperationKind::Update, operation, result.as_ref().err());
                match result {
                    Ok(()) => {}
                    Err(err) if K::is_benign_update_error(update, &err) => {
                        debug!(operation, error = %err, "remote reports nothing to change");
                    }
                    Err(source) => {
                        let verdict = self.call_failed(CallError { operation, source })?;
                        return Ok(finish(verdict, delta));
                    }
                }
            }

            info!(category = group.category, calls = calls.len(), "applied update group");
            return Ok(finish(RemediationVerdict::applied(group.category), delta));
        }

        debug!(delta = %delta, "no update group has anything to send");
        Ok(finish(RemediationVerdict::Converged, delta))
    }

    /// Sync tags against the observed ARN; returns the tags now on the
    /// resource, or `None` when nothing was read or written
    async fn sync_resource_tags(
        &self,
        desired: &Desired<K::Spec>,
        observed: &Observed<K::Spec>,
    ) -> std::result::Result<Option<BTreeMap<String, String>>, CallFailure> {
        let want = K::tags(&desired.spec).cloned().unwrap_or_default();
        if observed.tags.as_ref() == Some(&want) {
            return Ok(None);
        }

        let arn = observed.arn.as_deref().ok_or_else(|| {
            CallFailure::Internal(Error::internal_with_context(
                "tags",
                format!("{} {} has no ARN", K::KIND, K::resource_id(&desired.spec)),
            ))
        })?;

        let have = match &observed.tags {
            Some(tags) => tags.clone(),
            None => read_tags(self.tags.as_ref(), self.metrics.as_ref(), arn).await?,
        };
        let outcome = sync_tags(self.tags.as_ref(), self.metrics.as_ref(), arn, &want, &have).await?;
        if !outcome.is_noop() {
            info!(
                written = outcome.written.len(),
                removed = outcome.removed.len(),
                "synchronized tags"
            );
        }
        Ok(Some(want))
    }

    /// Turn a classified call failure into a verdict, or propagate it
    pub(crate) fn call_failed(&self, failure: impl Into<CallFailure>) -> Result<RemediationVerdict> {
        let CallError { operation, source } = match failure.into() {
            CallFailure::Call(call) => call,
            CallFailure::Internal(err) => return Err(err),
        };
        let directive = self.errors.classify(&source);
        match directive.classification {
            Classification::TransientConflict => {
                debug!(operation, code = %source.code, "operation already in flight");
                Ok(RemediationVerdict::wait(
                    format!("{operation} conflicts with an operation in progress: {}", source.message),
                    directive.backoff.unwrap_or(self.config.conflict_backoff()),
                ))
            }
            Classification::Terminal => {
                warn!(operation, code = %source.code, "remote rejected the request");
                Ok(RemediationVerdict::terminal(terminal_message(operation, &source)))
            }
            Classification::Unknown => Err(Error::remote(operation, source)),
        }
    }
}

/// Package a verdict; async kinds report UPDATING after an applied update
fn conclude<K: ResourceKind>(
    desired: &Desired<K::Spec>,
    observed: &Observed<K::Spec>,
    verdict: RemediationVerdict,
    delta: Delta,
) -> Remediation<K::Spec> {
    let transitioning = K::ASYNC_UPDATES && matches!(verdict, RemediationVerdict::Applied { .. });
    Remediation {
        verdict,
        delta,
        resource: merge_observed(desired, observed, transitioning),
    }
}

fn terminal_message(operation: &str, err: &RemoteError) -> String {
    format!("{operation} was rejected ({}): {}", err.code, err.message)
}

/// Why a step that talks to the remote stopped
#[derive(Debug)]
pub(crate) enum CallFailure {
    /// A remote call failed and needs classification
    Call(CallError),
    /// The engine could not even make the call
    Internal(Error),
}

impl From<CallError> for CallFailure {
    fn from(err: CallError) -> Self {
        Self::Call(err)
    }
}
