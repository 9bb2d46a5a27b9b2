//! Reconcile and finalize entry points
//!
//! These wrap a remediation pass with the describe call and handle the two
//! cases the orchestrator never sees: a resource that does not exist yet
//! and a resource that should go away.

use converge_common::metrics::{record_verdict, OperationKind};
use converge_common::Result;
use tracing::{debug, info, instrument};

use crate::delta::Delta;
use crate::kind::ResourceKind;
use crate::orchestrator::{Desired, Orchestrator, Remediation};
use crate::remote::{CallError, Observed};
use crate::status::Phase;
use crate::verdict::RemediationVerdict;

impl<K: ResourceKind> Orchestrator<K> {
    /// Describe the resource, create it if missing, otherwise remediate
    #[instrument(
        skip(self, desired),
        fields(kind = K::KIND, resource = %K::resource_id(&desired.spec))
    )]
    pub async fn reconcile(&self, desired: &Desired<K::Spec>) -> Result<Remediation<K::Spec>> {
        let observed = match self.describe(desired).await? {
            Described::Found(observed) => observed,
            Described::Missing => return self.create(desired).await,
            Described::Failed(verdict) => {
                return Ok(self.without_remote(desired, verdict, None));
            }
        };
        self.remediate(desired, &observed).await
    }

    /// Delete the resource and report progress until it is gone
    #[instrument(
        skip(self, desired),
        fields(kind = K::KIND, resource = %K::resource_id(&desired.spec))
    )]
    pub async fn finalize(&self, desired: &Desired<K::Spec>) -> Result<RemediationVerdict> {
        let observed = match self.describe(desired).await? {
            Described::Found(observed) => observed,
            Described::Missing => {
                debug!("resource is gone");
                return Ok(RemediationVerdict::Converged);
            }
            Described::Failed(verdict) => return Ok(verdict),
        };

        let phase = self.status.classify(observed.status.as_deref());
        if self.status.is_deleting(phase.as_ref()) {
            return Ok(RemediationVerdict::wait(
                format!("{} is currently being deleted", K::KIND),
                self.config.wait_backoff(),
            ));
        }

        let operation = K::OPERATIONS.delete;
        let result = self.remote.delete(&K::resource_id(&desired.spec)).await;
        self.metrics
            .record(OperationKind::Delete, operation, result.as_ref().err());
        let verdict = match result {
            Ok(()) => {
                info!("deletion requested");
                RemediationVerdict::wait(
                    format!("{} deletion requested", K::KIND),
                    self.config.wait_backoff(),
                )
            }
            Err(source) => self.call_failed(CallError { operation, source })?,
        };
        record_verdict(K::KIND, verdict.label());
        Ok(verdict)
    }

    async fn describe(&self, desired: &Desired<K::Spec>) -> Result<Described<K::Spec>> {
        let operation = K::OPERATIONS.describe;
        let result = self.remote.describe(&K::resource_id(&desired.spec)).await;
        self.metrics
            .record(OperationKind::ReadOne, operation, result.as_ref().err());
        Ok(match result {
            Ok(Some(observed)) => Described::Found(observed),
            Ok(None) => Described::Missing,
            Err(source) => Described::Failed(self.call_failed(CallError { operation, source })?),
        })
    }

    async fn create(&self, desired: &Desired<K::Spec>) -> Result<Remediation<K::Spec>> {
        if desired.known_arn.is_some() {
            // Created by an earlier pass; describe can lag behind create
            let verdict = RemediationVerdict::wait(
                format!("{} was created but is not visible yet", K::KIND),
                self.config.wait_backoff(),
            );
            return Ok(self.without_remote(desired, verdict, Some(Phase::Creating)));
        }

        let operation = K::OPERATIONS.create;
        let result = self.remote.create(&desired.spec).await;
        self.metrics
            .record(OperationKind::Create, operation, result.as_ref().err());
        match result {
            Ok(arn) => {
                info!(arn = arn.as_deref().unwrap_or("unknown"), "creation requested");
                let mut remediation = self.without_remote(
                    desired,
                    RemediationVerdict::applied("create"),
                    Some(Phase::Creating),
                );
                if arn.is_some() {
                    remediation.resource.arn = arn;
                }
                Ok(remediation)
            }
            Err(source) => {
                let verdict = self.call_failed(CallError { operation, source })?;
                Ok(self.without_remote(desired, verdict, None))
            }
        }
    }

    fn without_remote(
        &self,
        desired: &Desired<K::Spec>,
        verdict: RemediationVerdict,
        status: Option<Phase>,
    ) -> Remediation<K::Spec> {
        record_verdict(K::KIND, verdict.label());
        Remediation {
            verdict,
            delta: Delta::new(),
            resource: Observed {
                spec: desired.spec.clone(),
                status: status.map(|p| p.to_string()),
                arn: desired.known_arn.clone(),
                tags: None,
            },
        }
    }
}

enum Described<S> {
    Found(Observed<S>),
    Missing,
    Failed(RemediationVerdict),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use converge_common::metrics::{InMemoryMetricsRecorder, RecordedCall};
    use converge_common::RemoteError;

    use crate::classify::RESOURCE_IN_USE_EXCEPTION;
    use crate::remote::testing::FakeRemote;
    use crate::remote::MockTagApi;
    use crate::resources::addon::{Addon, AddonSpec};
    use crate::resources::StringMap;

    const ARN: &str = "arn:aws:eks:us-west-2:123456789012:addon/prod/coredns/abc";

    fn coredns() -> AddonSpec {
        AddonSpec {
            name: "coredns".to_string(),
            cluster_name: "prod".to_string(),
            addon_version: Some("v1.11.1-eksbuild.9".to_string()),
            ..Default::default()
        }
    }

    fn live(status: &str) -> Observed<AddonSpec> {
        Observed::new(coredns(), Some(status), Some(ARN)).with_tags(StringMap::new())
    }

    fn orchestrator(
        remote: Arc<FakeRemote<Addon>>,
        metrics: Arc<InMemoryMetricsRecorder>,
    ) -> Orchestrator<Addon> {
        Orchestrator::builder(remote, Arc::new(MockTagApi::new()))
            .metrics(metrics)
            .build()
    }

    fn set_observed(remote: &FakeRemote<Addon>, observed: Option<Observed<AddonSpec>>) {
        *remote.observed.lock().expect("mutex should not be poisoned") = observed;
    }

    mod reconcile {
        use super::*;

        /// Story: a new addon is created, reported as creating, and then
        /// converges once the remote says it is active
        #[tokio::test]
        async fn story_create_then_converge() {
            let remote = Arc::new(FakeRemote::<Addon>::new(None).assigning_arn(ARN));
            let metrics = Arc::new(InMemoryMetricsRecorder::default());
            let orchestrator = orchestrator(remote.clone(), metrics.clone());
            let desired = Desired::new(coredns());

            let first = orchestrator.reconcile(&desired).await.expect("pass succeeds");
            assert_eq!(first.verdict, RemediationVerdict::applied("create"));
            assert_eq!(first.resource.status.as_deref(), Some("CREATING"));
            assert_eq!(first.resource.arn.as_deref(), Some(ARN));
            assert_eq!(
                remote.created.lock().expect("mutex should not be poisoned").len(),
                1
            );

            set_observed(&remote, Some(live("CREATING")));
            let desired = match first.resource.arn {
                Some(arn) => desired.with_known_arn(arn),
                None => desired,
            };
            let second = orchestrator.reconcile(&desired).await.expect("pass succeeds");
            assert!(matches!(second.verdict, RemediationVerdict::Wait { .. }));

            set_observed(&remote, Some(live("ACTIVE")));
            let third = orchestrator.reconcile(&desired).await.expect("pass succeeds");
            assert_eq!(third.verdict, RemediationVerdict::Converged);
            assert_eq!(third.resource.arn.as_deref(), Some(ARN));

            let calls = metrics.calls();
            let operations: Vec<&str> = calls.iter().map(|c| c.operation.as_str()).collect();
            assert_eq!(
                operations,
                vec!["DescribeAddon", "CreateAddon", "DescribeAddon", "DescribeAddon"]
            );
        }

        /// Story: describe lags behind create; the ARN from the first pass
        /// keeps the second pass from creating again
        #[tokio::test]
        async fn story_lagging_describe_does_not_recreate() {
            let remote = Arc::new(FakeRemote::<Addon>::new(None).assigning_arn(ARN));
            let orchestrator = orchestrator(remote.clone(), Arc::default());
            let desired = Desired::new(coredns());

            let first = orchestrator.reconcile(&desired).await.expect("pass succeeds");
            assert_eq!(first.verdict, RemediationVerdict::applied("create"));
            let arn = first.resource.arn.expect("create reports the ARN");

            let second = orchestrator
                .reconcile(&desired.with_known_arn(arn))
                .await
                .expect("pass succeeds");

            assert_eq!(
                second.verdict,
                RemediationVerdict::wait(
                    "Addon was created but is not visible yet",
                    Duration::from_secs(30)
                )
            );
            assert_eq!(second.resource.arn.as_deref(), Some(ARN));
            assert_eq!(
                remote.created.lock().expect("mutex should not be poisoned").len(),
                1
            );
        }

        #[tokio::test]
        async fn recorded_arn_waits_instead_of_recreating() {
            let remote = Arc::new(FakeRemote::<Addon>::new(None));
            let orchestrator = orchestrator(remote.clone(), Arc::default());

            let result = orchestrator
                .reconcile(&Desired::new(coredns()).with_known_arn(ARN))
                .await
                .expect("pass succeeds");

            assert_eq!(
                result.verdict,
                RemediationVerdict::wait(
                    "Addon was created but is not visible yet",
                    Duration::from_secs(30)
                )
            );
            assert!(remote.created.lock().expect("mutex should not be poisoned").is_empty());
        }

        #[tokio::test]
        async fn rejected_create_is_terminal() {
            let remote = Arc::new(FakeRemote::<Addon>::new(None).failing_with(RemoteError::new(
                "InvalidParameterException",
                "addon version not supported",
            )));
            let metrics = Arc::new(InMemoryMetricsRecorder::default());
            let orchestrator = orchestrator(remote, metrics.clone());

            let result = orchestrator
                .reconcile(&Desired::new(coredns()))
                .await
                .expect("pass succeeds");

            assert_eq!(
                result.verdict,
                RemediationVerdict::terminal(
                    "CreateAddon was rejected (InvalidParameterException): addon version not supported"
                )
            );
            assert_eq!(result.resource.status, None);
            assert_eq!(
                metrics.calls().last().and_then(|c| c.error_code.clone()).as_deref(),
                Some("InvalidParameterException")
            );
        }

        #[tokio::test]
        async fn unknown_create_failure_propagates() {
            let remote = Arc::new(
                FakeRemote::<Addon>::new(None)
                    .failing_with(RemoteError::new("ServiceUnavailable", "try later")),
            );
            let orchestrator = orchestrator(remote, Arc::default());

            let err = orchestrator
                .reconcile(&Desired::new(coredns()))
                .await
                .expect_err("unknown failures are not verdicts");

            assert!(err.is_retryable());
        }
    }

    mod finalize {
        use super::*;

        #[tokio::test]
        async fn missing_resource_is_converged() {
            let remote = Arc::new(FakeRemote::<Addon>::new(None));
            let orchestrator = orchestrator(remote.clone(), Arc::default());

            let verdict = orchestrator
                .finalize(&Desired::new(coredns()))
                .await
                .expect("pass succeeds");

            assert_eq!(verdict, RemediationVerdict::Converged);
            assert!(remote.deleted.lock().expect("mutex should not be poisoned").is_empty());
        }

        #[tokio::test]
        async fn deleting_resource_is_not_deleted_again() {
            let remote = Arc::new(FakeRemote::<Addon>::new(Some(live("DELETING"))));
            let orchestrator = orchestrator(remote.clone(), Arc::default());

            let verdict = orchestrator
                .finalize(&Desired::new(coredns()))
                .await
                .expect("pass succeeds");

            assert_eq!(
                verdict,
                RemediationVerdict::wait("Addon is currently being deleted", Duration::from_secs(30))
            );
            assert!(remote.deleted.lock().expect("mutex should not be poisoned").is_empty());
        }

        /// Story: delete is requested once, then the pass waits for the
        /// resource to disappear
        #[tokio::test]
        async fn story_delete_until_gone() {
            let remote = Arc::new(FakeRemote::<Addon>::new(Some(live("ACTIVE"))));
            let metrics = Arc::new(InMemoryMetricsRecorder::default());
            let orchestrator = orchestrator(remote.clone(), metrics.clone());
            let desired = Desired::new(coredns());

            let first = orchestrator.finalize(&desired).await.expect("pass succeeds");
            assert!(matches!(first, RemediationVerdict::Wait { .. }));
            assert_eq!(
                remote.deleted.lock().expect("mutex should not be poisoned").len(),
                1
            );

            set_observed(&remote, None);
            let second = orchestrator.finalize(&desired).await.expect("pass succeeds");
            assert_eq!(second, RemediationVerdict::Converged);

            assert_eq!(
                metrics.calls()[1],
                RecordedCall {
                    kind: OperationKind::Delete,
                    operation: "DeleteAddon".to_string(),
                    error_code: None,
                }
            );
        }

        #[tokio::test]
        async fn resource_in_use_waits_with_conflict_backoff() {
            let remote = Arc::new(
                FakeRemote::<Addon>::new(Some(live("ACTIVE"))).failing_with(RemoteError::new(
                    RESOURCE_IN_USE_EXCEPTION,
                    "addon is still in use",
                )),
            );
            let orchestrator = orchestrator(remote, Arc::default());

            let verdict = orchestrator
                .finalize(&Desired::new(coredns()))
                .await
                .expect("pass succeeds");

            assert_eq!(
                verdict,
                RemediationVerdict::wait(
                    "DeleteAddon conflicts with an operation in progress: addon is still in use",
                    Duration::from_secs(15)
                )
            );
        }
    }
}
