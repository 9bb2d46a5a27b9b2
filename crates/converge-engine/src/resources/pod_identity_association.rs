//! Pod identity association binding
//!
//! An association is addressed by cluster, namespace and service account.
//! Hosts resolve the remote association id from those three; when the
//! lookup matches anything other than exactly one association, describe
//! reports the resource as missing. Associations have no lifecycle status
//! and update synchronously.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor};
use crate::kind::{immutable_changes, GroupPlan, Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::StatusClassifier;

use super::StringMap;

const IMMUTABLE: &[&str] = &["clusterName", "namespace", "serviceAccount"];

/// Remote operation names
pub mod operations {
    /// Roles and session tag setting
    pub const UPDATE_POD_IDENTITY_ASSOCIATION: &str = "UpdatePodIdentityAssociation";
}

/// Desired/observed pod identity association
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentityAssociationSpec {
    /// Owning cluster
    pub cluster_name: String,
    /// Namespace of the service account
    pub namespace: String,
    /// Service account the pods run as
    pub service_account: String,
    /// Role the pods assume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Role chained from `role_arn`, for cross-account access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role_arn: Option<String>,
    /// Skip the default session tags on assumed credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_session_tags: Option<bool>,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

/// `UpdatePodIdentityAssociation` payload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodIdentityAssociationUpdate {
    /// Owning cluster
    pub cluster_name: String,
    /// Namespace of the service account
    pub namespace: String,
    /// Service account
    pub service_account: String,
    /// Desired role
    pub role_arn: Option<String>,
    /// Desired target role
    pub target_role_arn: Option<String>,
    /// Desired session tag setting
    pub disable_session_tags: Option<bool>,
}

fn plan_association(
    input: &PlanInput<'_, PodIdentityAssociationSpec>,
) -> GroupPlan<PodIdentityAssociationUpdate> {
    let d = input.desired;
    GroupPlan::Calls(vec![PodIdentityAssociationUpdate {
        cluster_name: d.cluster_name.clone(),
        namespace: d.namespace.clone(),
        service_account: d.service_account.clone(),
        role_arn: d.role_arn.clone(),
        target_role_arn: d.target_role_arn.clone(),
        disable_session_tags: d.disable_session_tags,
    }])
}

/// Binding for pod identity associations
pub struct PodIdentityAssociation;

impl ResourceKind for PodIdentityAssociation {
    type Spec = PodIdentityAssociationSpec;
    type Update = PodIdentityAssociationUpdate;

    const KIND: &'static str = "PodIdentityAssociation";
    const OPERATIONS: Operations = Operations {
        describe: "DescribePodIdentityAssociation",
        create: "CreatePodIdentityAssociation",
        delete: "DeletePodIdentityAssociation",
    };
    const ASYNC_UPDATES: bool = false;

    fn status_classifier() -> StatusClassifier {
        StatusClassifier::always_active(Self::KIND)
    }

    fn delta_computer() -> DeltaComputer<PodIdentityAssociationSpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new(
                "clusterName",
                |s: &PodIdentityAssociationSpec| json(&s.cluster_name),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "namespace",
                |s: &PodIdentityAssociationSpec| json(&s.namespace),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "serviceAccount",
                |s: &PodIdentityAssociationSpec| json(&s.service_account),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "roleArn",
                |s: &PodIdentityAssociationSpec| json(&s.role_arn),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "targetRoleArn",
                |s: &PodIdentityAssociationSpec| json(&s.target_role_arn),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "disableSessionTags",
                |s: &PodIdentityAssociationSpec| json(&s.disable_session_tags),
                Equality::Scalar,
            ),
        ])
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        vec![UpdateGroup {
            category: "association",
            paths: &["roleArn", "targetRoleArn", "disableSessionTags"],
            plan: plan_association,
        }]
    }

    fn resource_id(spec: &PodIdentityAssociationSpec) -> ResourceId {
        ResourceId::child(
            &spec.cluster_name,
            format!("{}/{}", spec.namespace, spec.service_account),
        )
    }

    fn tags(spec: &PodIdentityAssociationSpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(_update: &PodIdentityAssociationUpdate) -> &'static str {
        operations::UPDATE_POD_IDENTITY_ASSOCIATION
    }

    fn check_delta(input: &PlanInput<'_, PodIdentityAssociationSpec>) -> Option<String> {
        immutable_changes(input.delta, IMMUTABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use converge_common::metrics::InMemoryMetricsRecorder;

    use crate::orchestrator::{Desired, Orchestrator, Remediation};
    use crate::remote::testing::FakeRemote;
    use crate::remote::{MockTagApi, Observed};
    use crate::verdict::RemediationVerdict;

    const ARN: &str =
        "arn:aws:eks:us-west-2:123456789012:podidentityassociation/prod/a-1234567890abcdefg";
    const ROLE: &str = "arn:aws:iam::123456789012:role/s3-reader";

    fn reader() -> PodIdentityAssociationSpec {
        PodIdentityAssociationSpec {
            cluster_name: "prod".to_string(),
            namespace: "apps".to_string(),
            service_account: "reader".to_string(),
            role_arn: Some(ROLE.to_string()),
            ..Default::default()
        }
    }

    fn orchestrator(
        remote: Arc<FakeRemote<PodIdentityAssociation>>,
        tags: MockTagApi,
    ) -> Orchestrator<PodIdentityAssociation> {
        Orchestrator::builder(remote, Arc::new(tags))
            .metrics(Arc::new(InMemoryMetricsRecorder::default()))
            .build()
    }

    async fn remediate(
        desired: PodIdentityAssociationSpec,
        observed: PodIdentityAssociationSpec,
    ) -> (Remediation<PodIdentityAssociationSpec>, Vec<PodIdentityAssociationUpdate>) {
        let remote = Arc::new(FakeRemote::<PodIdentityAssociation>::new(None));
        let observed = Observed::new(observed, None, Some(ARN)).with_tags(StringMap::new());
        let result = orchestrator(remote.clone(), MockTagApi::new())
            .remediate(&Desired::new(desired), &observed)
            .await
            .expect("pass succeeds");
        (result, remote.updates())
    }

    #[test]
    fn resource_id_combines_namespace_and_service_account() {
        assert_eq!(
            PodIdentityAssociation::resource_id(&reader()).to_string(),
            "prod/apps/reader"
        );
    }

    /// Story: the team moves the service account to a cross-account role;
    /// one synchronous update carries both roles
    #[tokio::test]
    async fn story_role_change_updates_in_one_call() {
        let mut desired = reader();
        desired.target_role_arn = Some("arn:aws:iam::210987654321:role/s3-reader".to_string());

        let (result, updates) = remediate(desired.clone(), reader()).await;

        assert_eq!(result.verdict, RemediationVerdict::applied("association"));
        assert_eq!(result.resource.status, None);
        assert_eq!(
            updates,
            vec![PodIdentityAssociationUpdate {
                cluster_name: "prod".to_string(),
                namespace: "apps".to_string(),
                service_account: "reader".to_string(),
                role_arn: Some(ROLE.to_string()),
                target_role_arn: desired.target_role_arn,
                disable_session_tags: None,
            }]
        );
    }

    #[tokio::test]
    async fn unset_session_tag_flag_equals_false() {
        let mut observed = reader();
        observed.disable_session_tags = Some(false);

        let (result, updates) = remediate(reader(), observed).await;

        assert_eq!(result.verdict, RemediationVerdict::Converged);
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn moving_to_another_service_account_is_terminal() {
        let mut desired = reader();
        desired.service_account = "writer".to_string();

        let (result, updates) = remediate(desired, reader()).await;

        assert_eq!(
            result.verdict,
            RemediationVerdict::terminal("Immutable spec fields have been modified: serviceAccount")
        );
        assert!(updates.is_empty());
    }

    #[tokio::test]
    async fn tags_sync_against_the_association_arn() {
        let mut tags = MockTagApi::new();
        tags.expect_untag_resource()
            .withf(|arn, keys| arn == ARN && keys == ["stale".to_string()])
            .times(1)
            .returning(|_, _| Ok(()));

        let mut desired = reader();
        desired.tags = Some(StringMap::new());
        let observed = Observed::new(reader(), None, Some(ARN))
            .with_tags(StringMap::from([("stale".to_string(), "yes".to_string())]));

        let remote = Arc::new(FakeRemote::<PodIdentityAssociation>::new(None));
        let result = orchestrator(remote, tags)
            .remediate(&Desired::new(desired), &observed)
            .await
            .expect("pass succeeds");

        assert_eq!(result.verdict, RemediationVerdict::Converged);
    }
}
