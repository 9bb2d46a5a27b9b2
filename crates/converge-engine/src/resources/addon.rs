//! Addon binding

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor};
use crate::kind::{immutable_changes, GroupPlan, Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::{Phase, StatusClassifier};

use super::StringMap;

const IMMUTABLE: &[&str] = &["clusterName", "name"];

/// Remote operation name for addon updates
pub const UPDATE_ADDON: &str = "UpdateAddon";

/// Service account to IAM role binding for an addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodIdentityAssociation {
    /// Kubernetes service account
    pub service_account: String,
    /// IAM role assumed by pods using the service account
    pub role_arn: String,
}

/// Desired/observed addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    /// Addon name, e.g. `vpc-cni`
    pub name: String,
    /// Owning cluster
    pub cluster_name: String,
    /// Addon version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addon_version: Option<String>,
    /// JSON configuration blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_values: Option<String>,
    /// IRSA role for the addon's service account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_role_arn: Option<String>,
    /// How to resolve field conflicts on update; sent, never compared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_conflicts: Option<String>,
    /// Pod identity associations, order-independent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_identity_associations: Vec<PodIdentityAssociation>,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

/// Payload of an `UpdateAddon` call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddonUpdate {
    /// Owning cluster
    pub cluster_name: String,
    /// Addon name
    pub addon_name: String,
    /// Addon version
    pub addon_version: Option<String>,
    /// Configuration blob
    pub configuration_values: Option<String>,
    /// IRSA role
    pub service_account_role_arn: Option<String>,
    /// Conflict resolution strategy
    pub resolve_conflicts: Option<String>,
    /// Full desired association list
    pub pod_identity_associations: Vec<PodIdentityAssociation>,
}

fn plan_addon(input: &PlanInput<'_, AddonSpec>) -> GroupPlan<AddonUpdate> {
    let d = input.desired;
    GroupPlan::Calls(vec![AddonUpdate {
        cluster_name: d.cluster_name.clone(),
        addon_name: d.name.clone(),
        addon_version: d.addon_version.clone(),
        configuration_values: d.configuration_values.clone(),
        service_account_role_arn: d.service_account_role_arn.clone(),
        resolve_conflicts: d.resolve_conflicts.clone(),
        pod_identity_associations: d.pod_identity_associations.clone(),
    }])
}

/// Binding for addons
pub struct Addon;

impl ResourceKind for Addon {
    type Spec = AddonSpec;
    type Update = AddonUpdate;

    const KIND: &'static str = "Addon";
    const OPERATIONS: Operations = Operations {
        describe: "DescribeAddon",
        create: "CreateAddon",
        delete: "DeleteAddon",
    };

    /// Degraded joins the terminal set only when configured
    fn status_classifier() -> StatusClassifier {
        StatusClassifier::new(
            Self::KIND,
            &[Phase::CreateFailed, Phase::UpdateFailed, Phase::DeleteFailed],
        )
    }

    fn delta_computer() -> DeltaComputer<AddonSpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new("name", |s: &AddonSpec| json(&s.name), Equality::Scalar),
            FieldDescriptor::new(
                "clusterName",
                |s: &AddonSpec| json(&s.cluster_name),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "addonVersion",
                |s: &AddonSpec| json(&s.addon_version),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "configurationValues",
                |s: &AddonSpec| json(&s.configuration_values),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "serviceAccountRoleArn",
                |s: &AddonSpec| json(&s.service_account_role_arn),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "podIdentityAssociations",
                |s: &AddonSpec| json(&s.pod_identity_associations),
                Equality::Set,
            ),
        ])
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        vec![UpdateGroup {
            category: "addon",
            paths: &[
                "addonVersion",
                "configurationValues",
                "serviceAccountRoleArn",
                "podIdentityAssociations",
            ],
            plan: plan_addon,
        }]
    }

    fn resource_id(spec: &AddonSpec) -> ResourceId {
        ResourceId::child(&spec.cluster_name, &spec.name)
    }

    fn tags(spec: &AddonSpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(_update: &AddonUpdate) -> &'static str {
        UPDATE_ADDON
    }

    fn check_delta(input: &PlanInput<'_, AddonSpec>) -> Option<String> {
        immutable_changes(input.delta, IMMUTABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use converge_common::config::EngineConfig;
    use converge_common::metrics::InMemoryMetricsRecorder;

    use crate::orchestrator::{Desired, Orchestrator};
    use crate::remote::testing::FakeRemote;
    use crate::remote::{MockTagApi, Observed};
    use crate::verdict::RemediationVerdict;

    const ARN: &str = "arn:aws:eks:us-west-2:123456789012:addon/prod/vpc-cni/abc";

    fn addon() -> AddonSpec {
        AddonSpec {
            name: "vpc-cni".to_string(),
            cluster_name: "prod".to_string(),
            addon_version: Some("v1.18.0-eksbuild.1".to_string()),
            pod_identity_associations: vec![
                PodIdentityAssociation {
                    service_account: "aws-node".to_string(),
                    role_arn: "arn:aws:iam::123456789012:role/cni".to_string(),
                },
                PodIdentityAssociation {
                    service_account: "metrics".to_string(),
                    role_arn: "arn:aws:iam::123456789012:role/metrics".to_string(),
                },
            ],
            ..Default::default()
        }
    }

    fn observed(spec: AddonSpec, status: &str) -> Observed<AddonSpec> {
        Observed::new(spec, Some(status), Some(ARN)).with_tags(StringMap::new())
    }

    fn orchestrator(remote: Arc<FakeRemote<Addon>>, config: EngineConfig) -> Orchestrator<Addon> {
        Orchestrator::builder(remote, Arc::new(MockTagApi::new()))
            .metrics(Arc::new(InMemoryMetricsRecorder::default()))
            .config(config)
            .build()
    }

    /// Story: bumping the addon version sends the whole desired addon,
    /// including the conflict strategy
    #[tokio::test]
    async fn story_version_bump_sends_full_payload() {
        let remote = Arc::new(FakeRemote::<Addon>::new(None));
        let mut desired = addon();
        desired.addon_version = Some("v1.19.0-eksbuild.1".to_string());
        desired.resolve_conflicts = Some("OVERWRITE".to_string());

        let result = orchestrator(remote.clone(), EngineConfig::default())
            .remediate(&Desired::new(desired), &observed(addon(), "ACTIVE"))
            .await
            .expect("pass succeeds");

        assert_eq!(result.verdict, RemediationVerdict::applied("addon"));
        let updates = remote.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].addon_version.as_deref(), Some("v1.19.0-eksbuild.1"));
        assert_eq!(updates[0].resolve_conflicts.as_deref(), Some("OVERWRITE"));
        assert_eq!(updates[0].pod_identity_associations.len(), 2);
    }

    #[tokio::test]
    async fn association_order_is_irrelevant() {
        let remote = Arc::new(FakeRemote::<Addon>::new(None));
        let mut desired = addon();
        desired.pod_identity_associations.reverse();
        desired.resolve_conflicts = Some("OVERWRITE".to_string());

        let result = orchestrator(remote.clone(), EngineConfig::default())
            .remediate(&Desired::new(desired), &observed(addon(), "ACTIVE"))
            .await
            .expect("pass succeeds");

        assert_eq!(result.verdict, RemediationVerdict::Converged);
        assert!(remote.updates().is_empty());
    }

    #[tokio::test]
    async fn degraded_waits_by_default_and_is_terminal_when_configured() {
        let remote = Arc::new(FakeRemote::<Addon>::new(None));
        let mut desired = addon();
        desired.addon_version = Some("v1.19.0-eksbuild.1".to_string());
        let desired = Desired::new(desired);

        let default = orchestrator(remote.clone(), EngineConfig::default())
            .remediate(&desired, &observed(addon(), "DEGRADED"))
            .await
            .expect("pass succeeds");
        assert!(matches!(default.verdict, RemediationVerdict::Wait { .. }));

        let strict = EngineConfig {
            degraded_terminal_kinds: vec!["Addon".to_string()],
            ..EngineConfig::default()
        };
        let configured = orchestrator(remote.clone(), strict)
            .remediate(&desired, &observed(addon(), "DEGRADED"))
            .await
            .expect("pass succeeds");
        assert!(configured.verdict.is_terminal());
        assert!(remote.updates().is_empty());
    }

    #[tokio::test]
    async fn renaming_is_terminal() {
        let remote = Arc::new(FakeRemote::<Addon>::new(None));
        let mut desired = addon();
        desired.name = "coredns".to_string();

        let result = orchestrator(remote, EngineConfig::default())
            .remediate(&Desired::new(desired), &observed(addon(), "ACTIVE"))
            .await
            .expect("pass succeeds");

        assert_eq!(
            result.verdict,
            RemediationVerdict::terminal("Immutable spec fields have been modified: name")
        );
    }
}
