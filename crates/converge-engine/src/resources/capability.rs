//! Cluster capability binding
//!
//! A capability runs a managed add-on controller (ACK, KRO or Argo CD)
//! against a cluster. One update group carries the role, the delete
//! propagation policy and the Argo CD configuration. Argo CD role mappings
//! are a keyed set by role: a role whose identities changed is written in
//! place, a role no longer desired is removed.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor};
use crate::keyed_set::{reconcile, UpdateMode};
use crate::kind::{immutable_changes, GroupPlan, Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::{Phase, StatusClassifier};

use super::StringMap;

const IMMUTABLE: &[&str] = &[
    "name",
    "clusterName",
    "type",
    "configuration.argoCd.namespace",
    "configuration.argoCd.awsIdc",
];

const RBAC_ROLE_MAPPINGS: &str = "configuration.argoCd.rbacRoleMappings";
const NETWORK_ACCESS: &str = "configuration.argoCd.networkAccess";

/// Remote operation names
pub mod operations {
    /// Role, propagation policy and Argo CD configuration
    pub const UPDATE_CAPABILITY: &str = "UpdateCapability";
}

/// IAM Identity Center instance backing Argo CD logins
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsIdcConfig {
    /// Identity Center instance ARN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idc_instance_arn: Option<String>,
    /// Region of the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idc_region: Option<String>,
}

/// Private endpoints allowed to reach Argo CD
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAccess {
    /// VPC endpoint ids, order-independent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vpce_ids: Vec<String>,
}

/// Identity Center user or group
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub struct SsoIdentity {
    /// Identity id
    pub id: String,
    /// `SSO_USER` or `SSO_GROUP`
    #[serde(rename = "type")]
    pub type_: String,
}

/// Identities granted one Argo CD role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleMapping {
    /// `ADMIN`, `EDITOR` or `VIEWER`; the identity of the mapping
    pub role: String,
    /// Identities holding the role
    #[serde(default)]
    pub identities: Vec<SsoIdentity>,
}

impl RoleMapping {
    fn sorted_identities(&self) -> Vec<SsoIdentity> {
        let mut identities = self.identities.clone();
        identities.sort();
        identities
    }
}

/// Argo CD settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdConfig {
    /// Namespace Argo CD runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Identity Center instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_idc: Option<AwsIdcConfig>,
    /// Private endpoint access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_access: Option<NetworkAccess>,
    /// Role mappings; unset leaves the remote mappings alone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac_role_mappings: Option<Vec<RoleMapping>>,
}

/// Capability-specific configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityConfiguration {
    /// Argo CD settings, only for `ARGOCD` capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argo_cd: Option<ArgoCdConfig>,
}

/// Desired/observed capability
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySpec {
    /// Capability name
    pub name: String,
    /// Owning cluster
    pub cluster_name: String,
    /// `ACK`, `KRO` or `ARGOCD`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Role the capability's controller assumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// What happens to managed resources on delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_propagation_policy: Option<String>,
    /// Capability-specific configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<CapabilityConfiguration>,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

impl CapabilitySpec {
    fn argo_cd(&self) -> Option<&ArgoCdConfig> {
        self.configuration.as_ref().and_then(|c| c.argo_cd.as_ref())
    }

    fn role_mappings(&self) -> Option<&[RoleMapping]> {
        self.argo_cd()
            .and_then(|a| a.rbac_role_mappings.as_deref())
    }
}

/// Role mapping changes for an `UpdateCapability` call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleMappingsUpdate {
    /// Mappings added or whose identities changed
    pub add_or_update: Vec<RoleMapping>,
    /// Observed mappings whose role is no longer desired
    pub remove: Vec<RoleMapping>,
}

/// `UpdateCapability` payload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityUpdate {
    /// Owning cluster
    pub cluster_name: String,
    /// Capability name
    pub name: String,
    /// Desired role
    pub role_arn: Option<String>,
    /// Desired delete propagation policy
    pub delete_propagation_policy: Option<String>,
    /// Desired private endpoint access
    pub network_access: Option<NetworkAccess>,
    /// Role mapping changes
    pub rbac_role_mappings: Option<RoleMappingsUpdate>,
}

fn mapping_table(spec: &CapabilitySpec) -> serde_json::Value {
    match spec.role_mappings() {
        None => serde_json::Value::Null,
        Some(mappings) => json(
            &mappings
                .iter()
                .map(|m| RoleMapping {
                    role: m.role.clone(),
                    identities: m.sorted_identities(),
                })
                .collect::<Vec<_>>(),
        ),
    }
}

fn role_mappings_update(desired: &[RoleMapping], observed: &[RoleMapping]) -> Option<RoleMappingsUpdate> {
    let plan = reconcile(
        desired,
        observed,
        |m: &RoleMapping| m.role.clone(),
        |a: &RoleMapping, b: &RoleMapping| a.sorted_identities() == b.sorted_identities(),
        UpdateMode::InPlace,
    );
    if plan.is_empty() {
        return None;
    }
    let remove = observed
        .iter()
        .filter(|m| plan.to_remove.contains(&m.role))
        .cloned()
        .collect();
    Some(RoleMappingsUpdate {
        add_or_update: plan
            .to_add
            .into_iter()
            .chain(plan.to_update.into_iter().map(|(m, _)| m))
            .collect(),
        remove,
    })
}

fn plan_capability(input: &PlanInput<'_, CapabilitySpec>) -> GroupPlan<CapabilityUpdate> {
    let d = input.desired;
    let mut update = CapabilityUpdate {
        cluster_name: d.cluster_name.clone(),
        name: d.name.clone(),
        role_arn: d.role_arn.clone(),
        delete_propagation_policy: d.delete_propagation_policy.clone(),
        ..Default::default()
    };

    if input.delta.different_at(NETWORK_ACCESS) {
        update.network_access = d.argo_cd().and_then(|a| a.network_access.clone());
    }
    if let (true, Some(desired)) = (input.delta.different_at(RBAC_ROLE_MAPPINGS), d.role_mappings()) {
        let observed = input.observed.role_mappings().unwrap_or_default();
        update.rbac_role_mappings = role_mappings_update(desired, observed);
    }
    GroupPlan::Calls(vec![update])
}

/// Binding for cluster capabilities
pub struct Capability;

impl ResourceKind for Capability {
    type Spec = CapabilitySpec;
    type Update = CapabilityUpdate;

    const KIND: &'static str = "Capability";
    const OPERATIONS: Operations = Operations {
        describe: "DescribeCapability",
        create: "CreateCapability",
        delete: "DeleteCapability",
    };

    fn status_classifier() -> StatusClassifier {
        StatusClassifier::new(Self::KIND, &[Phase::CreateFailed, Phase::DeleteFailed])
    }

    fn delta_computer() -> DeltaComputer<CapabilitySpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new("name", |s: &CapabilitySpec| json(&s.name), Equality::Scalar),
            FieldDescriptor::new(
                "clusterName",
                |s: &CapabilitySpec| json(&s.cluster_name),
                Equality::Scalar,
            ),
            FieldDescriptor::new("type", |s: &CapabilitySpec| json(&s.type_), Equality::Scalar)
                .explicit_only(),
            FieldDescriptor::new(
                "roleArn",
                |s: &CapabilitySpec| json(&s.role_arn),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "deletePropagationPolicy",
                |s: &CapabilitySpec| json(&s.delete_propagation_policy),
                Equality::Scalar,
            )
            .explicit_only(),
            FieldDescriptor::new(
                "configuration.argoCd.namespace",
                |s: &CapabilitySpec| json(&s.argo_cd().and_then(|a| a.namespace.as_ref())),
                Equality::Scalar,
            )
            .explicit_only(),
            FieldDescriptor::new(
                "configuration.argoCd.awsIdc",
                |s: &CapabilitySpec| json(&s.argo_cd().and_then(|a| a.aws_idc.as_ref())),
                Equality::Nested,
            )
            .explicit_only(),
            FieldDescriptor::new(
                NETWORK_ACCESS,
                |s: &CapabilitySpec| json(&s.argo_cd().and_then(|a| a.network_access.as_ref())),
                Equality::Nested,
            )
            .explicit_only(),
            FieldDescriptor::new(RBAC_ROLE_MAPPINGS, mapping_table, Equality::Set).explicit_only(),
        ])
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        vec![UpdateGroup {
            category: "capability",
            paths: &["roleArn", "deletePropagationPolicy", NETWORK_ACCESS, RBAC_ROLE_MAPPINGS],
            plan: plan_capability,
        }]
    }

    fn resource_id(spec: &CapabilitySpec) -> ResourceId {
        ResourceId::child(&spec.cluster_name, &spec.name)
    }

    fn tags(spec: &CapabilitySpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(_update: &CapabilityUpdate) -> &'static str {
        operations::UPDATE_CAPABILITY
    }

    fn check_delta(input: &PlanInput<'_, CapabilitySpec>) -> Option<String> {
        immutable_changes(input.delta, IMMUTABLE)
    }
}
