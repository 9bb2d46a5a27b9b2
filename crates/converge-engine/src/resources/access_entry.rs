//! Access entry binding
//!
//! Access entries have no remote lifecycle status and update
//! synchronously. Their access-policy associations are a keyed set by
//! policy ARN; the remote cannot change an association in place, so a
//! changed scope is a disassociate followed by an associate.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor};
use crate::keyed_set::{reconcile, SetOperation, UpdateMode};
use crate::kind::{immutable_changes, GroupPlan, Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::StatusClassifier;

use super::StringMap;

const IMMUTABLE: &[&str] = &["type", "principalArn", "clusterName"];

/// Remote operation names
pub mod operations {
    /// Groups and username
    pub const UPDATE_ACCESS_ENTRY: &str = "UpdateAccessEntry";
    /// Attach a policy
    pub const ASSOCIATE_ACCESS_POLICY: &str = "AssociateAccessPolicy";
    /// Detach a policy
    pub const DISASSOCIATE_ACCESS_POLICY: &str = "DisassociateAccessPolicy";
}

/// Where a policy applies
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessScope {
    /// `cluster` or `namespace`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Namespaces for a namespace-scoped policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Vec<String>>,
}

impl AccessScope {
    /// Unset type is the empty string, unset namespaces the empty list,
    /// namespaces sorted
    pub fn normalized(&self) -> (String, Vec<String>) {
        let mut namespaces = self.namespaces.clone().unwrap_or_default();
        namespaces.sort();
        (self.type_.clone().unwrap_or_default(), namespaces)
    }
}

/// One policy association
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicy {
    /// Policy ARN, the identity of the association
    pub policy_arn: String,
    /// Scope of the association
    #[serde(default)]
    pub access_scope: AccessScope,
}

/// Desired/observed access entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntrySpec {
    /// Owning cluster
    pub cluster_name: String,
    /// IAM principal the entry grants access to
    pub principal_arn: String,
    /// Entry type (`STANDARD`, `EC2_LINUX`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Kubernetes groups, order-independent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_groups: Vec<String>,
    /// Kubernetes username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Policy associations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_policies: Vec<AccessPolicy>,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

/// Remote calls for an access entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessEntryUpdate {
    /// Replace groups and username
    Entry {
        /// Owning cluster
        cluster_name: String,
        /// Principal
        principal_arn: String,
        /// Full desired group list
        kubernetes_groups: Vec<String>,
        /// Desired username
        username: Option<String>,
    },
    /// Attach a policy with its scope
    Associate {
        /// Owning cluster
        cluster_name: String,
        /// Principal
        principal_arn: String,
        /// Policy to attach
        policy: AccessPolicy,
    },
    /// Detach a policy
    Disassociate {
        /// Owning cluster
        cluster_name: String,
        /// Principal
        principal_arn: String,
        /// Policy to detach
        policy_arn: String,
    },
}

fn normalized_policies(policies: &[AccessPolicy]) -> Vec<AccessPolicy> {
    policies
        .iter()
        .map(|p| {
            let (type_, namespaces) = p.access_scope.normalized();
            AccessPolicy {
                policy_arn: p.policy_arn.clone(),
                access_scope: AccessScope {
                    type_: Some(type_),
                    namespaces: Some(namespaces),
                },
            }
        })
        .collect()
}

fn plan_entry(input: &PlanInput<'_, AccessEntrySpec>) -> GroupPlan<AccessEntryUpdate> {
    let d = input.desired;
    GroupPlan::Calls(vec![AccessEntryUpdate::Entry {
        cluster_name: d.cluster_name.clone(),
        principal_arn: d.principal_arn.clone(),
        kubernetes_groups: d.kubernetes_groups.clone(),
        username: d.username.clone(),
    }])
}

fn plan_access_policies(input: &PlanInput<'_, AccessEntrySpec>) -> GroupPlan<AccessEntryUpdate> {
    let d = input.desired;
    let plan = reconcile(
        &d.access_policies,
        &input.observed.access_policies,
        |p: &AccessPolicy| p.policy_arn.clone(),
        |a: &AccessPolicy, b: &AccessPolicy| a.access_scope.normalized() == b.access_scope.normalized(),
        UpdateMode::RemoveThenAdd,
    );
    if plan.is_empty() {
        return GroupPlan::Skip;
    }

    let calls = plan
        .operations()
        .into_iter()
        .map(|op| match op {
            SetOperation::Remove(policy_arn) => AccessEntryUpdate::Disassociate {
                cluster_name: d.cluster_name.clone(),
                principal_arn: d.principal_arn.clone(),
                policy_arn: policy_arn.clone(),
            },
            SetOperation::Add(policy) | SetOperation::Update(policy, _) => {
                AccessEntryUpdate::Associate {
                    cluster_name: d.cluster_name.clone(),
                    principal_arn: d.principal_arn.clone(),
                    policy: policy.clone(),
                }
            }
        })
        .collect();
    GroupPlan::Calls(calls)
}

/// Binding for access entries
pub struct AccessEntry;

impl ResourceKind for AccessEntry {
    type Spec = AccessEntrySpec;
    type Update = AccessEntryUpdate;

    const KIND: &'static str = "AccessEntry";
    const OPERATIONS: Operations = Operations {
        describe: "DescribeAccessEntry",
        create: "CreateAccessEntry",
        delete: "DeleteAccessEntry",
    };
    const ASYNC_UPDATES: bool = false;

    fn status_classifier() -> StatusClassifier {
        StatusClassifier::always_active(Self::KIND)
    }

    fn delta_computer() -> DeltaComputer<AccessEntrySpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new(
                "clusterName",
                |s: &AccessEntrySpec| json(&s.cluster_name),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "principalArn",
                |s: &AccessEntrySpec| json(&s.principal_arn),
                Equality::Scalar,
            ),
            FieldDescriptor::new("type", |s: &AccessEntrySpec| json(&s.type_), Equality::Scalar)
                .explicit_only(),
            FieldDescriptor::new(
                "kubernetesGroups",
                |s: &AccessEntrySpec| json(&s.kubernetes_groups),
                Equality::Set,
            ),
            FieldDescriptor::new(
                "username",
                |s: &AccessEntrySpec| json(&s.username),
                Equality::Scalar,
            )
            .explicit_only(),
            FieldDescriptor::new(
                "accessPolicies",
                |s: &AccessEntrySpec| json(&normalized_policies(&s.access_policies)),
                Equality::Set,
            ),
        ])
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        vec![
            UpdateGroup {
                category: "entry",
                paths: &["kubernetesGroups", "username"],
                plan: plan_entry,
            },
            UpdateGroup {
                category: "access-policies",
                paths: &["accessPolicies"],
                plan: plan_access_policies,
            },
        ]
    }

    fn resource_id(spec: &AccessEntrySpec) -> ResourceId {
        ResourceId::child(&spec.cluster_name, &spec.principal_arn)
    }

    fn tags(spec: &AccessEntrySpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(update: &AccessEntryUpdate) -> &'static str {
        match update {
            AccessEntryUpdate::Entry { .. } => operations::UPDATE_ACCESS_ENTRY,
            AccessEntryUpdate::Associate { .. } => operations::ASSOCIATE_ACCESS_POLICY,
            AccessEntryUpdate::Disassociate { .. } => operations::DISASSOCIATE_ACCESS_POLICY,
        }
    }

    fn check_delta(input: &PlanInput<'_, AccessEntrySpec>) -> Option<String> {
        immutable_changes(input.delta, IMMUTABLE)
    }
}
