//! Managed nodegroup binding
//!
//! Two update groups: `config` (labels, taints, scaling, update and repair
//! config) and `version` (version, release version, launch template).
//! Version changes step one minor at a time from the observed version.
//!
//! The desired size can be handed to an external autoscaler via the
//! [`DESIRED_SIZE_MANAGED_BY`](converge_common::annotations::DESIRED_SIZE_MANAGED_BY)
//! annotation. The difference is then stripped from the delta and the
//! scaling payload carries the observed size.

use converge_common::{Annotations, FieldOwner};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor, StripExternallyOwned};
use crate::keyed_set::{reconcile, reconcile_map, UpdateMode};
use crate::kind::{immutable_changes, GroupPlan, Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::{Phase, StatusClassifier};
use crate::version::{step_between, MinorVersion, VersionStep};

use super::{or_empty, StringMap};

const IMMUTABLE: &[&str] = &[
    "amiType",
    "capacityType",
    "diskSize",
    "instanceTypes",
    "nodeRole",
    "remoteAccess",
    "subnets",
    "clusterName",
    "name",
];

const DESIRED_SIZE_PATH: &str = "scalingConfig.desiredSize";

/// Remote operation names
pub mod operations {
    /// Labels, taints, scaling, update and repair config
    pub const UPDATE_NODEGROUP_CONFIG: &str = "UpdateNodegroupConfig";
    /// Version, release version and launch template
    pub const UPDATE_NODEGROUP_VERSION: &str = "UpdateNodegroupVersion";
}

/// SSH access to nodes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccessConfig {
    /// EC2 key pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec2_ssh_key: Option<String>,
    /// Security groups allowed to SSH
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_security_groups: Vec<String>,
}

/// Kubernetes taint applied to every node
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    /// Taint key, the identity of the taint
    pub key: String,
    /// Taint value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// `NO_SCHEDULE`, `NO_EXECUTE` or `PREFER_NO_SCHEDULE`
    pub effect: String,
}

/// Autoscaling bounds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    /// Minimum node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i64>,
    /// Maximum node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i64>,
    /// Current target node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_size: Option<i64>,
}

/// Rolling update limits
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    /// Absolute number of nodes that may be unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i64>,
    /// Percentage of nodes that may be unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_percentage: Option<i64>,
}

/// Automatic node repair
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRepairConfig {
    /// Repair unhealthy nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// EC2 launch template reference; set either id or name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplate {
    /// Template id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Template name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Template version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Desired/observed managed nodegroup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupSpec {
    /// Nodegroup name
    pub name: String,
    /// Owning cluster
    pub cluster_name: String,
    /// Node IAM role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role: Option<String>,
    /// Node subnets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
    /// AMI family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_type: Option<String>,
    /// `ON_DEMAND` or `SPOT`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_type: Option<String>,
    /// Root volume size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<i64>,
    /// Instance types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_types: Vec<String>,
    /// SSH access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_access: Option<RemoteAccessConfig>,
    /// Node labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<StringMap>,
    /// Node taints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
    /// Autoscaling bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_config: Option<ScalingConfig>,
    /// Rolling update limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_config: Option<UpdateConfig>,
    /// Automatic node repair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_repair_config: Option<NodeRepairConfig>,
    /// Kubernetes `major.minor`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// AMI release version, e.g. `1.29.3-20240531`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
    /// Launch template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template: Option<LaunchTemplate>,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

/// Label changes for an `UpdateNodegroupConfig` call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelsPayload {
    /// Keys added or changed, with their desired values
    pub add_or_update: StringMap,
    /// Keys only present on the observed side
    pub remove: Vec<String>,
}

/// Taint changes for an `UpdateNodegroupConfig` call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaintsPayload {
    /// The full desired taint list
    pub add_or_update: Vec<Taint>,
    /// Observed taints whose key is no longer desired
    pub remove: Vec<Taint>,
}

/// `UpdateNodegroupConfig` payload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodegroupConfigUpdate {
    /// Owning cluster
    pub cluster_name: String,
    /// Nodegroup name
    pub nodegroup_name: String,
    /// Label changes
    pub labels: Option<LabelsPayload>,
    /// Taint changes
    pub taints: Option<TaintsPayload>,
    /// Scaling bounds
    pub scaling_config: Option<ScalingConfig>,
    /// Update limits
    pub update_config: Option<UpdateConfig>,
    /// Node repair
    pub node_repair_config: Option<NodeRepairConfig>,
}

/// `UpdateNodegroupVersion` payload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodegroupVersionUpdate {
    /// Owning cluster
    pub cluster_name: String,
    /// Nodegroup name
    pub nodegroup_name: String,
    /// Target `major.minor`
    pub version: Option<String>,
    /// Target AMI release
    pub release_version: Option<String>,
    /// Launch template to roll to
    pub launch_template: Option<LaunchTemplate>,
    /// Skip pod disruption budget checks
    pub force: bool,
}

/// Remote calls for a nodegroup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodegroupUpdate {
    /// `UpdateNodegroupConfig`
    Config(NodegroupConfigUpdate),
    /// `UpdateNodegroupVersion`
    Version(NodegroupVersionUpdate),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn labels_payload(desired: &NodegroupSpec, observed: &NodegroupSpec) -> Option<LabelsPayload> {
    let plan = reconcile_map(&or_empty(desired.labels.as_ref()), &or_empty(observed.labels.as_ref()));
    if plan.is_empty() {
        return None;
    }
    Some(LabelsPayload {
        add_or_update: plan
            .to_add
            .into_iter()
            .chain(plan.to_update.into_iter().map(|(pair, _)| pair))
            .collect(),
        remove: plan.to_remove,
    })
}

fn taints_payload(desired: &NodegroupSpec, observed: &NodegroupSpec) -> Option<TaintsPayload> {
    let plan = reconcile(
        &desired.taints,
        &observed.taints,
        |t: &Taint| t.key.clone(),
        |a: &Taint, b: &Taint| a == b,
        UpdateMode::InPlace,
    );
    if plan.is_empty() {
        return None;
    }
    Some(TaintsPayload {
        add_or_update: desired.taints.clone(),
        remove: observed
            .taints
            .iter()
            .filter(|t| plan.to_remove.contains(&t.key))
            .cloned()
            .collect(),
    })
}

fn scaling_payload(
    desired: &NodegroupSpec,
    observed: &NodegroupSpec,
    annotations: &Annotations,
) -> Option<ScalingConfig> {
    let mut scaling = desired.scaling_config.clone()?;
    if annotations.desired_size_owner() == FieldOwner::External {
        if let Some(current) = observed.scaling_config.as_ref() {
            info!(
                external_desired_size = ?current.desired_size,
                requested_desired_size = ?scaling.desired_size,
                "desired size is managed externally, keeping the observed value"
            );
            scaling.desired_size = current.desired_size;
        }
    }
    Some(scaling)
}

fn plan_config(input: &PlanInput<'_, NodegroupSpec>) -> GroupPlan<NodegroupUpdate> {
    let (d, o) = (input.desired, input.observed);
    let update = NodegroupConfigUpdate {
        cluster_name: d.cluster_name.clone(),
        nodegroup_name: d.name.clone(),
        labels: labels_payload(d, o),
        taints: taints_payload(d, o),
        scaling_config: scaling_payload(d, o, input.annotations),
        update_config: d.update_config.clone(),
        node_repair_config: d.node_repair_config.clone(),
    };
    if update.labels.is_none()
        && update.taints.is_none()
        && update.scaling_config.is_none()
        && update.update_config.is_none()
        && update.node_repair_config.is_none()
    {
        return GroupPlan::Skip;
    }
    GroupPlan::Calls(vec![NodegroupUpdate::Config(update)])
}

fn plan_version(input: &PlanInput<'_, NodegroupSpec>) -> GroupPlan<NodegroupUpdate> {
    let (d, o) = (input.desired, input.observed);

    let release_minor = match non_empty(&d.release_version) {
        Some(raw) => match MinorVersion::from_release_version(raw) {
            Ok(minor) => Some(minor),
            Err(err) => return GroupPlan::Terminal(err.to_string()),
        },
        None => None,
    };
    let version = match non_empty(&d.version) {
        Some(raw) => match raw.parse::<MinorVersion>() {
            Ok(v) => Some(v),
            Err(err) => return GroupPlan::Terminal(err.to_string()),
        },
        None => None,
    };
    if let (Some(v), Some(rv)) = (version, release_minor) {
        if v != rv {
            return GroupPlan::Terminal(format!(
                "version and release version do not match: {v} and {rv}"
            ));
        }
    }

    let mut update = NodegroupVersionUpdate {
        cluster_name: d.cluster_name.clone(),
        nodegroup_name: d.name.clone(),
        force: input.annotations.force_update_version(),
        ..Default::default()
    };

    let version_changed =
        input.delta.different_at("version") || input.delta.different_at("releaseVersion");
    if let (true, Some(target)) = (version_changed, version.or(release_minor)) {
        match non_empty(&o.version).map(str::parse::<MinorVersion>) {
            None => {
                update.version = version.map(|v| v.to_string());
                update.release_version = d.release_version.clone();
            }
            Some(Err(err)) => return GroupPlan::Terminal(err.to_string()),
            Some(Ok(current)) => match step_between(current, target) {
                Ok(VersionStep::Downgrade) => {
                    return GroupPlan::Terminal(format!(
                        "desired nodegroup version is less than the observed version: {target} < {current}"
                    ))
                }
                Ok(VersionStep::Reached) => {
                    update.release_version = d.release_version.clone();
                }
                Ok(VersionStep::Final(next)) => {
                    update.version = Some(next.to_string());
                    update.release_version = d.release_version.clone();
                }
                Ok(VersionStep::Intermediate(next)) => {
                    // The desired release belongs to a later minor
                    update.version = Some(next.to_string());
                }
                Err(err) => return GroupPlan::Terminal(err.to_string()),
            },
        }
    }

    if input.delta.different_at("launchTemplate") {
        update.launch_template = d.launch_template.clone();
    }

    if update.version.is_none() && update.release_version.is_none() && update.launch_template.is_none() {
        return GroupPlan::Skip;
    }
    GroupPlan::Calls(vec![NodegroupUpdate::Version(update)])
}

/// Binding for managed nodegroups
pub struct Nodegroup;

impl ResourceKind for Nodegroup {
    type Spec = NodegroupSpec;
    type Update = NodegroupUpdate;

    const KIND: &'static str = "Nodegroup";
    const OPERATIONS: Operations = Operations {
        describe: "DescribeNodegroup",
        create: "CreateNodegroup",
        delete: "DeleteNodegroup",
    };

    fn status_classifier() -> StatusClassifier {
        StatusClassifier::new(Self::KIND, &[Phase::CreateFailed, Phase::DeleteFailed])
    }

    fn delta_computer() -> DeltaComputer<NodegroupSpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new("name", |s: &NodegroupSpec| json(&s.name), Equality::Scalar),
            FieldDescriptor::new(
                "clusterName",
                |s: &NodegroupSpec| json(&s.cluster_name),
                Equality::Scalar,
            ),
            FieldDescriptor::new("nodeRole", |s: &NodegroupSpec| json(&s.node_role), Equality::Scalar),
            FieldDescriptor::new("subnets", |s: &NodegroupSpec| json(&s.subnets), Equality::Set),
            FieldDescriptor::new("amiType", |s: &NodegroupSpec| json(&s.ami_type), Equality::Scalar)
                .explicit_only(),
            FieldDescriptor::new(
                "capacityType",
                |s: &NodegroupSpec| json(&s.capacity_type),
                Equality::Scalar,
            )
            .explicit_only(),
            FieldDescriptor::new("diskSize", |s: &NodegroupSpec| json(&s.disk_size), Equality::Scalar)
                .explicit_only(),
            FieldDescriptor::new(
                "instanceTypes",
                |s: &NodegroupSpec| json(&s.instance_types),
                Equality::Set,
            )
            .explicit_only(),
            FieldDescriptor::new(
                "remoteAccess",
                |s: &NodegroupSpec| json(&s.remote_access),
                Equality::Nested,
            ),
            FieldDescriptor::new("labels", |s: &NodegroupSpec| json(&s.labels), Equality::Map),
            FieldDescriptor::new("taints", |s: &NodegroupSpec| json(&s.taints), Equality::Set),
            FieldDescriptor::new(
                "scalingConfig",
                |s: &NodegroupSpec| json(&s.scaling_config),
                Equality::Nested,
            ),
            FieldDescriptor::new(
                "updateConfig",
                |s: &NodegroupSpec| json(&s.update_config),
                Equality::Nested,
            ),
            FieldDescriptor::new(
                "nodeRepairConfig",
                |s: &NodegroupSpec| json(&s.node_repair_config),
                Equality::Nested,
            ),
            FieldDescriptor::new("version", |s: &NodegroupSpec| json(&s.version), Equality::Scalar)
                .explicit_only(),
            FieldDescriptor::new(
                "releaseVersion",
                |s: &NodegroupSpec| json(&s.release_version),
                Equality::Scalar,
            )
            .explicit_only(),
            FieldDescriptor::new(
                "launchTemplate",
                |s: &NodegroupSpec| json(&s.launch_template),
                Equality::Nested,
            ),
        ])
        .with_policy(StripExternallyOwned::new(
            DESIRED_SIZE_PATH,
            Annotations::desired_size_owner,
        ))
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        vec![
            UpdateGroup {
                category: "config",
                paths: &[
                    "labels",
                    "taints",
                    "scalingConfig",
                    "updateConfig",
                    "nodeRepairConfig",
                ],
                plan: plan_config,
            },
            UpdateGroup {
                category: "version",
                paths: &["version", "releaseVersion", "launchTemplate"],
                plan: plan_version,
            },
        ]
    }

    fn resource_id(spec: &NodegroupSpec) -> ResourceId {
        ResourceId::child(&spec.cluster_name, &spec.name)
    }

    fn tags(spec: &NodegroupSpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(update: &NodegroupUpdate) -> &'static str {
        match update {
            NodegroupUpdate::Config(_) => operations::UPDATE_NODEGROUP_CONFIG,
            NodegroupUpdate::Version(_) => operations::UPDATE_NODEGROUP_VERSION,
        }
    }

    fn check_delta(input: &PlanInput<'_, NodegroupSpec>) -> Option<String> {
        immutable_changes(input.delta, IMMUTABLE)
    }
}
