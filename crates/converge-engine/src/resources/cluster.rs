//! Managed cluster binding
//!
//! Most cluster changes go through `UpdateClusterConfig`, one concern at a
//! time. Encryption and version have their own calls and their own rules:
//! encryption can only be added once, and the version moves forward one
//! minor per pass.

use converge_common::RemoteError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor};
use crate::kind::{immutable_changes, GroupPlan, Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::{Phase, StatusClassifier};
use crate::version::{step_between, MinorVersion, VersionStep};

use super::StringMap;

const IMMUTABLE: &[&str] = &["name", "roleArn"];

/// Message the remote returns for a logging update that changes nothing
pub const LOGGING_NO_CHANGES: &str = "No changes needed for the logging config provided";

/// Terminal messages for encryption changes
pub mod encryption {
    /// Desired drops an existing config
    pub const CANNOT_REMOVE: &str = "encryption configuration cannot be removed from an existing cluster";
    /// Desired edits an existing config
    pub const CANNOT_UPDATE: &str = "encryption configuration cannot be updated";
    /// Desired adds more than one config
    pub const ONLY_ONE: &str = "only one encryption configuration is allowed";
}

/// Remote operation names
pub mod operations {
    /// Everything except encryption and version
    pub const UPDATE_CLUSTER_CONFIG: &str = "UpdateClusterConfig";
    /// Add envelope encryption
    pub const ASSOCIATE_ENCRYPTION_CONFIG: &str = "AssociateEncryptionConfig";
    /// Move the control plane one minor forward
    pub const UPDATE_CLUSTER_VERSION: &str = "UpdateClusterVersion";
}

/// One control-plane log setting
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogSetup {
    /// `api`, `audit`, `authenticator`, `controllerManager`, `scheduler`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// Whether these log types are exported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Control-plane logging
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Logging {
    /// Log settings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_logging: Vec<LogSetup>,
}

/// VPC placement and endpoint access
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    /// Control-plane subnets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnet_ids: Vec<String>,
    /// Extra security groups for the control-plane ENIs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
    /// Public API endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_public_access: Option<bool>,
    /// Private API endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_private_access: Option<bool>,
    /// CIDRs allowed to reach the public endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_access_cidrs: Vec<String>,
}

/// Cluster authentication
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// `CONFIG_MAP`, `API_AND_CONFIG_MAP` or `API`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_mode: Option<String>,
}

/// Support policy after standard support ends
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePolicy {
    /// `STANDARD` or `EXTENDED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_type: Option<String>,
}

/// KMS key used for envelope encryption
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// KMS key ARN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_arn: Option<String>,
}

/// Envelope encryption of Kubernetes resources
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    /// Resource kinds to encrypt, usually `secrets`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// Key provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

/// Auto mode compute
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeConfig {
    /// Auto mode compute on or off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Built-in node pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_pools: Vec<String>,
    /// Role for auto mode nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role_arn: Option<String>,
}

/// A feature toggle
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    /// On or off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Auto mode storage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Block storage capability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_storage: Option<Toggle>,
}

/// Service networking
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesNetworkConfig {
    /// Auto mode load balancing capability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic_load_balancing: Option<Toggle>,
    /// `ipv4` or `ipv6`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_family: Option<String>,
    /// Service CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ipv4_cidr: Option<String>,
}

/// CIDR list for hybrid nodes or pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNetwork {
    /// CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidrs: Vec<String>,
}

/// Hybrid node networking
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNetworkConfig {
    /// On-premises node networks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_node_networks: Vec<RemoteNetwork>,
    /// On-premises pod networks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_pod_networks: Vec<RemoteNetwork>,
}

/// Desired/observed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name
    pub name: String,
    /// Control-plane IAM role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Kubernetes `major.minor`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Control-plane logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
    /// VPC placement and endpoint access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_vpc_config: Option<VpcConfig>,
    /// Authentication mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_config: Option<AccessConfig>,
    /// Support policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_policy: Option<UpgradePolicy>,
    /// Envelope encryption; at most one entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encryption_config: Vec<EncryptionConfig>,
    /// Auto mode compute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_config: Option<ComputeConfig>,
    /// Auto mode storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_config: Option<StorageConfig>,
    /// Service networking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_network_config: Option<KubernetesNetworkConfig>,
    /// Zonal shift
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zonal_shift_config: Option<Toggle>,
    /// Hybrid node networking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_network_config: Option<RemoteNetworkConfig>,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

/// VPC part of an `UpdateClusterConfig` call; unset fields are left alone
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VpcConfigUpdate {
    /// Control-plane subnets
    pub subnet_ids: Option<Vec<String>>,
    /// Security groups
    pub security_group_ids: Option<Vec<String>>,
    /// Public endpoint
    pub endpoint_public_access: Option<bool>,
    /// Private endpoint
    pub endpoint_private_access: Option<bool>,
    /// Public endpoint CIDRs
    pub public_access_cidrs: Option<Vec<String>>,
}

/// `UpdateClusterConfig` payload; exactly one concern is set per call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterConfigUpdate {
    /// Cluster name
    pub name: String,
    /// Logging
    pub logging: Option<Logging>,
    /// VPC settings
    pub resources_vpc_config: Option<VpcConfigUpdate>,
    /// Authentication mode
    pub access_config: Option<AccessConfig>,
    /// Support policy
    pub upgrade_policy: Option<UpgradePolicy>,
    /// Auto mode compute
    pub compute_config: Option<ComputeConfig>,
    /// Auto mode storage
    pub storage_config: Option<StorageConfig>,
    /// Service networking
    pub kubernetes_network_config: Option<KubernetesNetworkConfig>,
    /// Zonal shift
    pub zonal_shift_config: Option<Toggle>,
    /// Hybrid node networking
    pub remote_network_config: Option<RemoteNetworkConfig>,
}

/// Remote calls for a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterUpdate {
    /// `UpdateClusterConfig`
    Config(ClusterConfigUpdate),
    /// `AssociateEncryptionConfig`
    AssociateEncryption {
        /// Cluster name
        cluster_name: String,
        /// The single config to add
        encryption_config: EncryptionConfig,
    },
    /// `UpdateClusterVersion`
    Version {
        /// Cluster name
        name: String,
        /// Next minor version
        version: String,
    },
}

fn config_call(d: &ClusterSpec, fill: impl FnOnce(&mut ClusterConfigUpdate)) -> GroupPlan<ClusterUpdate> {
    let mut update = ClusterConfigUpdate {
        name: d.name.clone(),
        ..Default::default()
    };
    fill(&mut update);
    GroupPlan::Calls(vec![ClusterUpdate::Config(update)])
}

fn plan_logging(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    config_call(d, |u| u.logging = Some(d.logging.clone().unwrap_or_default()))
}

fn plan_endpoint_access(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    let vpc = d.resources_vpc_config.clone().unwrap_or_default();
    config_call(d, |u| {
        u.resources_vpc_config = Some(VpcConfigUpdate {
            endpoint_public_access: vpc.endpoint_public_access,
            endpoint_private_access: vpc.endpoint_private_access,
            public_access_cidrs: Some(vpc.public_access_cidrs),
            ..Default::default()
        })
    })
}

fn plan_vpc_networking(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    let vpc = d.resources_vpc_config.clone().unwrap_or_default();
    config_call(d, |u| {
        u.resources_vpc_config = Some(VpcConfigUpdate {
            subnet_ids: Some(vpc.subnet_ids),
            security_group_ids: Some(vpc.security_group_ids),
            ..Default::default()
        })
    })
}

fn plan_access_config(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    config_call(d, |u| u.access_config = Some(d.access_config.clone().unwrap_or_default()))
}

fn plan_upgrade_policy(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    match &d.upgrade_policy {
        Some(policy) => config_call(d, |u| u.upgrade_policy = Some(policy.clone())),
        None => GroupPlan::Skip,
    }
}

fn plan_encryption(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let desired = &input.desired.encryption_config;
    let observed = &input.observed.encryption_config;
    match (observed.len(), desired.len()) {
        (o, 0) if o > 0 => GroupPlan::Terminal(encryption::CANNOT_REMOVE.to_string()),
        (1, 1) => GroupPlan::Terminal(encryption::CANNOT_UPDATE.to_string()),
        (0, d) if d > 1 => GroupPlan::Terminal(encryption::ONLY_ONE.to_string()),
        _ => match desired.first() {
            Some(config) => GroupPlan::Calls(vec![ClusterUpdate::AssociateEncryption {
                cluster_name: input.desired.name.clone(),
                encryption_config: config.clone(),
            }]),
            None => GroupPlan::Skip,
        },
    }
}

fn plan_version(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let (d, o) = (input.desired, input.observed);
    let Some(desired) = d.version.as_deref().filter(|v| !v.is_empty()) else {
        return GroupPlan::Skip;
    };
    let Some(observed) = o.version.as_deref().filter(|v| !v.is_empty()) else {
        return GroupPlan::Calls(vec![ClusterUpdate::Version {
            name: d.name.clone(),
            version: desired.to_string(),
        }]);
    };

    let parsed = desired
        .parse::<MinorVersion>()
        .and_then(|want| Ok((want, observed.parse::<MinorVersion>()?)));
    let (want, have) = match parsed {
        Ok(pair) => pair,
        Err(err) => {
            return GroupPlan::Terminal(format!(
                "failed to compare the desired and observed versions: {err}"
            ))
        }
    };

    match step_between(have, want) {
        Ok(VersionStep::Reached) => GroupPlan::Skip,
        Ok(VersionStep::Final(next)) | Ok(VersionStep::Intermediate(next)) => {
            GroupPlan::Calls(vec![ClusterUpdate::Version {
                name: d.name.clone(),
                version: next.to_string(),
            }])
        }
        Ok(VersionStep::Downgrade) => GroupPlan::Terminal(format!(
            "desired cluster version is less than the observed version: {desired} < {observed}"
        )),
        Err(err) => GroupPlan::Terminal(err.to_string()),
    }
}

fn plan_compute_storage_network(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    config_call(d, |u| {
        u.compute_config = d.compute_config.clone();
        u.storage_config = d.storage_config.clone();
        u.kubernetes_network_config = d.kubernetes_network_config.clone();
    })
}

fn plan_zonal_shift(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    config_call(d, |u| u.zonal_shift_config = Some(d.zonal_shift_config.clone().unwrap_or_default()))
}

fn plan_remote_network(input: &PlanInput<'_, ClusterSpec>) -> GroupPlan<ClusterUpdate> {
    let d = input.desired;
    config_call(d, |u| {
        u.remote_network_config = Some(d.remote_network_config.clone().unwrap_or_default())
    })
}

/// Binding for managed clusters
pub struct Cluster;

impl ResourceKind for Cluster {
    type Spec = ClusterSpec;
    type Update = ClusterUpdate;

    const KIND: &'static str = "Cluster";
    const OPERATIONS: Operations = Operations {
        describe: "DescribeCluster",
        create: "CreateCluster",
        delete: "DeleteCluster",
    };

    fn status_classifier() -> StatusClassifier {
        StatusClassifier::new(Self::KIND, &[Phase::Failed])
    }

    fn delta_computer() -> DeltaComputer<ClusterSpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new("name", |s: &ClusterSpec| json(&s.name), Equality::Scalar),
            FieldDescriptor::new("roleArn", |s: &ClusterSpec| json(&s.role_arn), Equality::Scalar),
            FieldDescriptor::new("version", |s: &ClusterSpec| json(&s.version), Equality::Scalar)
                .explicit_only(),
            FieldDescriptor::new("logging", |s: &ClusterSpec| json(&s.logging), Equality::Nested),
            FieldDescriptor::new(
                "resourcesVpcConfig",
                |s: &ClusterSpec| json(&s.resources_vpc_config),
                Equality::Nested,
            ),
            FieldDescriptor::new(
                "accessConfig",
                |s: &ClusterSpec| json(&s.access_config),
                Equality::Nested,
            ),
            FieldDescriptor::new(
                "upgradePolicy",
                |s: &ClusterSpec| json(&s.upgrade_policy),
                Equality::Nested,
            )
            .explicit_only(),
            FieldDescriptor::new(
                "encryptionConfig",
                |s: &ClusterSpec| json(&s.encryption_config),
                Equality::Set,
            ),
            FieldDescriptor::new(
                "computeConfig",
                |s: &ClusterSpec| json(&s.compute_config),
                Equality::Nested,
            ),
            FieldDescriptor::new(
                "storageConfig",
                |s: &ClusterSpec| json(&s.storage_config),
                Equality::Nested,
            ),
            FieldDescriptor::new(
                "kubernetesNetworkConfig",
                |s: &ClusterSpec| json(&s.kubernetes_network_config),
                Equality::Nested,
            )
            .explicit_only(),
            FieldDescriptor::new(
                "zonalShiftConfig",
                |s: &ClusterSpec| json(&s.zonal_shift_config),
                Equality::Nested,
            ),
            FieldDescriptor::new(
                "remoteNetworkConfig",
                |s: &ClusterSpec| json(&s.remote_network_config),
                Equality::Nested,
            ),
        ])
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        vec![
            UpdateGroup {
                category: "logging",
                paths: &["logging"],
                plan: plan_logging,
            },
            UpdateGroup {
                category: "endpoint-access",
                paths: &[
                    "resourcesVpcConfig.endpointPrivateAccess",
                    "resourcesVpcConfig.endpointPublicAccess",
                    "resourcesVpcConfig.publicAccessCidrs",
                ],
                plan: plan_endpoint_access,
            },
            UpdateGroup {
                category: "vpc-networking",
                paths: &[
                    "resourcesVpcConfig.subnetIds",
                    "resourcesVpcConfig.securityGroupIds",
                ],
                plan: plan_vpc_networking,
            },
            UpdateGroup {
                category: "access-config",
                paths: &["accessConfig"],
                plan: plan_access_config,
            },
            UpdateGroup {
                category: "upgrade-policy",
                paths: &["upgradePolicy"],
                plan: plan_upgrade_policy,
            },
            UpdateGroup {
                category: "encryption",
                paths: &["encryptionConfig"],
                plan: plan_encryption,
            },
            UpdateGroup {
                category: "version",
                paths: &["version"],
                plan: plan_version,
            },
            UpdateGroup {
                category: "compute-storage-network",
                paths: &["computeConfig", "storageConfig", "kubernetesNetworkConfig"],
                plan: plan_compute_storage_network,
            },
            UpdateGroup {
                category: "zonal-shift",
                paths: &["zonalShiftConfig"],
                plan: plan_zonal_shift,
            },
            UpdateGroup {
                category: "remote-network",
                paths: &["remoteNetworkConfig"],
                plan: plan_remote_network,
            },
        ]
    }

    fn resource_id(spec: &ClusterSpec) -> ResourceId {
        ResourceId::new(&spec.name)
    }

    fn tags(spec: &ClusterSpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(update: &ClusterUpdate) -> &'static str {
        match update {
            ClusterUpdate::Config(_) => operations::UPDATE_CLUSTER_CONFIG,
            ClusterUpdate::AssociateEncryption { .. } => operations::ASSOCIATE_ENCRYPTION_CONFIG,
            ClusterUpdate::Version { .. } => operations::UPDATE_CLUSTER_VERSION,
        }
    }

    fn check_delta(input: &PlanInput<'_, ClusterSpec>) -> Option<String> {
        immutable_changes(input.delta, IMMUTABLE)
    }

    fn is_benign_update_error(update: &ClusterUpdate, err: &RemoteError) -> bool {
        matches!(update, ClusterUpdate::Config(c) if c.logging.is_some())
            && err.message == LOGGING_NO_CHANGES
    }
}
