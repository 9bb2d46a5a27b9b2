//! Fargate profile binding
//!
//! Fargate profiles cannot be modified after creation. Only tags sync;
//! any other difference is terminal until the user recreates the profile.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor};
use crate::kind::{Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::{Phase, StatusClassifier};

use super::StringMap;

/// Message for any non-tag change
pub const UNABLE_TO_UPDATE: &str = "changes to fargate profile resources are not currently \
                                    possible; delete and recreate the resource";

/// Pod selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FargateProfileSelector {
    /// Namespace pods must run in
    pub namespace: String,
    /// Labels pods must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<StringMap>,
}

/// Desired/observed fargate profile
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FargateProfileSpec {
    /// Profile name
    pub name: String,
    /// Owning cluster
    pub cluster_name: String,
    /// Pod execution role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_execution_role_arn: Option<String>,
    /// Private subnets for pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
    /// Pod selectors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<FargateProfileSelector>,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

/// Fargate profiles have no update calls
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FargateProfileUpdate {}

/// Binding for fargate profiles
pub struct FargateProfile;

impl ResourceKind for FargateProfile {
    type Spec = FargateProfileSpec;
    type Update = FargateProfileUpdate;

    const KIND: &'static str = "FargateProfile";
    const OPERATIONS: Operations = Operations {
        describe: "DescribeFargateProfile",
        create: "CreateFargateProfile",
        delete: "DeleteFargateProfile",
    };

    fn status_classifier() -> StatusClassifier {
        StatusClassifier::new(Self::KIND, &[Phase::CreateFailed, Phase::DeleteFailed])
    }

    fn delta_computer() -> DeltaComputer<FargateProfileSpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new(
                "name",
                |s: &FargateProfileSpec| json(&s.name),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "clusterName",
                |s: &FargateProfileSpec| json(&s.cluster_name),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "podExecutionRoleArn",
                |s: &FargateProfileSpec| json(&s.pod_execution_role_arn),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "subnets",
                |s: &FargateProfileSpec| json(&s.subnets),
                Equality::Set,
            ),
            FieldDescriptor::new(
                "selectors",
                |s: &FargateProfileSpec| json(&s.selectors),
                Equality::Set,
            ),
        ])
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        Vec::new()
    }

    fn resource_id(spec: &FargateProfileSpec) -> ResourceId {
        ResourceId::child(&spec.cluster_name, &spec.name)
    }

    fn tags(spec: &FargateProfileSpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(update: &FargateProfileUpdate) -> &'static str {
        match *update {}
    }

    fn check_delta(input: &PlanInput<'_, FargateProfileSpec>) -> Option<String> {
        (!input.delta.is_empty()).then(|| UNABLE_TO_UPDATE.to_string())
    }
}
