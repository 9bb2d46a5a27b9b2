//! OIDC identity provider config binding
//!
//! A config is associated with a cluster on create and disassociated on
//! delete. The remote has no update call, so only tags sync; any other
//! difference is terminal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::delta::{json, DeltaComputer, Equality, FieldDescriptor};
use crate::kind::{Operations, PlanInput, ResourceKind, UpdateGroup};
use crate::remote::ResourceId;
use crate::status::StatusClassifier;

use super::StringMap;

/// Message for any non-tag change
pub const UNABLE_TO_UPDATE: &str = "changes to identity provider configs are not currently \
                                    possible; delete and recreate the resource";

/// OIDC provider settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    /// Config name, unique within the cluster
    pub identity_provider_config_name: String,
    /// Issuer URL
    #[serde(rename = "issuerURL", default, skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,
    /// Client id tokens are issued for
    #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Claim used as the username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_claim: Option<String>,
    /// Prefix added to usernames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_prefix: Option<String>,
    /// Claim used for groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_claim: Option<String>,
    /// Prefix added to group names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_prefix: Option<String>,
    /// Claims a token must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_claims: Option<StringMap>,
}

/// Desired/observed identity provider config
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProviderConfigSpec {
    /// Owning cluster
    pub cluster_name: String,
    /// OIDC settings
    pub oidc: OidcConfig,
    /// Resource tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<StringMap>,
}

/// Identity provider configs have no update calls
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityProviderConfigUpdate {}

/// Binding for OIDC identity provider configs
pub struct IdentityProviderConfig;

impl ResourceKind for IdentityProviderConfig {
    type Spec = IdentityProviderConfigSpec;
    type Update = IdentityProviderConfigUpdate;

    const KIND: &'static str = "IdentityProviderConfig";
    const OPERATIONS: Operations = Operations {
        describe: "DescribeIdentityProviderConfig",
        create: "AssociateIdentityProviderConfig",
        delete: "DisassociateIdentityProviderConfig",
    };

    // The remote only reports CREATING, ACTIVE and DELETING
    fn status_classifier() -> StatusClassifier {
        StatusClassifier::new(Self::KIND, &[])
    }

    fn delta_computer() -> DeltaComputer<IdentityProviderConfigSpec> {
        DeltaComputer::new(vec![
            FieldDescriptor::new(
                "clusterName",
                |s: &IdentityProviderConfigSpec| json(&s.cluster_name),
                Equality::Scalar,
            ),
            FieldDescriptor::new(
                "oidc",
                |s: &IdentityProviderConfigSpec| json(&s.oidc),
                Equality::Nested,
            ),
        ])
    }

    fn update_groups() -> Vec<UpdateGroup<Self>> {
        Vec::new()
    }

    fn resource_id(spec: &IdentityProviderConfigSpec) -> ResourceId {
        ResourceId::child(&spec.cluster_name, &spec.oidc.identity_provider_config_name)
    }

    fn tags(spec: &IdentityProviderConfigSpec) -> Option<&StringMap> {
        spec.tags.as_ref()
    }

    fn update_operation(update: &IdentityProviderConfigUpdate) -> &'static str {
        match *update {}
    }

    fn check_delta(input: &PlanInput<'_, IdentityProviderConfigSpec>) -> Option<String> {
        (!input.delta.is_empty()).then(|| UNABLE_TO_UPDATE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use converge_common::metrics::InMemoryMetricsRecorder;

    use crate::orchestrator::{Desired, Orchestrator};
    use crate::remote::testing::FakeRemote;
    use crate::remote::{MockTagApi, Observed};
    use crate::verdict::RemediationVerdict;

    const ARN: &str =
        "arn:aws:eks:us-west-2:123456789012:identityproviderconfig/prod/oidc/corp/abc";

    fn corp() -> IdentityProviderConfigSpec {
        IdentityProviderConfigSpec {
            cluster_name: "prod".to_string(),
            oidc: OidcConfig {
                identity_provider_config_name: "corp".to_string(),
                issuer_url: Some("https://sso.example.com".to_string()),
                client_id: Some("kubernetes".to_string()),
                required_claims: Some(StringMap::from([("hd".to_string(), "example.com".to_string())])),
                ..Default::default()
            },
            tags: None,
        }
    }

    async fn remediate(
        desired: IdentityProviderConfigSpec,
        status: &str,
    ) -> RemediationVerdict {
        let orchestrator = Orchestrator::builder(
            Arc::new(FakeRemote::<IdentityProviderConfig>::new(None)),
            Arc::new(MockTagApi::new()),
        )
        .metrics(Arc::new(InMemoryMetricsRecorder::default()))
        .build();
        let observed = Observed::new(corp(), Some(status), Some(ARN)).with_tags(StringMap::new());
        orchestrator
            .remediate(&Desired::new(desired), &observed)
            .await
            .expect("pass succeeds")
            .verdict
    }

    #[test]
    fn serialized_field_names_match_the_remote() {
        let value = json(&corp().oidc);
        assert_eq!(value["issuerURL"], "https://sso.example.com");
        assert_eq!(value["clientID"], "kubernetes");
    }

    /// Story: the user changes the username claim and is told the config
    /// must be recreated
    #[tokio::test]
    async fn story_claim_change_is_terminal() {
        let mut desired = corp();
        desired.oidc.username_claim = Some("email".to_string());

        assert_eq!(
            remediate(desired, "ACTIVE").await,
            RemediationVerdict::terminal(UNABLE_TO_UPDATE)
        );
    }

    #[tokio::test]
    async fn unchanged_config_converges() {
        assert_eq!(remediate(corp(), "ACTIVE").await, RemediationVerdict::Converged);
    }

    #[tokio::test]
    async fn creating_config_waits() {
        assert_eq!(
            remediate(corp(), "CREATING").await,
            RemediationVerdict::wait(
                "IdentityProviderConfig in 'CREATING' state, cannot be modified until 'ACTIVE'",
                Duration::from_secs(30)
            )
        );
    }
}
