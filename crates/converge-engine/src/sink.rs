//! Publishing verdict conditions to the status subresource

use async_trait::async_trait;
use converge_common::condition::conditions_changed;
use converge_common::{Condition, Result};
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::verdict::RemediationVerdict;

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "converge-engine";

/// Where verdict conditions end up
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConditionSink: Send + Sync {
    /// Replace the conditions on the named object
    async fn publish<'a>(
        &self,
        name: &str,
        namespace: Option<&'a str>,
        conditions: &[Condition],
    ) -> Result<()>;
}

/// Writes conditions with a merge patch on `status.conditions`
pub struct KubeConditionSink {
    client: Client,
    resource: ApiResource,
}

impl KubeConditionSink {
    /// Sink for objects of the given API resource
    pub fn new(client: Client, resource: ApiResource) -> Self {
        Self { client, resource }
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        }
    }
}

#[async_trait]
impl ConditionSink for KubeConditionSink {
    async fn publish<'a>(
        &self,
        name: &str,
        namespace: Option<&'a str>,
        conditions: &[Condition],
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": { "conditions": conditions } });
        self.api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Publish the verdict's conditions unless `current` already says the same
///
/// Returns whether a write happened.
pub async fn publish_verdict(
    sink: &dyn ConditionSink,
    name: &str,
    namespace: Option<&str>,
    current: &[Condition],
    verdict: &RemediationVerdict,
) -> Result<bool> {
    let next = verdict.conditions();
    if !conditions_changed(current, &next) {
        debug!(name, "conditions unchanged, skipping status write");
        return Ok(false);
    }
    sink.publish(name, namespace, &next).await?;
    Ok(true)
}
