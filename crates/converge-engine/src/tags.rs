//! Tag synchronization
//!
//! Tags are reconciled as an in-place keyed set: one `tag_resource` call
//! for added or changed keys and one `untag_resource` call for removed
//! keys. Tag changes are synchronous and never move the resource into an
//! updating state.

use std::collections::BTreeMap;

use converge_common::metrics::{MetricsRecorder, OperationKind};
use tracing::debug;

use crate::keyed_set::reconcile_map;
use crate::remote::{CallError, TagApi};

/// Remote operation names used by tag sync
pub mod operations {
    /// Read current tags
    pub const LIST_TAGS: &str = "ListTagsForResource";
    /// Add or overwrite tags
    pub const TAG_RESOURCE: &str = "TagResource";
    /// Remove tags
    pub const UNTAG_RESOURCE: &str = "UntagResource";
}

/// What a tag sync changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSyncOutcome {
    /// Keys added or overwritten
    pub written: Vec<String>,
    /// Keys removed
    pub removed: Vec<String>,
}

impl TagSyncOutcome {
    /// Nothing was sent
    pub fn is_noop(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }
}

/// Read the current tags of `arn`, recording the call
pub async fn read_tags(
    api: &dyn TagApi,
    metrics: &dyn MetricsRecorder,
    arn: &str,
) -> Result<BTreeMap<String, String>, CallError> {
    let result = api.list_tags(arn).await;
    metrics.record(
        OperationKind::ReadMany,
        operations::LIST_TAGS,
        result.as_ref().err(),
    );
    result.map_err(|source| CallError {
        operation: operations::LIST_TAGS,
        source,
    })
}

/// Make the tags on `arn` equal `desired`
pub async fn sync_tags(
    api: &dyn TagApi,
    metrics: &dyn MetricsRecorder,
    arn: &str,
    desired: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> Result<TagSyncOutcome, CallError> {
    let plan = reconcile_map(desired, observed);
    if plan.is_empty() {
        return Ok(TagSyncOutcome::default());
    }

    let to_write: BTreeMap<String, String> = plan
        .to_add
        .iter()
        .cloned()
        .chain(plan.to_update.iter().map(|(pair, _)| pair.clone()))
        .collect();

    if !to_write.is_empty() {
        let result = api.tag_resource(arn, &to_write).await;
        metrics.record(
            OperationKind::Update,
            operations::TAG_RESOURCE,
            result.as_ref().err(),
        );
        result.map_err(|source| CallError {
            operation: operations::TAG_RESOURCE,
            source,
        })?;
    }

    if !plan.to_remove.is_empty() {
        let result = api.untag_resource(arn, &plan.to_remove).await;
        metrics.record(
            OperationKind::Update,
            operations::UNTAG_RESOURCE,
            result.as_ref().err(),
        );
        result.map_err(|source| CallError {
            operation: operations::UNTAG_RESOURCE,
            source,
        })?;
    }

    debug!(
        arn,
        written = to_write.len(),
        removed = plan.to_remove.len(),
        "synchronized tags"
    );

    Ok(TagSyncOutcome {
        written: to_write.into_keys().collect(),
        removed: plan.to_remove,
    })
}
