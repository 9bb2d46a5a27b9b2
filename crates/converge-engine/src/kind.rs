//! Resource kind bindings
//!
//! A [`ResourceKind`] tells the orchestrator everything that differs
//! between resource types: the spec shape, how to diff it, which statuses
//! are terminal, and the ordered list of update groups with their payload
//! builders.

use std::collections::BTreeMap;
use std::fmt::Debug;

use converge_common::{Annotations, RemoteError};

use crate::delta::{Delta, DeltaComputer};
use crate::remote::ResourceId;
use crate::status::StatusClassifier;

/// Remote operation names used for metrics and error context
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operations {
    /// Describe call
    pub describe: &'static str,
    /// Create call
    pub create: &'static str,
    /// Delete call
    pub delete: &'static str,
}

/// Everything a payload builder may look at
pub struct PlanInput<'a, S> {
    /// Desired spec
    pub desired: &'a S,
    /// Observed spec
    pub observed: &'a S,
    /// Delta after post-compare policies
    pub delta: &'a Delta,
    /// Annotations on the desired object
    pub annotations: &'a Annotations,
}

/// What an update group wants to do this pass
#[derive(Clone, Debug, PartialEq)]
pub enum GroupPlan<U> {
    /// Issue these calls in order
    Calls(Vec<U>),
    /// The requested transition is invalid; stop with this message
    Terminal(String),
    /// Nothing to send after all; try the next group
    Skip,
}

/// One category of remote change, applied at most once per pass
pub struct UpdateGroup<K: ResourceKind> {
    /// Category reported in `Applied(category)`
    pub category: &'static str,
    /// Field paths that belong to this group
    pub paths: &'static [&'static str],
    /// Payload builder
    pub plan: fn(&PlanInput<'_, K::Spec>) -> GroupPlan<K::Update>,
}

impl<K: ResourceKind> UpdateGroup<K> {
    /// Whether the delta touches this group
    pub fn matches(&self, delta: &Delta) -> bool {
        self.paths.iter().any(|p| delta.different_at(p))
    }
}

/// Binding between the generic engine and one resource type
pub trait ResourceKind: Send + Sync + Sized + 'static {
    /// Desired/observed spec
    type Spec: Clone + Debug + Send + Sync + 'static;
    /// One remote update call with its payload
    type Update: Clone + Debug + PartialEq + Send + Sync + 'static;

    /// Kind name, e.g. `Nodegroup`
    const KIND: &'static str;
    /// Remote operation names
    const OPERATIONS: Operations;
    /// Updates run asynchronously and move the resource to Updating
    const ASYNC_UPDATES: bool = true;

    /// Terminal-set classification for this kind
    fn status_classifier() -> StatusClassifier;

    /// Field table and post-compare policies; tags are handled separately
    fn delta_computer() -> DeltaComputer<Self::Spec>;

    /// Update groups in priority order
    fn update_groups() -> Vec<UpdateGroup<Self>>;

    /// Remote identity of a spec
    fn resource_id(spec: &Self::Spec) -> ResourceId;

    /// Desired tags; `None` means the user set none
    fn tags(spec: &Self::Spec) -> Option<&BTreeMap<String, String>>;

    /// Remote operation name for an update payload
    fn update_operation(update: &Self::Update) -> &'static str;

    /// Reject a delta outright (e.g. immutable fields); runs before groups
    fn check_delta(_input: &PlanInput<'_, Self::Spec>) -> Option<String> {
        None
    }

    /// A remote rejection that actually means "nothing to change"
    fn is_benign_update_error(_update: &Self::Update, _err: &RemoteError) -> bool {
        false
    }
}

/// Message listing modified immutable paths, or `None` if none changed
pub fn immutable_changes(delta: &Delta, immutable: &[&str]) -> Option<String> {
    let changed: Vec<&str> = immutable
        .iter()
        .flat_map(|prefix| delta.paths_under(prefix))
        .collect();
    if changed.is_empty() {
        None
    } else {
        Some(format!(
            "Immutable spec fields have been modified: {}",
            changed.join(",")
        ))
    }
}
