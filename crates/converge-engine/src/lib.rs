//! Declarative convergence engine
//!
//! Given the desired state of a managed remote resource and its last
//! observed state, the engine computes a field-level delta, decides what is
//! safe to change given the resource's lifecycle status, and performs at
//! most one category of remote change per pass. Callers run passes
//! repeatedly, each on fresh observed state, until the verdict is
//! `Converged` or `Terminal`.
//!
//! The moving parts:
//!
//! - [`delta`]: field-descriptor driven diffing with nil/zero and
//!   order-insensitive equality, plus post-compare policies
//! - [`keyed_set`]: add/update/remove plans for keyed collections
//! - [`tags`]: tag synchronization on top of keyed-set plans
//! - [`classify`]: remote error classification and retry hints
//! - [`orchestrator`] and [`lifecycle`]: the remediation state machine
//! - [`resources`]: bindings for clusters, nodegroups, addons, access
//!   entries, fargate profiles, capabilities, pod identity associations
//!   and identity provider configs
//! - [`verdict`] and [`sink`]: verdicts, conditions and requeue actions

#![deny(missing_docs)]

pub mod classify;
pub mod delta;
pub mod keyed_set;
pub mod kind;
pub mod lifecycle;
pub mod orchestrator;
pub mod remote;
pub mod resources;
pub mod sink;
pub mod status;
pub mod tags;
pub mod verdict;
pub mod version;

pub use classify::{Classification, ErrorClassifier, RetryDirective};
pub use delta::{Delta, DeltaComputer, Difference, Equality, FieldDescriptor};
pub use keyed_set::{reconcile, reconcile_map, SetReconciliationPlan, UpdateMode};
pub use kind::{GroupPlan, ResourceKind, UpdateGroup};
pub use orchestrator::{Desired, Orchestrator, OrchestratorBuilder, Remediation};
pub use remote::{Observed, RemoteApi, ResourceId, TagApi};
pub use sink::{publish_verdict, ConditionSink, KubeConditionSink};
pub use status::{Phase, StatusClassifier};
pub use tags::sync_tags;
pub use verdict::{error_policy, RemediationVerdict};
pub use version::{next_step, MinorVersion, VersionStep};
