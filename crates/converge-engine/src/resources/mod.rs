//! Resource kind bindings
//!
//! One module per managed resource type. Each module defines the spec
//! shape, its field table, the update groups in priority order and the
//! payload builders that turn a delta into remote calls.

pub mod access_entry;
pub mod addon;
pub mod capability;
pub mod cluster;
pub mod fargate_profile;
pub mod identity_provider_config;
pub mod nodegroup;
pub mod pod_identity_association;

use std::collections::BTreeMap;

pub use access_entry::AccessEntry;
pub use addon::Addon;
pub use capability::Capability;
pub use cluster::Cluster;
pub use fargate_profile::FargateProfile;
pub use identity_provider_config::IdentityProviderConfig;
pub use nodegroup::Nodegroup;
pub use pod_identity_association::PodIdentityAssociation;

/// String-to-string map used for tags and labels
pub type StringMap = BTreeMap<String, String>;

/// Treat an absent collection as empty
pub(crate) fn or_empty(map: Option<&StringMap>) -> StringMap {
    map.cloned().unwrap_or_default()
}
