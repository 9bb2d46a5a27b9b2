//! Contracts for the remote resource API
//!
//! The engine never talks to a transport directly. Hosts implement
//! [`RemoteApi`] per resource kind and [`TagApi`] once; errors come back as
//! [`RemoteError`] values carrying the remote's machine-readable code.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use converge_common::RemoteError;

#[cfg(test)]
use mockall::automock;

use crate::kind::ResourceKind;

/// Remote identity of a resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource name
    pub name: String,
    /// Owning resource, e.g. the cluster a nodegroup belongs to
    pub parent: Option<String>,
}

impl ResourceId {
    /// Top-level resource
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    /// Resource nested under `parent`
    pub fn child(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}/{}", parent, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Last-known remote state of a resource
#[derive(Clone, Debug, PartialEq)]
pub struct Observed<S> {
    /// Remote configuration in the same shape as the desired spec
    pub spec: S,
    /// Raw lifecycle status string
    pub status: Option<String>,
    /// Remote resource identifier (ARN)
    pub arn: Option<String>,
    /// Current tags, or `None` when describe did not return them
    pub tags: Option<BTreeMap<String, String>>,
}

impl<S> Observed<S> {
    /// Observed state with the given status and ARN, tags unknown
    pub fn new(spec: S, status: Option<&str>, arn: Option<&str>) -> Self {
        Self {
            spec,
            status: status.map(str::to_string),
            arn: arn.map(str::to_string),
            tags: None,
        }
    }

    /// Attach the tags describe returned
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Describe/create/update/delete for one resource kind
#[async_trait]
pub trait RemoteApi<K: ResourceKind>: Send + Sync {
    /// Current remote state; `Ok(None)` when the resource does not exist
    async fn describe(&self, id: &ResourceId) -> Result<Option<Observed<K::Spec>>, RemoteError>;

    /// Create the resource from its desired spec
    ///
    /// Returns the ARN the remote assigned, when the create response
    /// carries one.
    async fn create(&self, desired: &K::Spec) -> Result<Option<String>, RemoteError>;

    /// Apply one update payload
    async fn update(&self, id: &ResourceId, update: &K::Update) -> Result<(), RemoteError>;

    /// Delete the resource
    async fn delete(&self, id: &ResourceId) -> Result<(), RemoteError>;
}

/// Tag operations keyed by resource ARN
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TagApi: Send + Sync {
    /// Current tags on a resource
    async fn list_tags(&self, arn: &str) -> Result<BTreeMap<String, String>, RemoteError>;

    /// Add or overwrite tags
    async fn tag_resource(
        &self,
        arn: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), RemoteError>;

    /// Remove tags by key
    async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<(), RemoteError>;
}

/// A failed remote call and the operation that failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallError {
    /// Remote operation name
    pub operation: &'static str,
    /// Error the remote returned
    pub source: RemoteError,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fake for [`RemoteApi`]

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Scripted remote: describe returns `observed`, calls are recorded and
    /// queued errors are returned in order
    pub struct FakeRemote<K: ResourceKind> {
        pub observed: Mutex<Option<Observed<K::Spec>>>,
        pub updates: Arc<Mutex<Vec<K::Update>>>,
        pub created: Arc<Mutex<Vec<K::Spec>>>,
        pub deleted: Arc<Mutex<Vec<ResourceId>>>,
        pub errors: Mutex<VecDeque<RemoteError>>,
        pub assigned_arn: Option<String>,
    }

    impl<K: ResourceKind> FakeRemote<K> {
        pub fn new(observed: Option<Observed<K::Spec>>) -> Self {
            Self {
                observed: Mutex::new(observed),
                updates: Arc::new(Mutex::new(Vec::new())),
                created: Arc::new(Mutex::new(Vec::new())),
                deleted: Arc::new(Mutex::new(Vec::new())),
                errors: Mutex::new(VecDeque::new()),
                assigned_arn: None,
            }
        }

        pub fn assigning_arn(mut self, arn: &str) -> Self {
            self.assigned_arn = Some(arn.to_string());
            self
        }

        pub fn failing_with(self, err: RemoteError) -> Self {
            self.errors
                .lock()
                .expect("mutex should not be poisoned")
                .push_back(err);
            self
        }

        pub fn updates(&self) -> Vec<K::Update> {
            self.updates
                .lock()
                .expect("mutex should not be poisoned")
                .clone()
        }

        fn next_error(&self) -> Option<RemoteError> {
            self.errors
                .lock()
                .expect("mutex should not be poisoned")
                .pop_front()
        }
    }

    #[async_trait]
    impl<K: ResourceKind> RemoteApi<K> for FakeRemote<K> {
        async fn describe(
            &self,
            _id: &ResourceId,
        ) -> Result<Option<Observed<K::Spec>>, RemoteError> {
            Ok(self
                .observed
                .lock()
                .expect("mutex should not be poisoned")
                .clone())
        }

        async fn create(&self, desired: &K::Spec) -> Result<Option<String>, RemoteError> {
            if let Some(err) = self.next_error() {
                return Err(err);
            }
            self.created
                .lock()
                .expect("mutex should not be poisoned")
                .push(desired.clone());
            Ok(self.assigned_arn.clone())
        }

        async fn update(&self, _id: &ResourceId, update: &K::Update) -> Result<(), RemoteError> {
            if let Some(err) = self.next_error() {
                return Err(err);
            }
            self.updates
                .lock()
                .expect("mutex should not be poisoned")
                .push(update.clone());
            Ok(())
        }

        async fn delete(&self, id: &ResourceId) -> Result<(), RemoteError> {
            if let Some(err) = self.next_error() {
                return Err(err);
            }
            self.deleted
                .lock()
                .expect("mutex should not be poisoned")
                .push(id.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_display_includes_parent() {
        assert_eq!(ResourceId::new("prod").to_string(), "prod");
        assert_eq!(ResourceId::child("prod", "workers").to_string(), "prod/workers");
    }

    #[test]
    fn observed_builder_keeps_tags_optional() {
        let observed = Observed::new((), Some("ACTIVE"), Some("arn:aws:eks:::cluster/prod"));
        assert_eq!(observed.tags, None);
        let observed = observed.with_tags(BTreeMap::from([("a".to_string(), "b".to_string())]));
        assert_eq!(observed.tags.map(|t| t.len()), Some(1));
    }
}
