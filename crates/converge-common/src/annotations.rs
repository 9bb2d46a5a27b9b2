//! Out-of-band signals carried as annotations on the desired object
//!
//! The engine consults two signals: who owns a nodegroup's desired size,
//! and whether a version update should be forced past remote safety checks.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Annotation marking which controller owns `scalingConfig.desiredSize`
pub const DESIRED_SIZE_MANAGED_BY: &str = "converge.dev/desired-size-managed-by";

/// Value of [`DESIRED_SIZE_MANAGED_BY`] handing desired size to an autoscaler
pub const MANAGED_BY_EXTERNAL_AUTOSCALER: &str = "external-autoscaler";

/// Value of [`DESIRED_SIZE_MANAGED_BY`] keeping desired size with this engine
pub const MANAGED_BY_CONTROLLER: &str = "converge-controller";

/// Annotation forcing a nodegroup version update (boolean string)
pub const FORCE_UPDATE_VERSION: &str = "converge.dev/force-update-version";

/// Owner of a field that can be handed to another controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FieldOwner {
    /// The engine reconciles the field
    #[default]
    Controller,
    /// Another controller writes the field; the engine must not fight it
    External,
}

/// Read-only view over an object's annotations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Annotations(BTreeMap<String, String>);

impl Annotations {
    /// Wrap an annotation map
    pub fn new(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    /// Copy the annotations off an object's metadata
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self(meta.annotations.clone().unwrap_or_default())
    }

    /// Builder-style insert, mostly for tests and callers without ObjectMeta
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Raw annotation value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Boolean flag; missing or unparseable values are `false`
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(parse_bool).unwrap_or(false)
    }

    /// Who owns the nodegroup desired size
    ///
    /// Anything other than the external-autoscaler marker leaves the
    /// field with the engine.
    pub fn desired_size_owner(&self) -> FieldOwner {
        match self.get(DESIRED_SIZE_MANAGED_BY) {
            Some(MANAGED_BY_EXTERNAL_AUTOSCALER) => FieldOwner::External,
            _ => FieldOwner::Controller,
        }
    }

    /// Whether version updates should be forced
    pub fn force_update_version(&self) -> bool {
        self.flag(FORCE_UPDATE_VERSION)
    }
}

impl From<BTreeMap<String, String>> for Annotations {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Accepts the usual boolean spellings: 1/0, t/f, true/false in any case
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::lowercase("true", true)]
    #[case::uppercase("TRUE", true)]
    #[case::numeric("1", true)]
    #[case::short("t", true)]
    #[case::explicit_false("false", false)]
    #[case::garbage("yes please", false)]
    #[case::empty("", false)]
    fn force_flag_parsing(#[case] raw: &str, #[case] expected: bool) {
        let annotations = Annotations::default().with(FORCE_UPDATE_VERSION, raw);
        assert_eq!(annotations.force_update_version(), expected);
    }

    #[test]
    fn missing_force_flag_is_false() {
        assert!(!Annotations::default().force_update_version());
    }

    #[rstest]
    #[case::autoscaler(Some(MANAGED_BY_EXTERNAL_AUTOSCALER), FieldOwner::External)]
    #[case::controller(Some(MANAGED_BY_CONTROLLER), FieldOwner::Controller)]
    #[case::unknown_value(Some("karpenter"), FieldOwner::Controller)]
    #[case::absent(None, FieldOwner::Controller)]
    fn desired_size_ownership(#[case] value: Option<&str>, #[case] expected: FieldOwner) {
        let mut annotations = Annotations::default();
        if let Some(v) = value {
            annotations = annotations.with(DESIRED_SIZE_MANAGED_BY, v);
        }
        assert_eq!(annotations.desired_size_owner(), expected);
    }

    #[test]
    fn reads_from_object_meta() {
        let meta = ObjectMeta {
            name: Some("workers".to_string()),
            annotations: Some(BTreeMap::from([(
                DESIRED_SIZE_MANAGED_BY.to_string(),
                MANAGED_BY_EXTERNAL_AUTOSCALER.to_string(),
            )])),
            ..Default::default()
        };
        let annotations = Annotations::from_meta(&meta);
        assert_eq!(annotations.desired_size_owner(), FieldOwner::External);

        let bare = Annotations::from_meta(&ObjectMeta::default());
        assert_eq!(bare, Annotations::default());
    }
}
