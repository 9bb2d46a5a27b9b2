//! Field delta computation
//!
//! Each resource kind declares a table of [`FieldDescriptor`]s: a field path,
//! an accessor that renders the field as JSON, and the equality rule for it.
//! [`DeltaComputer`] walks the table generically and then runs the kind's
//! post-compare policies (e.g. stripping fields owned by another controller).
//!
//! Equality is null-aware everywhere: an unset value equals the zero value
//! of its type (`""`, `0`, `false`, `[]`, `{}`).

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use converge_common::{Annotations, FieldOwner};

/// One disagreement between desired and observed state
#[derive(Clone, Debug, PartialEq)]
pub struct Difference {
    /// Dotted field path, e.g. `scalingConfig.desiredSize`
    pub path: String,
    /// Desired value as JSON
    pub desired: Value,
    /// Observed value as JSON
    pub observed: Value,
}

/// Ordered set of differences; a path appears at most once
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delta {
    differences: Vec<Difference>,
}

impl Delta {
    /// Empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a difference. A path already present is left untouched.
    pub fn add(&mut self, path: impl Into<String>, desired: Value, observed: Value) {
        let path = path.into();
        if self.differences.iter().any(|d| d.path == path) {
            return;
        }
        self.differences.push(Difference {
            path,
            desired,
            observed,
        });
    }

    /// No differences at all
    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    /// Number of differing paths
    pub fn len(&self) -> usize {
        self.differences.len()
    }

    /// Differences in the order they were found
    pub fn iter(&self) -> impl Iterator<Item = &Difference> {
        self.differences.iter()
    }

    /// Differing paths in order
    pub fn paths(&self) -> Vec<&str> {
        self.differences.iter().map(|d| d.path.as_str()).collect()
    }

    /// Difference at exactly this path
    pub fn get(&self, path: &str) -> Option<&Difference> {
        self.differences.iter().find(|d| d.path == path)
    }

    /// Whether anything differs at `prefix` or below it
    pub fn different_at(&self, prefix: &str) -> bool {
        self.differences.iter().any(|d| path_under(&d.path, prefix))
    }

    /// Whether anything differs outside all of `prefixes`
    pub fn different_except(&self, prefixes: &[&str]) -> bool {
        self.differences
            .iter()
            .any(|d| !prefixes.iter().any(|p| path_under(&d.path, p)))
    }

    /// Paths at or below `prefix`
    pub fn paths_under(&self, prefix: &str) -> Vec<&str> {
        self.differences
            .iter()
            .filter(|d| path_under(&d.path, prefix))
            .map(|d| d.path.as_str())
            .collect()
    }

    /// Drop every difference at or below `prefix`; returns how many went
    pub fn strip(&mut self, prefix: &str) -> usize {
        let before = self.differences.len();
        self.differences.retain(|d| !path_under(&d.path, prefix));
        before - self.differences.len()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.paths().join(","))
    }
}

/// `a.b.c` is under `a.b` and `a.b.c`, but not under `a.bc`
pub fn path_under(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.')
}

/// How two renderings of a field are compared
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Equality {
    /// Whole-value compare; unset equals zero value. Used for scalars and
    /// for structures that are only ever replaced as a unit.
    Scalar,
    /// Recurse into objects and report leaf paths; arrays found while
    /// recursing compare as unordered collections
    Nested,
    /// Unordered map: same key set, equal values per key
    Map,
    /// Unordered list: same length, every element matched structurally
    Set,
}

/// One row of a kind's field table
pub struct FieldDescriptor<S> {
    /// Top-level path, in the spec's serialized (camelCase) spelling
    pub path: &'static str,
    /// Renders the field from a spec
    pub accessor: fn(&S) -> Value,
    /// Comparison rule
    pub equality: Equality,
    /// Compare only when the desired side sets a non-zero value
    pub explicit_only: bool,
}

impl<S> FieldDescriptor<S> {
    /// Descriptor compared in both directions
    pub fn new(path: &'static str, accessor: fn(&S) -> Value, equality: Equality) -> Self {
        Self {
            path,
            accessor,
            equality,
            explicit_only: false,
        }
    }

    /// Only compare when the user set the field; the remote side fills
    /// in a server default otherwise
    pub fn explicit_only(mut self) -> Self {
        self.explicit_only = true;
        self
    }
}

/// Render any serializable value for an accessor
pub fn json<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Post-compare hook that may strip paths based on out-of-band signals
pub trait DeltaPolicy: Send + Sync {
    /// Adjust the raw delta in place
    fn apply(&self, delta: &mut Delta, annotations: &Annotations);
}

/// Strips a path when another controller owns it
pub struct StripExternallyOwned {
    path: &'static str,
    owner: fn(&Annotations) -> FieldOwner,
}

impl StripExternallyOwned {
    /// Strip `path` whenever `owner` reports [`FieldOwner::External`]
    pub fn new(path: &'static str, owner: fn(&Annotations) -> FieldOwner) -> Self {
        Self { path, owner }
    }
}

impl DeltaPolicy for StripExternallyOwned {
    fn apply(&self, delta: &mut Delta, annotations: &Annotations) {
        if (self.owner)(annotations) == FieldOwner::External {
            let stripped = delta.strip(self.path);
            if stripped > 0 {
                tracing::debug!(path = self.path, "ignoring difference on externally owned field");
            }
        }
    }
}

/// Walks a field table and applies post-compare policies
pub struct DeltaComputer<S> {
    fields: Vec<FieldDescriptor<S>>,
    policies: Vec<Box<dyn DeltaPolicy>>,
}

impl<S> DeltaComputer<S> {
    /// Computer over the given table, without policies
    pub fn new(fields: Vec<FieldDescriptor<S>>) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                fields.iter().all(|f| seen.insert(f.path))
            },
            "field table has duplicate paths"
        );
        Self {
            fields,
            policies: Vec::new(),
        }
    }

    /// Add a post-compare policy; policies run in insertion order
    pub fn with_policy(mut self, policy: impl DeltaPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    /// Paths declared in the table
    pub fn paths(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.path).collect()
    }

    /// Delta before any policy runs
    pub fn raw(&self, desired: &S, observed: &S) -> Delta {
        let mut delta = Delta::new();
        for field in &self.fields {
            let d = (field.accessor)(desired);
            if field.explicit_only && is_zero(&d) {
                continue;
            }
            let o = (field.accessor)(observed);
            match field.equality {
                Equality::Nested => compare_nested(field.path, &d, &o, &mut delta),
                Equality::Scalar => push_if(!structural_eq(&d, &o), field.path, d, o, &mut delta),
                Equality::Map => push_if(!map_eq(&d, &o), field.path, d, o, &mut delta),
                Equality::Set => push_if(!unordered_eq(&d, &o), field.path, d, o, &mut delta),
            }
        }
        delta
    }

    /// Delta after post-compare policies
    pub fn compute(&self, desired: &S, observed: &S, annotations: &Annotations) -> Delta {
        let mut delta = self.raw(desired, observed);
        for policy in &self.policies {
            policy.apply(&mut delta, annotations);
        }
        delta
    }
}

fn push_if(differs: bool, path: &str, desired: Value, observed: Value, delta: &mut Delta) {
    if differs {
        delta.add(path, desired, observed);
    }
}

fn compare_nested(path: &str, desired: &Value, observed: &Value, delta: &mut Delta) {
    let empty = Map::new();
    let (Some(d), Some(o)) = (object_or_empty(desired, &empty), object_or_empty(observed, &empty))
    else {
        push_if(
            !structural_eq(desired, observed),
            path,
            desired.clone(),
            observed.clone(),
            delta,
        );
        return;
    };

    let keys: BTreeSet<&String> = d.keys().chain(o.keys()).collect();
    for key in keys {
        let dv = d.get(key).unwrap_or(&Value::Null);
        let ov = o.get(key).unwrap_or(&Value::Null);
        let child = format!("{path}.{key}");
        if dv.is_object() || ov.is_object() {
            compare_nested(&child, dv, ov, delta);
        } else if dv.is_array() || ov.is_array() {
            push_if(!unordered_eq(dv, ov), &child, dv.clone(), ov.clone(), delta);
        } else {
            push_if(!structural_eq(dv, ov), &child, dv.clone(), ov.clone(), delta);
        }
    }
}

fn object_or_empty<'a>(value: &'a Value, empty: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
    match value {
        Value::Null => Some(empty),
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Zero value of its JSON type (or null)
pub fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Null-aware deep equality; arrays are ordered
pub fn structural_eq(a: &Value, b: &Value) -> bool {
    if is_zero(a) && is_zero(b) {
        return true;
    }
    let empty = Map::new();
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| structural_eq(l, r))
        }
        (Value::Object(_), _) | (_, Value::Object(_)) => {
            match (object_or_empty(a, &empty), object_or_empty(b, &empty)) {
                (Some(l), Some(r)) => l
                    .keys()
                    .chain(r.keys())
                    .all(|k| {
                        structural_eq(
                            l.get(k).unwrap_or(&Value::Null),
                            r.get(k).unwrap_or(&Value::Null),
                        )
                    }),
                _ => false,
            }
        }
        _ => a == b,
    }
}

/// Unordered map equality; null equals the empty map
pub fn map_eq(a: &Value, b: &Value) -> bool {
    let empty = Map::new();
    match (object_or_empty(a, &empty), object_or_empty(b, &empty)) {
        (Some(l), Some(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(k, v)| r.get(k).is_some_and(|other| structural_eq(v, other)))
        }
        _ => structural_eq(a, b),
    }
}

/// Multiset equality over arrays; null equals the empty list
pub fn unordered_eq(a: &Value, b: &Value) -> bool {
    let (Some(left), Some(right)) = (as_items(a), as_items(b)) else {
        return structural_eq(a, b);
    };
    if left.len() != right.len() {
        return false;
    }
    let mut used = vec![false; right.len()];
    left.iter().all(|item| {
        let found = right
            .iter()
            .enumerate()
            .find(|(i, candidate)| !used[*i] && structural_eq(item, candidate))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

fn as_items(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Null => Some(&[][..]),
        Value::Array(items) => Some(items.as_slice()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use serde_json::json as j;
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Network {
        #[serde(skip_serializing_if = "Option::is_none")]
        service_cidr: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip_family: Option<String>,
        #[serde(default)]
        subnets: Vec<String>,
    }

    #[derive(Clone, Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Taint {
        key: String,
        value: Option<String>,
        effect: Option<String>,
    }

    #[derive(Clone, Debug, Default)]
    struct Spec {
        name: Option<String>,
        size: Option<i64>,
        version: Option<String>,
        tags: Option<BTreeMap<String, String>>,
        network: Option<Network>,
        taints: Vec<Taint>,
    }

    fn table() -> Vec<FieldDescriptor<Spec>> {
        vec![
            FieldDescriptor::new("name", |s: &Spec| json(&s.name), Equality::Scalar),
            FieldDescriptor::new("size", |s: &Spec| json(&s.size), Equality::Scalar),
            FieldDescriptor::new("version", |s: &Spec| json(&s.version), Equality::Scalar)
                .explicit_only(),
            FieldDescriptor::new("tags", |s: &Spec| json(&s.tags), Equality::Map),
            FieldDescriptor::new("network", |s: &Spec| json(&s.network), Equality::Nested),
            FieldDescriptor::new("taints", |s: &Spec| json(&s.taints), Equality::Set),
        ]
    }

    fn tags(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn taint(key: &str, value: &str) -> Taint {
        Taint {
            key: key.to_string(),
            value: Some(value.to_string()),
            effect: Some("NO_SCHEDULE".to_string()),
        }
    }

    mod equality_rules {
        use super::*;

        /// Story: an unset field and its zero value are the same thing
        #[test]
        fn unset_and_zero_value_agree() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                name: Some(String::new()),
                size: Some(0),
                tags: Some(BTreeMap::new()),
                ..Default::default()
            };
            let delta = computer.raw(&desired, &Spec::default());
            assert!(delta.is_empty(), "unexpected delta: {delta}");
        }

        #[test]
        fn set_values_compare_by_value() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                size: Some(3),
                ..Default::default()
            };
            let observed = Spec {
                size: Some(2),
                ..Default::default()
            };
            let delta = computer.raw(&desired, &observed);
            assert_eq!(delta.paths(), vec!["size"]);
            let diff = delta.get("size").expect("size differs");
            assert_eq!(diff.desired, j!(3));
            assert_eq!(diff.observed, j!(2));
        }

        /// Story: tag maps built in different orders are still equal
        #[test]
        fn maps_ignore_insertion_order() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                tags: tags(&[("team", "infra"), ("env", "prod")]),
                ..Default::default()
            };
            let observed = Spec {
                tags: tags(&[("env", "prod"), ("team", "infra")]),
                ..Default::default()
            };
            assert!(computer.raw(&desired, &observed).is_empty());
            assert!(computer.raw(&observed, &desired).is_empty());
        }

        #[test]
        fn map_key_with_empty_value_is_not_a_missing_key() {
            assert!(!map_eq(&j!({"a": ""}), &j!({})));
            assert!(map_eq(&Value::Null, &j!({})));
        }

        #[test]
        fn taints_compare_regardless_of_order() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                taints: vec![taint("a", "1"), taint("b", "2")],
                ..Default::default()
            };
            let observed = Spec {
                taints: vec![taint("b", "2"), taint("a", "1")],
                ..Default::default()
            };
            assert!(computer.raw(&desired, &observed).is_empty());
        }

        #[test]
        fn taint_length_mismatch_reports_whole_list() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                taints: vec![taint("a", "1")],
                ..Default::default()
            };
            let observed = Spec {
                taints: vec![taint("a", "1"), taint("a", "1")],
                ..Default::default()
            };
            assert_eq!(computer.raw(&desired, &observed).paths(), vec!["taints"]);
        }

        #[test]
        fn duplicate_elements_must_match_one_to_one() {
            assert!(!unordered_eq(&j!(["a", "a", "b"]), &j!(["a", "b", "b"])));
            assert!(unordered_eq(&j!(["a", "b", "a"]), &j!(["a", "a", "b"])));
            assert!(unordered_eq(&Value::Null, &j!([])));
        }

        /// Story: the server fills in a version the user never asked for
        #[test]
        fn explicit_only_fields_skip_unset_desired() {
            let computer = DeltaComputer::new(table());
            let observed = Spec {
                version: Some("1.29".to_string()),
                ..Default::default()
            };
            assert!(computer.raw(&Spec::default(), &observed).is_empty());

            let desired = Spec {
                version: Some("1.30".to_string()),
                ..Default::default()
            };
            assert_eq!(computer.raw(&desired, &observed).paths(), vec!["version"]);
        }
    }

    mod nested_fields {
        use super::*;

        /// Story: callers key decisions on leaf paths, not whole structures
        #[test]
        fn leaf_difference_reports_leaf_path() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                network: Some(Network {
                    service_cidr: Some("10.100.0.0/16".to_string()),
                    ip_family: Some("ipv4".to_string()),
                    subnets: vec![],
                }),
                ..Default::default()
            };
            let observed = Spec {
                network: Some(Network {
                    service_cidr: Some("172.20.0.0/16".to_string()),
                    ip_family: Some("ipv4".to_string()),
                    subnets: vec![],
                }),
                ..Default::default()
            };
            let delta = computer.raw(&desired, &observed);
            assert_eq!(delta.paths(), vec!["network.serviceCidr"]);
            assert!(delta.different_at("network"));
        }

        #[test]
        fn unset_parent_compares_leaves_against_zero() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                network: Some(Network {
                    ip_family: Some(String::new()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            assert!(computer.raw(&desired, &Spec::default()).is_empty());

            let desired = Spec {
                network: Some(Network {
                    ip_family: Some("ipv6".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            assert_eq!(
                computer.raw(&desired, &Spec::default()).paths(),
                vec!["network.ipFamily"]
            );
        }

        #[test]
        fn nested_lists_are_unordered() {
            let computer = DeltaComputer::new(table());
            let desired = Spec {
                network: Some(Network {
                    subnets: vec!["subnet-a".into(), "subnet-b".into()],
                    ..Default::default()
                }),
                ..Default::default()
            };
            let observed = Spec {
                network: Some(Network {
                    subnets: vec!["subnet-b".into(), "subnet-a".into()],
                    ..Default::default()
                }),
                ..Default::default()
            };
            assert!(computer.raw(&desired, &observed).is_empty());
        }
    }

    mod delta_queries {
        use super::*;

        #[test]
        fn prefix_matching_respects_segment_boundaries() {
            assert!(path_under("scalingConfig.desiredSize", "scalingConfig"));
            assert!(path_under("scalingConfig", "scalingConfig"));
            assert!(!path_under("scalingConfigV2", "scalingConfig"));
            assert!(!path_under("scaling", "scalingConfig"));
        }

        #[test]
        fn different_except_ignores_listed_prefixes() {
            let mut delta = Delta::new();
            delta.add("tags", j!({"a": "1"}), Value::Null);
            assert!(!delta.different_except(&["tags"]));
            delta.add("labels", j!({"b": "2"}), Value::Null);
            assert!(delta.different_except(&["tags"]));
        }

        #[test]
        fn paths_are_recorded_once() {
            let mut delta = Delta::new();
            delta.add("size", j!(1), j!(2));
            delta.add("size", j!(5), j!(6));
            assert_eq!(delta.len(), 1);
            assert_eq!(delta.get("size").map(|d| d.desired.clone()), Some(j!(1)));
        }
    }

    mod policies {
        use super::*;

        fn owner_from_marker(annotations: &Annotations) -> FieldOwner {
            match annotations.get("owner") {
                Some("external") => FieldOwner::External,
                _ => FieldOwner::Controller,
            }
        }

        /// Story: another controller owns a field, so its drift is not ours
        #[test]
        fn externally_owned_path_is_stripped_after_raw_diff() {
            let computer = DeltaComputer::new(table())
                .with_policy(StripExternallyOwned::new("size", owner_from_marker));
            let desired = Spec {
                size: Some(3),
                ..Default::default()
            };
            let observed = Spec {
                size: Some(7),
                ..Default::default()
            };
            let external = Annotations::default().with("owner", "external");

            assert_eq!(computer.raw(&desired, &observed).paths(), vec!["size"]);
            assert!(computer.compute(&desired, &observed, &external).is_empty());
            assert_eq!(
                computer
                    .compute(&desired, &observed, &Annotations::default())
                    .paths(),
                vec!["size"]
            );
        }
    }
}
