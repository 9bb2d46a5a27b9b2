//! Keyed-set reconciliation
//!
//! Computes what to add, update and remove to turn an observed keyed
//! collection into a desired one. The same algorithm drives tags, labels,
//! taints and access-policy associations; only the identity and payload
//! equality functions change.

use std::collections::{BTreeMap, BTreeSet};

/// Whether the remote operation can change an existing record in place
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    /// Writing an existing key overwrites it (tags, labels, taints)
    InPlace,
    /// A changed record must be removed and re-added (policy associations)
    RemoveThenAdd,
}

/// Output of [`reconcile`]; every bucket is sorted by key
#[derive(Clone, Debug, PartialEq)]
pub struct SetReconciliationPlan<T, K> {
    /// Items to create remotely
    pub to_add: Vec<T>,
    /// Items to overwrite in place, with the key they replace
    pub to_update: Vec<(T, K)>,
    /// Keys to delete remotely
    pub to_remove: Vec<K>,
    /// Keys already in the desired state
    pub unchanged: Vec<K>,
}

/// One remote step in the order it must run
#[derive(Clone, Debug, PartialEq)]
pub enum SetOperation<'a, T, K> {
    /// Delete a key
    Remove(&'a K),
    /// Overwrite a key
    Update(&'a T, &'a K),
    /// Create an item
    Add(&'a T),
}

impl<T, K: Ord> SetReconciliationPlan<T, K> {
    /// Nothing to do
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    /// Keys emitted to both `to_add` and `to_remove`, i.e. changed records
    /// of a [`UpdateMode::RemoveThenAdd`] collection
    pub fn replaced_keys<F>(&self, identity: F) -> Vec<&K>
    where
        F: Fn(&T) -> K,
    {
        let added: BTreeSet<K> = self.to_add.iter().map(identity).collect();
        self.to_remove.iter().filter(|k| added.contains(k)).collect()
    }

    /// Steps in execution order: removals, then updates, then additions.
    /// Removing first keeps a replaced key from colliding with itself.
    pub fn operations(&self) -> Vec<SetOperation<'_, T, K>> {
        self.to_remove
            .iter()
            .map(SetOperation::Remove)
            .chain(self.to_update.iter().map(|(t, k)| SetOperation::Update(t, k)))
            .chain(self.to_add.iter().map(SetOperation::Add))
            .collect()
    }
}

/// Reconcile a desired keyed collection against an observed one
///
/// Duplicate keys within one input collapse to the first occurrence. When
/// every key is unique the result does not depend on input order; with
/// duplicates it does, since reordering changes which occurrence wins.
pub fn reconcile<T, K, I, E>(
    desired: &[T],
    observed: &[T],
    identity: I,
    payload_equal: E,
    mode: UpdateMode,
) -> SetReconciliationPlan<T, K>
where
    T: Clone,
    K: Ord + Clone,
    I: Fn(&T) -> K,
    E: Fn(&T, &T) -> bool,
{
    let desired_by_key = index_by_key(desired, &identity);
    let observed_by_key = index_by_key(observed, &identity);

    let mut plan = SetReconciliationPlan {
        to_add: Vec::new(),
        to_update: Vec::new(),
        to_remove: Vec::new(),
        unchanged: Vec::new(),
    };

    for (key, want) in &desired_by_key {
        match observed_by_key.get(key) {
            None => plan.to_add.push((*want).clone()),
            Some(have) if payload_equal(want, have) => plan.unchanged.push(key.clone()),
            Some(_) => match mode {
                UpdateMode::InPlace => plan.to_update.push(((*want).clone(), key.clone())),
                UpdateMode::RemoveThenAdd => {
                    plan.to_add.push((*want).clone());
                    plan.to_remove.push(key.clone());
                }
            },
        }
    }

    for key in observed_by_key.keys() {
        if !desired_by_key.contains_key(key) {
            plan.to_remove.push(key.clone());
        }
    }
    plan.to_remove.sort();

    plan
}

/// Reconcile two string maps (tags, labels); "add" overwrites existing keys
pub fn reconcile_map(
    desired: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> SetReconciliationPlan<(String, String), String> {
    let desired: Vec<(String, String)> = desired.clone().into_iter().collect();
    let observed: Vec<(String, String)> = observed.clone().into_iter().collect();
    reconcile(
        &desired,
        &observed,
        |(k, _)| k.clone(),
        |(_, a), (_, b)| a == b,
        UpdateMode::InPlace,
    )
}

fn index_by_key<'a, T, K, I>(items: &'a [T], identity: &I) -> BTreeMap<K, &'a T>
where
    K: Ord,
    I: Fn(&T) -> K,
{
    let mut index = BTreeMap::new();
    for item in items {
        index.entry(identity(item)).or_insert(item);
    }
    index
}
