//! Static policy lookup tables (DMARC policy, SPF qualifier) with a mandatory
//! `invalid` sentinel used whenever an observed policy string has no entry.

use crate::catalog::model::PolicyId;
use crate::catalog::store::StorageError;
use std::collections::HashMap;

pub const INVALID_POLICY: &str = "invalid";

/// Policy string emitted by the classifier when a record family is absent.
pub const NO_POLICY: &str = "no_policy";

const DMARC_POLICIES: &[(&str, PolicyId)] = &[
    ("none", 1),
    ("quarantine", 2),
    ("reject", 3),
    (NO_POLICY, 4),
    (INVALID_POLICY, 5),
];

const SPF_POLICIES: &[(&str, PolicyId)] = &[
    ("+all", 1),
    ("?all", 2),
    ("~all", 3),
    ("-all", 4),
    (NO_POLICY, 5),
    (INVALID_POLICY, 6),
];

// A built-in table without its `invalid` row fails to compile.
const DMARC_SENTINEL: PolicyId = match sentinel_of(DMARC_POLICIES) {
    Some(id) => id,
    None => panic!("dmarc_policies has no invalid row"),
};
const SPF_SENTINEL: PolicyId = match sentinel_of(SPF_POLICIES) {
    Some(id) => id,
    None => panic!("spf_policies has no invalid row"),
};

const fn sentinel_of(rows: &[(&str, PolicyId)]) -> Option<PolicyId> {
    let mut index = 0;
    while index < rows.len() {
        if same_str(rows[index].0, INVALID_POLICY) {
            return Some(rows[index].1);
        }
        index += 1;
    }
    None
}

const fn same_str(left: &str, right: &str) -> bool {
    let (left, right) = (left.as_bytes(), right.as_bytes());
    if left.len() != right.len() {
        return false;
    }
    let mut index = 0;
    while index < left.len() {
        if left[index] != right[index] {
            return false;
        }
        index += 1;
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    name: &'static str,
    entries: HashMap<String, PolicyId>,
    sentinel: PolicyId,
}

impl PolicyTable {
    /// Builds a table, failing when the `invalid` sentinel row is missing.
    pub fn new<I, S>(name: &'static str, entries: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = (S, PolicyId)>,
        S: Into<String>,
    {
        let entries: HashMap<String, PolicyId> = entries
            .into_iter()
            .map(|(policy, id)| (policy.into(), id))
            .collect();
        let sentinel = *entries
            .get(INVALID_POLICY)
            .ok_or(StorageError::MissingSentinel { table: name })?;
        Ok(Self {
            name,
            entries,
            sentinel,
        })
    }

    pub fn dmarc_defaults() -> Self {
        Self::from_static("dmarc_policies", DMARC_POLICIES, DMARC_SENTINEL)
    }

    pub fn spf_defaults() -> Self {
        Self::from_static("spf_policies", SPF_POLICIES, SPF_SENTINEL)
    }

    fn from_static(name: &'static str, rows: &[(&str, PolicyId)], sentinel: PolicyId) -> Self {
        let entries: HashMap<String, PolicyId> = rows
            .iter()
            .map(|(policy, id)| ((*policy).to_owned(), *id))
            .collect();
        Self {
            name,
            entries,
            sentinel,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolves a policy string to its id. Total: unknown strings map to the sentinel.
    pub fn resolve(&self, policy: &str) -> PolicyId {
        match self.entries.get(policy) {
            Some(id) => *id,
            None => {
                tracing::trace!(table = self.name, policy, "unknown policy string; using sentinel");
                self.sentinel
            }
        }
    }

    pub fn sentinel(&self) -> PolicyId {
        self.sentinel
    }

    pub fn policy_for(&self, id: PolicyId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, candidate)| **candidate == id)
            .map(|(policy, _)| policy.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
