use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::ModuleIdentity;

/// `(name, version)` of a declared-but-problematic dependency, independent of who declared it.
pub type DiscrepancyKey = ModuleIdentity;

/// Deduplicated findings of one scan.
///
/// Both registries map a [`DiscrepancyKey`] to a set of strings, so recording the
/// same entry twice is a no-op. Ordered maps keep report output deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscrepancyTracker {
    issues: BTreeMap<DiscrepancyKey, BTreeSet<String>>,
    redirects: BTreeMap<DiscrepancyKey, BTreeSet<String>>,
}

/// One registry entry, flattened for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy<'a> {
    pub name: &'a str,
    pub version: String,
    pub referrers: Vec<&'a str>,
}

impl DiscrepancyTracker {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `referrer` declared a dependency on `key` that could not be satisfied.
    pub fn record_issue(&mut self, key: DiscrepancyKey, referrer: impl Into<String>) {
        self.issues.entry(key).or_default().insert(referrer.into());
    }

    /// Record that the ambient probe substituted a different version for `key`.
    pub fn record_redirect(&mut self, key: DiscrepancyKey, description: impl Into<String>) {
        self.redirects
            .entry(key)
            .or_default()
            .insert(description.into());
    }

    /// Number of distinct issue keys; the scan's overall severity signal.
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects.len()
    }

    #[cfg(test)]
    pub fn issues(&self) -> &BTreeMap<DiscrepancyKey, BTreeSet<String>> {
        &self.issues
    }

    #[cfg(test)]
    pub fn redirects(&self) -> &BTreeMap<DiscrepancyKey, BTreeSet<String>> {
        &self.redirects
    }

    pub fn issue_entries(&self) -> Vec<Discrepancy<'_>> {
        flatten(&self.issues)
    }

    pub fn redirect_entries(&self) -> Vec<Discrepancy<'_>> {
        flatten(&self.redirects)
    }
}

fn flatten(registry: &BTreeMap<DiscrepancyKey, BTreeSet<String>>) -> Vec<Discrepancy<'_>> {
    registry
        .iter()
        .map(|(key, referrers)| Discrepancy {
            name: &key.name,
            version: key.version.to_string(),
            referrers: referrers.iter().map(String::as_str).collect(),
        })
        .collect()
}
