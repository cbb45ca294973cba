//! Run configuration - shared key/value settings and environment prefixes

use crate::core::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration shared by every component of a run
///
/// Mutable while a test is being set up; the orchestrator freezes it behind an
/// `Arc` when execution begins, so components only ever see a read-only view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration values (e.g. `loglevel`, `video_file`)
    values: BTreeMap<String, String>,

    /// Prefixes prepended onto environment variables of launched processes
    prepend_environment: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a value that must be configured
    pub fn get(&self, key: &str) -> Result<&str, HarnessError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| HarnessError::ConfigurationMissing(key.to_string()))
    }

    /// Get a value, falling back to `default`
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Prepend `value` onto environment variable `key` for launched processes
    ///
    /// Repeated calls for the same key accumulate: the newest value goes in front
    /// of the prefix built so far.
    pub fn prepend_environment_variable(&mut self, key: impl Into<String>, value: &str) {
        self.prepend_environment
            .entry(key.into())
            .and_modify(|prefix| prefix.insert_str(0, value))
            .or_insert_with(|| value.to_string());
    }

    pub fn environment_prefixes(&self) -> &BTreeMap<String, String> {
        &self.prepend_environment
    }

    /// Environment overrides for a child process, merging every prefix onto the
    /// value currently inherited from this process
    pub fn child_environment(&self) -> BTreeMap<String, String> {
        self.merge_environment(|key| std::env::var(key).ok())
    }

    /// Merge prefixes onto values supplied by `inherited`
    pub fn merge_environment<F>(&self, inherited: F) -> BTreeMap<String, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.prepend_environment
            .iter()
            .map(|(key, prefix)| {
                let existing = inherited(key).unwrap_or_default();
                (key.clone(), format!("{}{}", prefix, existing))
            })
            .collect()
    }
}
