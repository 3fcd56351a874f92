//! Accumulated build-time environment
//!
//! Tracks the `PATH` entries and variables a step contributes downstream.
//! This is compiler bookkeeping: the values are re-materialized onto the
//! execution state of every child so the built image actually observes them.

use std::collections::BTreeMap;

/// PATH entries and variables inherited along graph edges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    /// Ordered path entries, deduplicated on insert
    pub path_list: Vec<String>,

    /// Variables, sorted by name for deterministic re-materialization
    pub env_vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another environment into this one. Paths are appended as-is;
    /// colliding variables take the other side's value.
    pub fn merge(&mut self, other: &BuildEnvironment) {
        self.path_list.extend(other.path_list.iter().cloned());
        for (key, value) in &other.env_vars {
            self.env_vars.insert(key.clone(), value.clone());
        }
    }

    /// Append a path entry; no-op if already present
    pub fn add_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.path_list.contains(&path) {
            self.path_list.push(path);
        }
    }

    pub fn add_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env_vars.insert(key.into(), value.into());
    }
}
