//! Build plan steps

use crate::plan::{Command, Input};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named unit of work in a build plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Step {
    /// Unique key within the plan
    pub name: String,

    /// Names of steps that must be compiled before this one
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Mutations applied in order to the step's working state
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Command>,

    /// Path allowlist this step contributes downstream; anything else the
    /// commands produced is discarded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,

    /// Names of plan caches mounted into every exec command of this step
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub caches: Vec<String>,

    /// Content blobs for `File` commands, keyed by asset name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub assets: BTreeMap<String, String>,

    /// Whether exec commands see the plan's secrets; unset means yes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_secrets: Option<bool>,

    /// Re-anchor the working state to this image instead of the inherited
    /// filesystem
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_image: Option<String>,

    /// Explicit input sources for the starting filesystem; when set, these
    /// take the place of the dependency-derived base state
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn depend_on(&mut self, name: impl Into<String>) {
        self.depends_on.push(name.into());
    }

    pub fn add_commands(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    pub fn add_asset(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.assets.insert(name.into(), content.into());
    }

    /// Whether exec commands in this step get the plan secrets injected
    pub fn uses_secrets(&self) -> bool {
        self.use_secrets.unwrap_or(true)
    }
}
