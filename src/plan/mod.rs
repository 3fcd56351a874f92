//! Build plan data model
//!
//! A plan is the fully-resolved description handed to the compiler: an
//! ordered list of steps with dependencies and commands, the named caches
//! those steps mount, and the secret names exec commands may see. Plans are
//! interchanged as JSON and are immutable once compilation starts.

pub mod cache;
pub mod command;
pub mod input;
pub mod step;

pub use cache::{Cache, CacheType};
pub use command::Command;
pub use input::Input;
pub use step::Step;

use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A complete, resolved build plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildPlan {
    /// Steps in provider order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,

    /// Named cache definitions referenced by steps
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub caches: BTreeMap<String, Cache>,

    /// Secret names injected into exec commands as environment variables
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
}

impl BuildPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn add_cache(&mut self, name: impl Into<String>, cache: Cache) {
        self.caches.insert(name.into(), cache);
    }

    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Parse a plan from its JSON form
    pub fn from_json(json: &str) -> StrataResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a plan file
    pub fn from_file(path: impl AsRef<Path>) -> StrataResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| StrataError::io(format!("reading plan {}", path.display()), e))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> StrataResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_JSON: &str = r#"{
        "steps": [
            {
                "name": "install",
                "commands": [
                    {"type": "copy", "src": "package.json", "dest": "/app/package.json"},
                    {"type": "exec", "cmd": "npm ci"}
                ],
                "caches": ["npm"]
            },
            {
                "name": "build",
                "dependsOn": ["install"],
                "commands": [
                    {"type": "variable", "name": "NODE_ENV", "value": "production"},
                    {"type": "exec", "cmd": "npm run build"}
                ],
                "outputs": ["dist"]
            }
        ],
        "caches": {
            "npm": {"directory": "/root/.npm"}
        },
        "secrets": ["NPM_TOKEN"]
    }"#;

    #[test]
    fn from_json_full_plan() {
        let plan = BuildPlan::from_json(PLAN_JSON).unwrap();

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.secrets, ["NPM_TOKEN"]);
        assert_eq!(plan.caches["npm"].directory, "/root/.npm");

        let build = plan.get_step("build").unwrap();
        assert_eq!(build.depends_on, ["install"]);
        assert_eq!(build.outputs.as_deref(), Some(&["dist".to_string()][..]));
        assert_eq!(build.commands[0], Command::variable("NODE_ENV", "production"));
    }

    #[test]
    fn get_step_missing() {
        let plan = BuildPlan::from_json(PLAN_JSON).unwrap();
        assert!(plan.get_step("deploy").is_none());
    }

    #[test]
    fn json_round_trip() {
        let plan = BuildPlan::from_json(PLAN_JSON).unwrap();
        let json = plan.to_json().unwrap();
        let reparsed = BuildPlan::from_json(&json).unwrap();
        assert_eq!(reparsed, plan);
    }

    #[test]
    fn from_file_reads_plan() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("plan.json");
        std::fs::write(&path, PLAN_JSON).unwrap();

        let plan = BuildPlan::from_file(&path).unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = BuildPlan::from_file(temp.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("reading plan"));
    }
}
