//! Step input sources
//!
//! An input names where part of a step's starting filesystem comes from: a
//! registry image, the compiled state of a prior step, or the local build
//! context. The first input of a step establishes the base; later inputs
//! layer their `include` paths on top.

use serde::{Deserialize, Serialize};

/// One source contributing to a step's starting filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Input {
    /// Pull from a registry image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Use the compiled state of a prior step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Use the local build context
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub local: bool,

    /// Paths to copy from this source; empty means the whole source (first
    /// input only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Patterns excluded from the copies
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl Input {
    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            image: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn step(name: impl Into<String>) -> Self {
        Self {
            step: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::default()
        }
    }

    pub fn with_include(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.include = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclude(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this input restricts what it contributes
    pub fn has_filter(&self) -> bool {
        !self.include.is_empty() || !self.exclude.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_one_source() {
        assert_eq!(Input::image("alpine:3.20").image.as_deref(), Some("alpine:3.20"));
        assert_eq!(Input::step("install").step.as_deref(), Some("install"));
        assert!(Input::local().local);
    }

    #[test]
    fn has_filter() {
        assert!(!Input::step("install").has_filter());
        assert!(Input::step("install").with_include(["dist"]).has_filter());
        assert!(Input::local().with_exclude(["node_modules"]).has_filter());
    }

    #[test]
    fn serialization_skips_empty_fields() {
        let json = serde_json::to_string(&Input::step("install")).unwrap();
        assert_eq!(json, r#"{"step":"install"}"#);

        let json = serde_json::to_string(&Input::local().with_include(["src", "package.json"])).unwrap();
        assert_eq!(json, r#"{"local":true,"include":["src","package.json"]}"#);
    }
}
