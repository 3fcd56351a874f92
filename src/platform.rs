//! Target platform description
//!
//! Every image reference in a compiled graph is pinned to a platform so the
//! backend resolves the same manifest the compiler described.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default `PATH` for Unix images, appended after any accumulated path list.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// OS/architecture pair an image is resolved for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            variant: None,
        }
    }

    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    pub fn linux_arm64() -> Self {
        Self::new("linux", "arm64")
    }
}

impl Default for Platform {
    /// Platform matching the host architecture, always targeting linux images
    fn default() -> Self {
        match std::env::consts::ARCH {
            "aarch64" => Self::linux_arm64(),
            _ => Self::linux_amd64(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}/{}", self.os, self.arch, variant),
            None => write!(f, "{}/{}", self.os, self.arch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_variant() {
        assert_eq!(Platform::linux_amd64().to_string(), "linux/amd64");
    }

    #[test]
    fn display_with_variant() {
        let mut platform = Platform::new("linux", "arm");
        platform.variant = Some("v7".to_string());
        assert_eq!(platform.to_string(), "linux/arm/v7");
    }

    #[test]
    fn default_targets_linux() {
        assert_eq!(Platform::default().os, "linux");
    }

    #[test]
    fn default_path_ends_with_bin() {
        assert!(DEFAULT_PATH.ends_with("/bin"));
    }
}
