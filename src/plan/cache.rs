//! Named cache definitions
//!
//! A cache is a persistent directory mounted into exec commands so package
//! manager downloads and incremental build output survive across builds. The
//! volumes themselves live in the backend; the plan only names them.

use serde::{Deserialize, Serialize};

/// Concurrency mode of a cache directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Concurrent access allowed; consistency is the mounting tool's problem
    #[default]
    Shared,
    /// At most one concurrent writer
    Locked,
}

/// A persistent cache directory referenced by steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cache {
    /// The directory to cache
    pub directory: String,

    /// The type of cache (either "shared" or "locked")
    pub r#type: CacheType,
}

impl Cache {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            r#type: CacheType::Shared,
        }
    }

    pub fn locked(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            r#type: CacheType::Locked,
        }
    }
}
