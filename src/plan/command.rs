//! Step commands
//!
//! The closed set of mutations a step can apply to its working state. The
//! serialized form carries an explicit `type` discriminator so plans stay
//! readable and every consumer matches exhaustively.

use serde::{Deserialize, Serialize};

/// One mutation of a step's working state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Run a shell command in the working state
    #[serde(rename_all = "camelCase")]
    Exec {
        cmd: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_name: Option<String>,
    },

    /// Add a directory to the accumulated `PATH`
    Path { path: String },

    /// Set an environment variable, visible to later commands and children
    Variable { name: String, value: String },

    /// Copy from the local build context or a named image into the state
    #[serde(rename_all = "camelCase")]
    Copy {
        src: String,
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },

    /// Write a step asset to a path in the state
    #[serde(rename_all = "camelCase")]
    File {
        path: String,
        asset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_name: Option<String>,
    },
}

impl Command {
    pub fn exec(cmd: impl Into<String>) -> Self {
        Self::Exec {
            cmd: cmd.into(),
            custom_name: None,
        }
    }

    pub fn exec_named(cmd: impl Into<String>, custom_name: impl Into<String>) -> Self {
        Self::Exec {
            cmd: cmd.into(),
            custom_name: Some(custom_name.into()),
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn variable(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Variable {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn copy(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self::Copy {
            src: src.into(),
            dest: dest.into(),
            image: None,
        }
    }

    pub fn copy_from_image(
        image: impl Into<String>,
        src: impl Into<String>,
        dest: impl Into<String>,
    ) -> Self {
        Self::Copy {
            src: src.into(),
            dest: dest.into(),
            image: Some(image.into()),
        }
    }

    pub fn file(path: impl Into<String>, asset: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            asset: asset.into(),
            mode: None,
            custom_name: None,
        }
    }
}
