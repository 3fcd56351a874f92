//! Opaque execution state
//!
//! An [`ExecState`] is one point in the compiled graph: a filesystem plus the
//! environment a process would observe there. States are immutable values —
//! every operation returns a new state derived from the old one, so a state
//! reused by multiple children can never be corrupted by a sibling. The
//! backing operation DAG is shared through `Arc` and only described, never
//! executed; the external backend materializes it into image layers.

pub mod marshal;

pub use marshal::Definition;

use crate::platform::Platform;
use serde::Serialize;
use std::sync::Arc;

/// Snapshot of filesystem content + environment at one point in the graph
#[derive(Debug, Clone)]
pub struct ExecState {
    op: Arc<Op>,
    env: Vec<(String, String)>,
    cwd: Option<String>,
}

/// One operation in the compiled graph
#[derive(Debug)]
pub(crate) enum Op {
    /// Empty filesystem
    Scratch,
    /// Registry image resolved for a platform
    Image { reference: String, platform: Platform },
    /// Named local source directory supplied by the caller
    Local { name: String },
    /// Process run against an input filesystem
    Exec(ExecOp),
    /// File actions applied to an input filesystem
    File {
        input: Arc<Op>,
        actions: Vec<FileActionKind>,
        custom_name: Option<String>,
    },
    /// Atomic combination of several filesystems
    Merge { inputs: Vec<Arc<Op>> },
}

#[derive(Debug)]
pub(crate) struct ExecOp {
    pub(crate) input: Arc<Op>,
    pub(crate) command: String,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) cwd: Option<String>,
    pub(crate) mounts: Vec<Mount>,
    pub(crate) secrets: Vec<SecretEnv>,
    pub(crate) custom_name: Option<String>,
}

/// A secret exposed to an exec command as an environment variable. The value
/// never enters the graph; the backend resolves it by id at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretEnv {
    pub id: String,
    pub env_name: String,
}

/// Concurrency mode of a persistent cache mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSharing {
    Shared,
    Locked,
}

/// Persistent cache attachment for a mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMountOptions {
    pub key: String,
    pub sharing: CacheSharing,
}

/// An extra filesystem attached to an exec command. Mount content is visible
/// to the command but never persists into the resulting state.
#[derive(Debug, Clone)]
pub struct Mount {
    pub(crate) target: String,
    pub(crate) source: Arc<Op>,
    pub(crate) cache: Option<CacheMountOptions>,
}

impl Mount {
    pub fn new(target: impl Into<String>, source: &ExecState) -> Self {
        Self {
            target: target.into(),
            source: source.op.clone(),
            cache: None,
        }
    }

    /// Mount backed by a named persistent cache volume
    pub fn persistent_cache(
        target: impl Into<String>,
        source: &ExecState,
        key: impl Into<String>,
        sharing: CacheSharing,
    ) -> Self {
        Self {
            target: target.into(),
            source: source.op.clone(),
            cache: Some(CacheMountOptions {
                key: key.into(),
                sharing,
            }),
        }
    }
}

/// Options for a copy file action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyOptions {
    pub create_dest_path: bool,
    pub follow_symlinks: bool,
    pub copy_dir_contents_only: bool,
    pub allow_wildcard: bool,
    pub allow_empty_wildcard: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
}

/// A single filesystem mutation applied by [`ExecState::file`]
#[derive(Debug)]
pub struct FileAction(pub(crate) FileActionKind);

#[derive(Debug)]
pub(crate) enum FileActionKind {
    Copy {
        from: Arc<Op>,
        src: String,
        dest: String,
        options: CopyOptions,
    },
    Mkfile {
        path: String,
        mode: u32,
        data: Vec<u8>,
    },
    Mkdir {
        path: String,
        mode: u32,
        make_parents: bool,
    },
}

impl FileAction {
    /// Copy `src` from another state into `dest`
    pub fn copy(
        from: &ExecState,
        src: impl Into<String>,
        dest: impl Into<String>,
        options: CopyOptions,
    ) -> Self {
        Self(FileActionKind::Copy {
            from: from.op.clone(),
            src: src.into(),
            dest: dest.into(),
            options,
        })
    }

    /// Create a file with the given mode and content
    pub fn mkfile(path: impl Into<String>, mode: u32, data: impl Into<Vec<u8>>) -> Self {
        Self(FileActionKind::Mkfile {
            path: path.into(),
            mode,
            data: data.into(),
        })
    }

    /// Create a directory
    pub fn mkdir(path: impl Into<String>, mode: u32, make_parents: bool) -> Self {
        Self(FileActionKind::Mkdir {
            path: path.into(),
            mode,
            make_parents,
        })
    }
}

/// Builder for an exec operation
#[derive(Debug)]
pub struct Run {
    command: String,
    custom_name: Option<String>,
    mounts: Vec<Mount>,
    secrets: Vec<SecretEnv>,
}

impl Run {
    /// Run a command through the shell
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            custom_name: None,
            mounts: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn with_custom_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    /// Expose a secret to the command as an environment variable
    pub fn add_secret(&mut self, id: impl Into<String>, env_name: impl Into<String>) {
        self.secrets.push(SecretEnv {
            id: id.into(),
            env_name: env_name.into(),
        });
    }

    pub fn add_mount(&mut self, mount: Mount) {
        self.mounts.push(mount);
    }
}

impl ExecState {
    fn from_op(op: Op) -> Self {
        Self {
            op: Arc::new(op),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Empty filesystem
    pub fn scratch() -> Self {
        Self::from_op(Op::Scratch)
    }

    /// Registry image pinned to a platform
    pub fn image(reference: impl Into<String>, platform: &Platform) -> Self {
        Self::from_op(Op::Image {
            reference: reference.into(),
            platform: platform.clone(),
        })
    }

    /// Named local source directory (e.g. the build context)
    pub fn local(name: impl Into<String>) -> Self {
        Self::from_op(Op::Local { name: name.into() })
    }

    /// Working directory for subsequent exec operations
    pub fn dir(&self, path: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.cwd = Some(path.into());
        next
    }

    /// Set an environment variable, replacing any earlier value for the key
    pub fn add_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let mut next = self.clone();
        next.env.retain(|(k, _)| *k != key);
        next.env.push((key, value.into()));
        next
    }

    /// The environment a process would observe in this state
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    /// Run a command; the resulting state is the root filesystem after the
    /// command, with this state's env and cwd baked into the operation
    pub fn run(&self, run: Run) -> Self {
        let op = Op::Exec(ExecOp {
            input: self.op.clone(),
            command: run.command,
            env: self.env.clone(),
            cwd: self.cwd.clone(),
            mounts: run.mounts,
            secrets: run.secrets,
            custom_name: run.custom_name,
        });
        Self {
            op: Arc::new(op),
            env: self.env.clone(),
            cwd: self.cwd.clone(),
        }
    }

    /// Apply a file action
    pub fn file(&self, action: FileAction) -> Self {
        self.file_op(action, None)
    }

    /// Apply a file action with a display label for build progress
    pub fn file_named(&self, action: FileAction, custom_name: impl Into<String>) -> Self {
        self.file_op(action, Some(custom_name.into()))
    }

    fn file_op(&self, action: FileAction, custom_name: Option<String>) -> Self {
        let op = Op::File {
            input: self.op.clone(),
            actions: vec![action.0],
            custom_name,
        };
        Self {
            op: Arc::new(op),
            env: self.env.clone(),
            cwd: self.cwd.clone(),
        }
    }

    /// Atomically combine several states into one filesystem. Unlike a chain
    /// of whole-tree copies this is a single n-ary operation; the backend
    /// decides how the sources are layered.
    pub fn merge(states: &[ExecState]) -> Self {
        Self::from_op(Op::Merge {
            inputs: states.iter().map(|s| s.op.clone()).collect(),
        })
    }

    /// Whether two states share the same underlying operation
    pub fn same_op(&self, other: &ExecState) -> bool {
        Arc::ptr_eq(&self.op, &other.op)
    }

    pub(crate) fn op(&self) -> &Arc<Op> {
        &self.op
    }
}
