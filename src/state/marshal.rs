//! Wire form of a compiled state
//!
//! Flattens the operation DAG into a digest-addressed list the external
//! backend consumes: each operation is serialized to canonical JSON, keyed by
//! the sha256 of those bytes, and references earlier entries by digest.
//! Structurally identical subgraphs collapse to one entry, and the same tree
//! always marshals to the same digests.

use crate::error::StrataResult;
use crate::platform::Platform;
use crate::state::{CacheMountOptions, CopyOptions, ExecState, FileActionKind, Op, SecretEnv};
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A compiled state flattened for the backend: operations in dependency
/// order, root last
#[derive(Debug, Serialize)]
pub struct Definition {
    ops: Vec<OpRecord>,
    root: String,
}

#[derive(Debug, Serialize)]
struct OpRecord {
    digest: String,
    op: OpDesc,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum OpDesc {
    Scratch,
    #[serde(rename_all = "camelCase")]
    Image { reference: String, platform: Platform },
    Local {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    Exec {
        input: String,
        command: String,
        env: Vec<(String, String)>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        mounts: Vec<MountDesc>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        secrets: Vec<SecretEnv>,
        #[serde(skip_serializing_if = "Option::is_none")]
        custom_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    File {
        input: String,
        actions: Vec<ActionDesc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        custom_name: Option<String>,
    },
    Merge {
        inputs: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MountDesc {
    target: String,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<CacheMountOptions>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ActionDesc {
    #[serde(rename_all = "camelCase")]
    Copy {
        from: String,
        src: String,
        dest: String,
        options: CopyOptions,
    },
    #[serde(rename_all = "camelCase")]
    Mkfile {
        path: String,
        mode: u32,
        data_hex: String,
    },
    #[serde(rename_all = "camelCase")]
    Mkdir {
        path: String,
        mode: u32,
        make_parents: bool,
    },
}

impl Definition {
    /// Digest of the final operation
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Number of distinct operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn to_json(&self) -> StrataResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl ExecState {
    /// Flatten this state's operation DAG into its wire form
    pub fn marshal(&self) -> StrataResult<Definition> {
        let mut marshal = Marshal {
            records: Vec::new(),
            by_ptr: HashMap::new(),
            seen: HashSet::new(),
        };
        let root = marshal.visit(self.op())?;
        Ok(Definition {
            ops: marshal.records,
            root,
        })
    }
}

struct Marshal {
    records: Vec<OpRecord>,
    by_ptr: HashMap<*const Op, String>,
    seen: HashSet<String>,
}

impl Marshal {
    fn visit(&mut self, op: &Arc<Op>) -> StrataResult<String> {
        let ptr = Arc::as_ptr(op);
        if let Some(digest) = self.by_ptr.get(&ptr) {
            return Ok(digest.clone());
        }

        let desc = match op.as_ref() {
            Op::Scratch => OpDesc::Scratch,
            Op::Image { reference, platform } => OpDesc::Image {
                reference: reference.clone(),
                platform: platform.clone(),
            },
            Op::Local { name } => OpDesc::Local { name: name.clone() },
            Op::Exec(exec) => {
                let input = self.visit(&exec.input)?;
                let mut mounts = Vec::with_capacity(exec.mounts.len());
                for mount in &exec.mounts {
                    mounts.push(MountDesc {
                        target: mount.target.clone(),
                        source: self.visit(&mount.source)?,
                        cache: mount.cache.clone(),
                    });
                }
                OpDesc::Exec {
                    input,
                    command: exec.command.clone(),
                    env: exec.env.clone(),
                    cwd: exec.cwd.clone(),
                    mounts,
                    secrets: exec.secrets.clone(),
                    custom_name: exec.custom_name.clone(),
                }
            }
            Op::File {
                input,
                actions,
                custom_name,
            } => {
                let input = self.visit(input)?;
                let mut descs = Vec::with_capacity(actions.len());
                for action in actions {
                    descs.push(match action {
                        FileActionKind::Copy {
                            from,
                            src,
                            dest,
                            options,
                        } => ActionDesc::Copy {
                            from: self.visit(from)?,
                            src: src.clone(),
                            dest: dest.clone(),
                            options: options.clone(),
                        },
                        FileActionKind::Mkfile { path, mode, data } => ActionDesc::Mkfile {
                            path: path.clone(),
                            mode: *mode,
                            data_hex: hex::encode(data),
                        },
                        FileActionKind::Mkdir {
                            path,
                            mode,
                            make_parents,
                        } => ActionDesc::Mkdir {
                            path: path.clone(),
                            mode: *mode,
                            make_parents: *make_parents,
                        },
                    });
                }
                OpDesc::File {
                    input,
                    actions: descs,
                    custom_name: custom_name.clone(),
                }
            }
            Op::Merge { inputs } => {
                let mut digests = Vec::with_capacity(inputs.len());
                for input in inputs {
                    digests.push(self.visit(input)?);
                }
                OpDesc::Merge { inputs: digests }
            }
        };

        let bytes = serde_json::to_vec(&desc)?;
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));

        self.by_ptr.insert(ptr, digest.clone());
        if self.seen.insert(digest.clone()) {
            self.records.push(OpRecord {
                digest: digest.clone(),
                op: desc,
            });
        }

        Ok(digest)
    }
}
