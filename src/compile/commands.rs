//! Step-to-state conversion
//!
//! Applies one step's commands to its starting state. The starting state
//! carries the inherited environment as concrete operations so the built
//! image observes it, not just the compiler's bookkeeping.

use crate::compile::BuildGraph;
use crate::error::{StrataError, StrataResult};
use crate::plan::{Command, Step};
use crate::platform::DEFAULT_PATH;
use crate::state::{CopyOptions, ExecState, FileAction, Mount, Run};
use tracing::debug;

impl BuildGraph<'_> {
    /// Compile one step: starting state, commands in order, then output
    /// filtering
    pub(super) fn convert_step(&mut self, name: &str, base_state: &ExecState) -> StrataResult<ExecState> {
        let Some(step) = self.step(name) else {
            return Ok(base_state.clone());
        };

        let mut state = self.starting_state(step, base_state)?;

        for command in &step.commands {
            state = self.apply_command(step, command, state)?;
        }

        if let Some(outputs) = &step.outputs {
            state = filter_outputs(base_state, &state, outputs);
        }

        Ok(state)
    }

    /// The state a step's first command sees: the ancestry- or input-derived
    /// filesystem, re-anchored to `starting_image` if set, with the inherited
    /// environment applied as real operations
    fn starting_state(&mut self, step: &Step, base_state: &ExecState) -> StrataResult<ExecState> {
        let mut state = if step.inputs.is_empty() {
            base_state.clone()
        } else {
            self.resolve_inputs(&step.name, &step.inputs)?
        };
        state = state.dir("/app");

        if let Some(image) = &step.starting_image {
            state = ExecState::image(image, &self.platform);
        }

        let input_env = self
            .graph
            .get(&step.name)
            .map(|node| node.input_env.clone())
            .unwrap_or_default();

        for (key, value) in &input_env.env_vars {
            state = state.add_env(key, value);
            if let Some(node) = self.graph.get_mut(&step.name) {
                node.output_env.add_var(key, value);
            }
        }

        if !input_env.path_list.is_empty() {
            let joined = input_env.path_list.join(":");
            state = state.add_env("PATH", format!("{joined}:{DEFAULT_PATH}"));
            if let Some(node) = self.graph.get_mut(&step.name) {
                for path in &input_env.path_list {
                    node.output_env.add_path(path);
                }
            }
        }

        Ok(state)
    }

    fn apply_command(
        &mut self,
        step: &Step,
        command: &Command,
        state: ExecState,
    ) -> StrataResult<ExecState> {
        match command {
            Command::Exec { cmd, custom_name } => {
                self.apply_exec(step, cmd, custom_name.as_deref(), state)
            }
            Command::Path { path } => Ok(self.apply_path(&step.name, path, state)),
            Command::Variable { name, value } => Ok(self.apply_variable(&step.name, name, value, state)),
            Command::Copy { src, dest, image } => {
                Ok(self.apply_copy(src, dest, image.as_deref(), state))
            }
            Command::File {
                path,
                asset,
                mode,
                custom_name,
            } => self.apply_file(step, path, asset, *mode, custom_name.as_deref(), state),
        }
    }

    fn apply_exec(
        &mut self,
        step: &Step,
        cmd: &str,
        custom_name: Option<&str>,
        state: ExecState,
    ) -> StrataResult<ExecState> {
        let mut run = Run::shell(cmd);
        if let Some(name) = custom_name {
            run = run.with_custom_name(name);
        }

        if step.uses_secrets() {
            for secret in &self.plan.secrets {
                run.add_secret(secret, secret);
            }

            if let Some(hash) = &self.secrets_hash {
                // The mount content changes with the secret values, so the
                // command's cache entry is invalidated without any secret
                // bytes reaching a layer
                let marker = ExecState::scratch()
                    .file(FileAction::mkfile("/secrets-hash", 0o644, hash.as_str()));
                run.add_mount(Mount::new("/cache-invalidate", &marker));
            }
        }

        for mount in self.cache_mounts(&step.caches)? {
            run.add_mount(mount);
        }

        Ok(state.run(run))
    }

    fn apply_path(&mut self, step_name: &str, path: &str, state: ExecState) -> ExecState {
        let path_list = match self.graph.get_mut(step_name) {
            Some(node) => {
                node.output_env.add_path(path);
                node.path_list()
            }
            None => vec![path.to_string()],
        };

        state.add_env("PATH", format!("{}:{}", path_list.join(":"), DEFAULT_PATH))
    }

    fn apply_variable(
        &mut self,
        step_name: &str,
        name: &str,
        value: &str,
        state: ExecState,
    ) -> ExecState {
        if let Some(node) = self.graph.get_mut(step_name) {
            node.output_env.add_var(name, value);
        }
        state.add_env(name, value)
    }

    fn apply_copy(&self, src: &str, dest: &str, image: Option<&str>, state: ExecState) -> ExecState {
        let source = match image {
            Some(image) => ExecState::image(image, &self.platform),
            None => self.local_state.clone(),
        };

        let action = FileAction::copy(
            &source,
            src,
            dest,
            CopyOptions {
                create_dest_path: true,
                follow_symlinks: true,
                copy_dir_contents_only: false,
                allow_wildcard: true,
                allow_empty_wildcard: true,
                exclude_patterns: Vec::new(),
            },
        );

        if src == dest {
            state.file_named(action, format!("copy {src}"))
        } else {
            state.file(action)
        }
    }

    fn apply_file(
        &self,
        step: &Step,
        path: &str,
        asset: &str,
        mode: Option<u32>,
        custom_name: Option<&str>,
        mut state: ExecState,
    ) -> StrataResult<ExecState> {
        let Some(content) = step.assets.get(asset) else {
            return Err(StrataError::AssetNotFound {
                asset: asset.to_string(),
                step: step.name.clone(),
            });
        };

        let parent = parent_dir(path);
        if parent != "/" {
            state = state.file(FileAction::mkdir(parent, 0o755, true));
        }

        let action = FileAction::mkfile(path, mode.unwrap_or(0o644), content.as_str());
        Ok(match custom_name {
            Some(name) => state.file_named(action, name),
            None => state.file(action),
        })
    }

    /// Resolve the step's cache names into persistent cache mounts
    fn cache_mounts(&mut self, cache_keys: &[String]) -> StrataResult<Vec<Mount>> {
        let mut mounts = Vec::with_capacity(cache_keys.len());
        for key in cache_keys {
            let Some(cache) = self.plan.caches.get(key) else {
                return Err(StrataError::CacheNotFound(key.clone()));
            };

            let entry = self.cache_store.get_cache(key, cache);
            debug!("mounting cache {} at {}", entry.key(), cache.directory);
            mounts.push(Mount::persistent_cache(
                &cache.directory,
                entry.state(),
                entry.key(),
                entry.sharing(),
            ));
        }
        Ok(mounts)
    }
}

/// Copy only the declared outputs onto the pre-step base, discarding
/// everything else the step's commands produced
fn filter_outputs(base_state: &ExecState, state: &ExecState, outputs: &[String]) -> ExecState {
    let mut result = ExecState::scratch();
    for output in outputs {
        result = result.file(FileAction::copy(
            state,
            output,
            output,
            CopyOptions {
                create_dest_path: true,
                follow_symlinks: true,
                copy_dir_contents_only: false,
                allow_wildcard: true,
                allow_empty_wildcard: true,
                exclude_patterns: Vec::new(),
            },
        ));
    }

    base_state.file(FileAction::copy(
        &result,
        "/",
        "/",
        CopyOptions {
            create_dest_path: true,
            follow_symlinks: true,
            allow_wildcard: true,
            ..CopyOptions::default()
        },
    ))
}

fn parent_dir(path: &str) -> String {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => "/".to_string(),
    }
}
