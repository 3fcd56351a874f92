//! Step input resolution
//!
//! Assembles a step's working filesystem from its declared inputs. The first
//! input establishes the base; every later input copies its `include` paths
//! into a fresh destination, and base plus destinations combine with one
//! atomic merge.

use crate::compile::BuildGraph;
use crate::error::{StrataError, StrataResult};
use crate::plan::Input;
use crate::state::{CopyOptions, ExecState, FileAction};
use tracing::warn;

impl BuildGraph<'_> {
    /// Resolve one input to its source state
    fn state_for_input(&self, input: &Input, base_state: &ExecState) -> ExecState {
        if let Some(image) = &input.image {
            ExecState::image(image, &self.platform)
        } else if input.local {
            self.local_state.clone()
        } else if let Some(step) = &input.step {
            match self.graph.get(step).and_then(|node| node.state.clone()) {
                Some(state) => state,
                None => base_state.clone(),
            }
        } else {
            base_state.clone()
        }
    }

    /// Combine a step's inputs into its working state
    pub(super) fn resolve_inputs(&self, step_name: &str, inputs: &[Input]) -> StrataResult<ExecState> {
        let Some(first) = inputs.first() else {
            return Ok(ExecState::scratch());
        };
        if first.has_filter() {
            return Err(StrataError::FirstInputFiltered(step_name.to_string()));
        }

        let base = self.state_for_input(first, &ExecState::scratch());
        if inputs.len() == 1 {
            return Ok(base);
        }

        let mut sources = vec![base];
        for input in &inputs[1..] {
            if input.include.is_empty() {
                warn!("input for step {} has no include or exclude paths, skipping", step_name);
                continue;
            }

            let input_state = self.state_for_input(input, &ExecState::scratch());
            let mut dest = ExecState::scratch();
            for include in &input.include {
                dest = copy_include(&dest, &input_state, input, include);
            }
            sources.push(dest);
        }

        if sources.len() == 1 {
            return Ok(sources.swap_remove(0));
        }
        Ok(ExecState::merge(&sources))
    }
}

/// Copy one include path from an input's source into the destination state
fn copy_include(dest: &ExecState, source: &ExecState, input: &Input, include: &str) -> ExecState {
    let options = CopyOptions {
        create_dest_path: true,
        follow_symlinks: true,
        copy_dir_contents_only: true,
        allow_wildcard: true,
        allow_empty_wildcard: true,
        exclude_patterns: input.exclude.clone(),
    };

    if input.local {
        // Paths from the local context always land under /app
        let dest_path = local_dest_path(include);
        return dest.file(FileAction::copy(source, include, dest_path, options));
    }

    // Other sources keep their shape: /app aliases the whole app tree,
    // absolute paths are preserved, relative paths anchor at /app
    let path = match include {
        "." | "/app" | "/app/" => "/app".to_string(),
        _ if include.starts_with('/') => include.to_string(),
        _ => format!("/app/{include}"),
    };

    dest.file_named(
        FileAction::copy(source, &path, &path, options),
        format!("copy {path}"),
    )
}

fn local_dest_path(include: &str) -> String {
    match std::path::Path::new(include).file_name() {
        Some(name) => format!("/app/{}", name.to_string_lossy()),
        None => "/app".to_string(),
    }
}
