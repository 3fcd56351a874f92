//! Build plan compiler
//!
//! Converts a resolved [`BuildPlan`](crate::plan::BuildPlan) into one final
//! execution state: every step becomes a graph node, nodes compile in
//! dependency order while environment accumulates along the edges, and the
//! leaves merge into the result handed to the backend. Compilation is
//! synchronous and single-threaded; the only shared state is the injected
//! [`CacheStore`].

pub mod cache_store;
pub mod environment;
pub mod node;

mod commands;
mod inputs;

pub use cache_store::{CacheEntry, CacheStore};
pub use environment::BuildEnvironment;
pub use node::{NodeStatus, StepNode};

use crate::error::{StrataError, StrataResult};
use crate::graph::{Graph, GraphNode};
use crate::plan::{BuildPlan, Step};
use crate::platform::Platform;
use crate::state::{CopyOptions, ExecState, FileAction};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Result of compiling a plan
#[derive(Debug)]
pub struct CompileOutput {
    /// The merged state of all leaf steps
    pub state: ExecState,

    /// Union of the leaf steps' accumulated environments
    pub environment: BuildEnvironment,
}

/// One compilation of a build plan
pub struct BuildGraph<'a> {
    graph: Graph<StepNode<'a>>,
    plan: &'a BuildPlan,
    platform: Platform,
    base_state: ExecState,
    local_state: ExecState,
    cache_store: &'a mut CacheStore,
    secrets_hash: Option<String>,
}

impl<'a> BuildGraph<'a> {
    /// Build the step graph for a plan. Dependency edges come from
    /// `depends_on` and from inputs referencing other steps; redundant edges
    /// are reduced away up front.
    pub fn new(
        plan: &'a BuildPlan,
        base_state: ExecState,
        local_state: ExecState,
        cache_store: &'a mut CacheStore,
        secrets_hash: Option<String>,
        platform: Platform,
    ) -> Self {
        let mut graph = Graph::new();
        for step in &plan.steps {
            graph.add_node(StepNode::new(step));
        }

        for step in &plan.steps {
            for dep in &step.depends_on {
                if !graph.add_edge(&step.name, dep) {
                    warn!("step {} depends on {} which is not in the plan, ignoring", step.name, dep);
                }
            }
            for input in &step.inputs {
                if let Some(dep) = &input.step {
                    if !graph.add_edge(&step.name, dep) {
                        warn!("step {} takes input from {} which is not in the plan, ignoring", step.name, dep);
                    }
                }
            }
        }

        graph.reduce_transitive_edges();

        Self {
            graph,
            plan,
            platform,
            base_state,
            local_state,
            cache_store,
            secrets_hash,
        }
    }

    /// Compile every step and merge the leaves into the final state.
    ///
    /// Fails fast: the first error aborts the compilation and nothing is
    /// returned.
    pub fn compile(&mut self) -> StrataResult<CompileOutput> {
        let order = self.graph.processing_order()?;
        for name in &order {
            self.process_node(name)?;
        }

        let mut leaves = Vec::new();
        let mut environment = BuildEnvironment::new();
        for name in self.graph.names() {
            if let Some(node) = self.graph.get(name) {
                if node.children().is_empty() && node.state.is_some() {
                    leaves.push(name.to_string());
                    environment.merge(&node.output_env);
                }
            }
        }

        let state = match leaves.len() {
            0 => self.base_state.clone(),
            1 => match self.graph.get(&leaves[0]).and_then(|n| n.state.clone()) {
                Some(state) => state,
                None => self.base_state.clone(),
            },
            _ => {
                let mut pairs = Vec::with_capacity(leaves.len());
                for name in &leaves {
                    if let Some(state) = self.graph.get(name).and_then(|n| n.state.clone()) {
                        pairs.push((name.clone(), state));
                    }
                }
                merge_states(&pairs)
            }
        };

        Ok(CompileOutput { state, environment })
    }

    /// The compiled node for a step, once [`compile`](Self::compile) has run
    pub fn node(&self, name: &str) -> Option<&StepNode<'a>> {
        self.graph.get(name)
    }

    /// Compile one node, after all of its parents
    fn process_node(&mut self, name: &str) -> StrataResult<()> {
        let Some(node) = self.graph.get(name) else {
            return Ok(());
        };
        if node.status == NodeStatus::Done {
            return Ok(());
        }
        let parents = node.parents().to_vec();

        for parent in &parents {
            let parent_done = self
                .graph
                .get(parent)
                .map(|p| p.status == NodeStatus::Done)
                .unwrap_or(true);
            if parent_done {
                continue;
            }

            // Re-entering a node that is already waiting on a parent means
            // the walk order is broken
            let waiting = self
                .graph
                .get(name)
                .map(|n| n.status == NodeStatus::InProgress)
                .unwrap_or(false);
            if waiting {
                return Err(StrataError::DependencyViolation {
                    step: name.to_string(),
                    parent: parent.clone(),
                });
            }

            if let Some(node) = self.graph.get_mut(name) {
                node.status = NodeStatus::InProgress;
            }
            let result = self.process_node(parent);
            if let Some(node) = self.graph.get_mut(name) {
                node.status = NodeStatus::Unvisited;
            }
            result?;
        }

        // Inherited environment; later parents win on variable collisions
        let mut input_env = BuildEnvironment::new();
        for parent in &parents {
            if let Some(parent_node) = self.graph.get(parent) {
                input_env.merge(&parent_node.output_env);
            }
        }

        let base_state = match parents.len() {
            0 => self.base_state.clone(),
            1 => self
                .graph
                .get(&parents[0])
                .and_then(|p| p.state.clone())
                .ok_or_else(|| StrataError::MissingParentState {
                    step: name.to_string(),
                    parent: parents[0].clone(),
                })?,
            _ => {
                let mut pairs = Vec::with_capacity(parents.len());
                for parent in &parents {
                    let state = self
                        .graph
                        .get(parent)
                        .and_then(|p| p.state.clone())
                        .ok_or_else(|| StrataError::MissingParentState {
                            step: name.to_string(),
                            parent: parent.clone(),
                        })?;
                    pairs.push((parent.clone(), state));
                }
                merge_states(&pairs)
            }
        };

        debug!("compiling step {}", name);

        if let Some(node) = self.graph.get_mut(name) {
            node.input_env = input_env;
        }

        let state = self.convert_step(name, &base_state)?;

        if let Some(node) = self.graph.get_mut(name) {
            node.state = Some(state);
            node.status = NodeStatus::Done;
        }
        Ok(())
    }

    /// The plan step a node wraps; the reference outlives the graph borrow
    fn step(&self, name: &str) -> Option<&'a Step> {
        self.graph.get(name).map(|node| node.step)
    }
}

/// Merge states by copying each whole tree into a fresh filesystem in order.
/// Later states win on overlapping paths; there is no conflict detection, so
/// siblings that must merge deterministically have to write disjoint paths.
fn merge_states(pairs: &[(String, ExecState)]) -> ExecState {
    let mut result = ExecState::scratch();
    for (name, state) in pairs {
        result = result.file_named(
            FileAction::copy(
                state,
                "/",
                "/",
                CopyOptions {
                    create_dest_path: true,
                    follow_symlinks: true,
                    allow_wildcard: true,
                    ..CopyOptions::default()
                },
            ),
            format!("copy from {name}"),
        );
    }
    result
}

/// Hash of the resolved secret values, used to invalidate exec cache entries
/// when a secret changes without writing the values into any layer
pub fn hash_secret_values(values: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in values {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Command, Step};
    use crate::state::Op;

    fn compile_plan(plan: &BuildPlan) -> CompileOutput {
        let mut store = CacheStore::new();
        let base = ExecState::image("debian:bookworm", &Platform::linux_amd64());
        let local = ExecState::local("context");
        let mut graph = BuildGraph::new(plan, base, local, &mut store, None, Platform::linux_amd64());
        graph.compile().unwrap()
    }

    fn step_with_commands(name: &str, commands: Vec<Command>) -> Step {
        let mut step = Step::new(name);
        step.add_commands(commands);
        step
    }

    #[test]
    fn empty_plan_returns_base_state() {
        let plan = BuildPlan::new();
        let mut store = CacheStore::new();
        let base = ExecState::image("debian:bookworm", &Platform::linux_amd64());
        let mut graph = BuildGraph::new(
            &plan,
            base.clone(),
            ExecState::local("context"),
            &mut store,
            None,
            Platform::linux_amd64(),
        );

        let output = graph.compile().unwrap();
        assert!(output.state.same_op(&base));
        assert!(output.environment.env_vars.is_empty());
    }

    #[test]
    fn environment_propagates_down_chain() {
        let mut plan = BuildPlan::new();
        plan.add_step(step_with_commands(
            "install",
            vec![
                Command::variable("NODE_ENV", "production"),
                Command::path("/app/node_modules/.bin"),
            ],
        ));
        let mut build = step_with_commands("build", vec![Command::exec("npm run build")]);
        build.depend_on("install");
        plan.add_step(build);

        let mut store = CacheStore::new();
        let base = ExecState::image("node:22", &Platform::linux_amd64());
        let mut graph = BuildGraph::new(
            &plan,
            base,
            ExecState::local("context"),
            &mut store,
            None,
            Platform::linux_amd64(),
        );
        graph.compile().unwrap();

        let build_node = graph.node("build").unwrap();
        assert_eq!(build_node.input_env.env_vars["NODE_ENV"], "production");
        assert_eq!(build_node.input_env.path_list, ["/app/node_modules/.bin"]);

        // Inherited env is baked into the step's state
        let state = build_node.state.as_ref().unwrap();
        assert_eq!(state.env_value("NODE_ENV"), Some("production"));
        let path = state.env_value("PATH").unwrap();
        assert!(path.starts_with("/app/node_modules/.bin:"));
    }

    #[test]
    fn later_parent_wins_on_variable_collision() {
        let mut plan = BuildPlan::new();
        plan.add_step(step_with_commands(
            "left",
            vec![Command::variable("SHARED", "from-left")],
        ));
        plan.add_step(step_with_commands(
            "right",
            vec![Command::variable("SHARED", "from-right")],
        ));
        let mut join = Step::new("join");
        join.depend_on("left");
        join.depend_on("right");
        plan.add_step(join);

        let mut store = CacheStore::new();
        let mut graph = BuildGraph::new(
            &plan,
            ExecState::scratch(),
            ExecState::local("context"),
            &mut store,
            None,
            Platform::linux_amd64(),
        );
        graph.compile().unwrap();

        let join_node = graph.node("join").unwrap();
        assert_eq!(join_node.input_env.env_vars["SHARED"], "from-right");
    }

    #[test]
    fn single_leaf_state_is_reused_directly() {
        let mut plan = BuildPlan::new();
        plan.add_step(step_with_commands("only", vec![Command::exec("true")]));

        let mut store = CacheStore::new();
        let mut graph = BuildGraph::new(
            &plan,
            ExecState::scratch(),
            ExecState::local("context"),
            &mut store,
            None,
            Platform::linux_amd64(),
        );
        let output = graph.compile().unwrap();

        let node_state = graph.node("only").unwrap().state.as_ref().unwrap();
        assert!(output.state.same_op(node_state));
    }

    #[test]
    fn multiple_leaves_merge_in_order() {
        let mut plan = BuildPlan::new();
        plan.add_step(step_with_commands("base", vec![Command::exec("true")]));
        let mut leaf_a = step_with_commands("leaf-a", vec![Command::exec("echo a")]);
        leaf_a.depend_on("base");
        plan.add_step(leaf_a);
        let mut leaf_b = step_with_commands("leaf-b", vec![Command::exec("echo b")]);
        leaf_b.depend_on("base");
        plan.add_step(leaf_b);

        let output = compile_plan(&plan);

        // Sequential copy chain: outer op copies from leaf-b over leaf-a
        match output.state.op().as_ref() {
            Op::File { custom_name, input, .. } => {
                assert_eq!(custom_name.as_deref(), Some("copy from leaf-b"));
                match input.as_ref() {
                    Op::File { custom_name, .. } => {
                        assert_eq!(custom_name.as_deref(), Some("copy from leaf-a"));
                    }
                    other => panic!("expected file op, got {other:?}"),
                }
            }
            other => panic!("expected file op, got {other:?}"),
        }
    }

    #[test]
    fn multi_parent_base_merges_parents_in_order() {
        let mut plan = BuildPlan::new();
        plan.add_step(step_with_commands("left", vec![Command::exec("echo left")]));
        plan.add_step(step_with_commands("right", vec![Command::exec("echo right")]));
        let mut join = Step::new("join");
        join.depend_on("left");
        join.depend_on("right");
        plan.add_step(join);

        let mut store = CacheStore::new();
        let mut graph = BuildGraph::new(
            &plan,
            ExecState::scratch(),
            ExecState::local("context"),
            &mut store,
            None,
            Platform::linux_amd64(),
        );
        graph.compile().unwrap();

        let join_state = graph.node("join").unwrap().state.as_ref().unwrap();
        match join_state.op().as_ref() {
            Op::File { custom_name, .. } => {
                assert_eq!(custom_name.as_deref(), Some("copy from right"));
            }
            other => panic!("expected file op, got {other:?}"),
        }
    }

    #[test]
    fn transitive_dependency_edges_are_reduced() {
        let mut plan = BuildPlan::new();
        plan.add_step(Step::new("a"));
        let mut b = Step::new("b");
        b.depend_on("a");
        plan.add_step(b);
        let mut c = Step::new("c");
        c.depend_on("a");
        plan.add_step(c);
        let mut d = Step::new("d");
        d.depend_on("a");
        d.depend_on("b");
        d.depend_on("c");
        plan.add_step(d);

        let mut store = CacheStore::new();
        let graph = BuildGraph::new(
            &plan,
            ExecState::scratch(),
            ExecState::local("context"),
            &mut store,
            None,
            Platform::linux_amd64(),
        );

        assert_eq!(graph.node("d").unwrap().parents(), ["b", "c"]);
    }

    #[test]
    fn missing_dependency_is_ignored() {
        let mut plan = BuildPlan::new();
        let mut step = Step::new("build");
        step.depend_on("ghost");
        plan.add_step(step);

        let output = compile_plan(&plan);
        // The step compiled as if it had no dependencies
        assert!(output.environment.env_vars.is_empty());
    }

    #[test]
    fn dependency_cycle_fails() {
        let mut plan = BuildPlan::new();
        let mut a = Step::new("a");
        a.depend_on("b");
        plan.add_step(a);
        let mut b = Step::new("b");
        b.depend_on("a");
        plan.add_step(b);

        let mut store = CacheStore::new();
        let mut graph = BuildGraph::new(
            &plan,
            ExecState::scratch(),
            ExecState::local("context"),
            &mut store,
            None,
            Platform::linux_amd64(),
        );

        let err = graph.compile().unwrap_err();
        assert!(matches!(err, StrataError::CycleDetected(_)));
    }

    #[test]
    fn leaf_environments_merge_into_output() {
        let mut plan = BuildPlan::new();
        plan.add_step(step_with_commands("base", vec![Command::variable("FROM_BASE", "1")]));
        let mut leaf_a =
            step_with_commands("leaf-a", vec![Command::variable("COLLIDING", "from-a")]);
        leaf_a.depend_on("base");
        plan.add_step(leaf_a);
        let mut leaf_b =
            step_with_commands("leaf-b", vec![Command::variable("COLLIDING", "from-b")]);
        leaf_b.depend_on("base");
        plan.add_step(leaf_b);

        let output = compile_plan(&plan);

        assert_eq!(output.environment.env_vars["FROM_BASE"], "1");
        // leaf-b is later in insertion order, so it wins
        assert_eq!(output.environment.env_vars["COLLIDING"], "from-b");
    }

    #[test]
    fn hash_secret_values_is_deterministic() {
        let mut values = BTreeMap::new();
        values.insert("NPM_TOKEN".to_string(), "s3cret".to_string());
        values.insert("API_KEY".to_string(), "abc123".to_string());

        assert_eq!(hash_secret_values(&values), hash_secret_values(&values));

        let mut changed = values.clone();
        changed.insert("NPM_TOKEN".to_string(), "rotated".to_string());
        assert_ne!(hash_secret_values(&values), hash_secret_values(&changed));
    }
}
