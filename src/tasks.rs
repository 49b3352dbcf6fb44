//! Task graph
//!
//! Named, composable command sequences persisted for an execution
//! environment to run later. A step either executes a command line,
//! spawns another task by name, or invokes a host-resolved builtin.
//! Spawn references stay symbolic in the persisted manifest; the graph is
//! only expanded (topologically, over spawn edges) to reject cycles when
//! a project's configuration is finalized. Steps may carry a
//! synthesis-time inclusion condition evaluated once against the frozen
//! project configuration.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::Result;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::render_json;
use crate::project::SynthContext;
use crate::unit::Synthesizable;
use crate::writer::FileSink;

/// Where the task manifest is synthesized, relative to the owning
/// project's output directory.
pub const TASKS_MANIFEST_PATH: &str = ".blueprint/tasks.json";

#[derive(Debug, Error, PartialEq)]
pub enum TaskError {
    #[error("A task named '{0}' already exists; remove it first to redefine it")]
    DuplicateTask(String),

    #[error("Task spawn chain contains a cycle: {}", path.join(" -> "))]
    CyclicTaskGraph { path: Vec<String> },

    #[error("Task '{spawned}' spawned by '{from}' does not exist")]
    UnknownTask { from: String, spawned: String },
}

/// Synthesis-time predicate deciding whether a step is included.
///
/// Conditions are evaluated exactly once per pass, after configuration is
/// frozen, and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCondition {
    /// Keep the step only when the owning project is the tree root.
    RootOnly,
    /// Keep the step only when the named feature is enabled on the
    /// project.
    FeatureEnabled(String),
}

impl StepCondition {
    fn evaluate(&self, is_root: bool, features: &BTreeSet<String>) -> bool {
        match self {
            StepCondition::RootOnly => is_root,
            StepCondition::FeatureEnabled(feature) => features.contains(feature),
        }
    }
}

/// One step of a task. Exactly one of `exec`, `spawn`, or `builtin`
/// should be set; the constructors keep that invariant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    /// Literal command line to execute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,

    /// Name of another task to run in place of this step, resolved by the
    /// execution environment at run time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn: Option<String>,

    /// Named side-effecting operation resolved by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,

    /// Arguments for a builtin step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, serde_json::Value>,

    #[serde(skip)]
    condition: Option<StepCondition>,
}

impl TaskStep {
    pub fn exec(command: impl Into<String>) -> Self {
        Self {
            exec: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn spawn(task: impl Into<String>) -> Self {
        Self {
            spawn: Some(task.into()),
            ..Default::default()
        }
    }

    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            builtin: Some(name.into()),
            ..Default::default()
        }
    }

    /// Adds a builtin argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Restricts the step to configurations where `condition` holds.
    pub fn only_if(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A named, ordered sequence of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(skip)]
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub steps: Vec<TaskStep>,

    /// Environment variables the execution environment must provide
    /// before running the steps. Advisory metadata: presence is enforced
    /// at run time, never here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_env: Vec<String>,
}

impl Task {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a command step.
    pub fn exec(&mut self, command: impl Into<String>) -> &mut Self {
        self.step(TaskStep::exec(command))
    }

    /// Appends a spawn step referencing another task by name.
    pub fn spawn(&mut self, task: impl Into<String>) -> &mut Self {
        self.step(TaskStep::spawn(task))
    }

    /// Appends a builtin step.
    pub fn builtin(&mut self, name: impl Into<String>) -> &mut Self {
        self.step(TaskStep::builtin(name))
    }

    /// Appends a fully configured step.
    pub fn step(&mut self, step: TaskStep) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Declares an environment variable the task needs at run time.
    pub fn require_env(&mut self, variable: impl Into<String>) -> &mut Self {
        self.required_env.push(variable.into());
        self
    }

    /// Names of the tasks this task spawns.
    fn spawned(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| s.spawn.as_deref())
    }
}

/// The project's named tasks.
#[derive(Debug, Default)]
pub struct Tasks {
    tasks: BTreeMap<String, Task>,
}

impl Tasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a new task and returns it for configuration.
    ///
    /// Fails with [`TaskError::DuplicateTask`] if the name is taken;
    /// redefinition requires an explicit [`Tasks::remove`] first.
    pub fn add(&mut self, name: &str) -> Result<&mut Task, TaskError> {
        if self.tasks.contains_key(name) {
            return Err(TaskError::DuplicateTask(name.to_string()));
        }
        Ok(self
            .tasks
            .entry(name.to_string())
            .or_insert_with(|| Task::named(name)))
    }

    /// Removes a task definition. Spawn steps in other tasks that
    /// reference it become invalid and are rejected at finalization.
    pub fn remove(&mut self, name: &str) -> Option<Task> {
        self.tasks.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Finalizes the graph once the owning project's configuration is
    /// frozen: evaluates every step condition (dropping excluded steps)
    /// and rejects spawn cycles and dangling spawn references.
    pub(crate) fn finalize(
        &mut self,
        is_root: bool,
        features: &BTreeSet<String>,
    ) -> Result<(), TaskError> {
        for task in self.tasks.values_mut() {
            task.steps.retain(|step| {
                step.condition
                    .as_ref()
                    .map_or(true, |c| c.evaluate(is_root, features))
            });
        }
        self.check_spawn_graph()
    }

    /// Topological expansion over spawn edges; spawn steps themselves
    /// stay symbolic, the expansion exists only to reject cycles.
    fn check_spawn_graph(&self) -> Result<(), TaskError> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for name in self.tasks.keys() {
            nodes.insert(name, graph.add_node(name.clone()));
        }
        for task in self.tasks.values() {
            for spawned in task.spawned() {
                let target = nodes.get(spawned).ok_or_else(|| TaskError::UnknownTask {
                    from: task.name.clone(),
                    spawned: spawned.to_string(),
                })?;
                graph.add_edge(nodes[task.name.as_str()], *target, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(TaskError::CyclicTaskGraph {
                path: cycle_path(&graph, cycle.node_id()),
            }),
        }
    }

    /// The persisted manifest shape: task name → definition, spawn
    /// references unresolved.
    pub fn manifest(&self) -> TaskManifest {
        TaskManifest {
            tasks: self.tasks.clone(),
        }
    }
}

/// Persisted task manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    pub tasks: BTreeMap<String, Task>,
}

/// Reconstructs one cycle through `start` for error reporting.
fn cycle_path(graph: &DiGraph<String, ()>, start: NodeIndex) -> Vec<String> {
    fn walk(
        graph: &DiGraph<String, ()>,
        current: NodeIndex,
        start: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> bool {
        for next in graph.neighbors(current) {
            if next == start {
                return true;
            }
            if visited.insert(next) {
                path.push(next);
                if walk(graph, next, start, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    let mut visited = HashSet::from([start]);
    let mut path = vec![start];
    walk(graph, start, start, &mut visited, &mut path);
    path.push(start);
    path.into_iter().map(|n| graph[n].clone()).collect()
}

/// Always-present unit that synthesizes the project's task manifest.
#[derive(Debug, Default)]
pub(crate) struct TaskManifestFile;

impl Synthesizable for TaskManifestFile {
    fn kind(&self) -> &'static str {
        "TaskManifest"
    }

    fn synthesize(&self, ctx: &SynthContext<'_>, files: &mut FileSink<'_>) -> Result<()> {
        let value = serde_json::to_value(ctx.tasks.manifest())?;
        files.write(TASKS_MANIFEST_PATH, render_json(&value, true)?, true)?;
        Ok(())
    }
}
