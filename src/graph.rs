//! Task graph and concurrent scheduler.
//!
//! Tasks are nodes of a DAG with edges from prerequisite to dependent. The
//! scheduler starts every task whose prerequisites have all succeeded, runs
//! independent tasks concurrently and skips dependents of failed tasks.
//! Running tasks are never cancelled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::PipelineError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task defined twice: {0}")]
    DuplicateTask(String),

    #[error("Task {task} depends on unknown task {prerequisite}")]
    UnknownPrerequisite { task: String, prerequisite: String },

    #[error("Dependency cycle detected")]
    CycleDetected,
}

/// A named unit of work with optional prerequisites
#[async_trait]
pub trait Task<C>: Send + Sync {
    fn name(&self) -> &str;

    fn prerequisites(&self) -> Vec<String> {
        vec![]
    }

    async fn run(&self, ctx: Arc<C>) -> Result<(), PipelineError>;
}

/// Lifecycle of a task within one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded { duration_ms: u64 },
    Failed { error: String, lint_failure: bool, duration_ms: u64 },
    Skipped { failed_dependency: String },
}

impl TaskState {
    pub fn is_final(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running)
    }
}

/// Outcome of a scheduler run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: BTreeMap<String, TaskState>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.tasks.values().all(|s| matches!(s, TaskState::Succeeded { .. }))
    }

    pub fn state(&self, task: &str) -> Option<&TaskState> {
        self.tasks.get(task)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.tasks.iter()
            .filter(|(_, s)| matches!(s, TaskState::Failed { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn lint_failed(&self) -> bool {
        self.tasks.values().any(|s| matches!(s, TaskState::Failed { lint_failure: true, .. }))
    }
}

/// DAG of tasks, edges run from prerequisite to dependent
pub struct TaskGraph<C> {
    graph: DiGraph<Arc<dyn Task<C>>, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl<C> TaskGraph<C>
where
    C: Send + Sync + 'static,
{
    pub fn from_tasks(tasks: Vec<Arc<dyn Task<C>>>) -> Result<Self, ScheduleError> {
        let mut graph: DiGraph<Arc<dyn Task<C>>, ()> = DiGraph::new();
        let mut nodes = HashMap::new();

        for task in tasks {
            let name = task.name().to_string();
            if nodes.contains_key(&name) {
                return Err(ScheduleError::DuplicateTask(name));
            }
            let idx = graph.add_node(task);
            nodes.insert(name, idx);
        }

        let mut edges = vec![];
        for (name, &idx) in &nodes {
            for prerequisite in graph[idx].prerequisites() {
                let &dep_idx = nodes.get(&prerequisite).ok_or_else(|| {
                    ScheduleError::UnknownPrerequisite { task: name.clone(), prerequisite: prerequisite.clone() }
                })?;
                edges.push((dep_idx, idx));
            }
        }
        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        toposort(&graph, None).map_err(|_| ScheduleError::CycleDetected)?;
        Ok(Self { graph, nodes })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Targets plus everything they transitively depend on
    fn closure(&self, targets: &[&str]) -> Result<HashSet<NodeIndex>, ScheduleError> {
        let mut selected = HashSet::new();
        let mut stack = vec![];
        for target in targets {
            let idx = self.nodes.get(*target)
                .ok_or_else(|| ScheduleError::UnknownTask(target.to_string()))?;
            stack.push(*idx);
        }
        while let Some(idx) = stack.pop() {
            if selected.insert(idx) {
                stack.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
            }
        }
        Ok(selected)
    }

    fn name_of(&self, idx: NodeIndex) -> String {
        self.graph[idx].name().to_string()
    }
}

/// Runs a `TaskGraph` on the tokio runtime
pub struct Scheduler<C> {
    graph: Arc<TaskGraph<C>>,
}

impl<C> Scheduler<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(graph: TaskGraph<C>) -> Self {
        Self { graph: Arc::new(graph) }
    }

    pub fn graph(&self) -> &TaskGraph<C> {
        &self.graph
    }

    /// Run `targets` and their prerequisites to completion
    pub async fn run(&self, targets: &[&str], ctx: Arc<C>) -> Result<RunReport, ScheduleError> {
        let selected = self.graph.closure(targets)?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, targets = ?targets, tasks = selected.len(), "starting run");

        let mut states: HashMap<NodeIndex, TaskState> =
            selected.iter().map(|&idx| (idx, TaskState::Pending)).collect();
        let mut waiting: HashMap<NodeIndex, usize> = selected.iter()
            .map(|&idx| {
                let count = self.graph.graph.neighbors_directed(idx, Direction::Incoming)
                    .filter(|dep| selected.contains(dep))
                    .count();
                (idx, count)
            })
            .collect();

        let mut running = JoinSet::new();
        let mut ready: Vec<NodeIndex> = waiting.iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&idx, _)| idx)
            .collect();
        ready.sort();

        loop {
            for idx in ready.drain(..) {
                states.insert(idx, TaskState::Running);
                self.spawn(&mut running, idx, ctx.clone());
            }

            let Some(joined) = running.join_next().await else { break };
            let (idx, outcome, elapsed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "scheduler lost a task");
                    continue;
                }
            };
            let name = self.graph.name_of(idx);
            let duration_ms = elapsed.as_millis() as u64;

            match outcome {
                Ok(()) => {
                    info!(task = %name, duration_ms, "task finished");
                    states.insert(idx, TaskState::Succeeded { duration_ms });
                    for dependent in self.graph.graph.neighbors_directed(idx, Direction::Outgoing) {
                        let Some(count) = waiting.get_mut(&dependent) else { continue };
                        *count = count.saturating_sub(1);
                        if *count == 0 && states.get(&dependent) == Some(&TaskState::Pending) {
                            ready.push(dependent);
                        }
                    }
                }
                Err(e) => {
                    error!(task = %name, duration_ms, error = %e, "task failed");
                    states.insert(idx, TaskState::Failed {
                        error: e.to_string(),
                        lint_failure: e.is_lint_failure(),
                        duration_ms,
                    });
                    self.skip_dependents(idx, &name, &mut states);
                }
            }
        }

        // only reachable when a task was lost
        for state in states.values_mut() {
            if !state.is_final() {
                *state = TaskState::Skipped { failed_dependency: "scheduler".to_string() };
            }
        }

        let report = RunReport {
            run_id,
            targets: targets.iter().map(|t| t.to_string()).collect(),
            started_at,
            finished_at: Utc::now(),
            tasks: states.into_iter().map(|(idx, s)| (self.graph.name_of(idx), s)).collect(),
        };
        info!(%run_id, success = report.is_success(), "run complete");
        Ok(report)
    }

    fn spawn(
        &self,
        running: &mut JoinSet<(NodeIndex, Result<(), PipelineError>, std::time::Duration)>,
        idx: NodeIndex,
        ctx: Arc<C>,
    ) {
        let task = self.graph.graph[idx].clone();
        let name = task.name().to_string();
        info!(task = %name, "task started");
        running.spawn(async move {
            let started = Instant::now();
            // inner spawn turns a panic into a task failure
            let outcome = match tokio::spawn(async move { task.run(ctx).await }).await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::Interrupted(name, e.to_string())),
            };
            (idx, outcome, started.elapsed())
        });
    }

    fn skip_dependents(&self, failed: NodeIndex, failed_name: &str, states: &mut HashMap<NodeIndex, TaskState>) {
        let mut stack: Vec<NodeIndex> = self.graph.graph.neighbors_directed(failed, Direction::Outgoing).collect();
        while let Some(idx) = stack.pop() {
            if states.get(&idx) != Some(&TaskState::Pending) {
                continue;
            }
            warn!(task = %self.graph.name_of(idx), failed_dependency = failed_name, "skipping task");
            states.insert(idx, TaskState::Skipped { failed_dependency: failed_name.to_string() });
            stack.extend(self.graph.graph.neighbors_directed(idx, Direction::Outgoing));
        }
    }
}
