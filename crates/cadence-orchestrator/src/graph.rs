use crate::types::{DependencyEdge, DependencyKind, Task, TaskStatus};
use cadence_core::{AgentId, CadenceError, CadenceResult, Clock, SystemClock, TaskId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A pending task that can never run because a hard prerequisite
/// (directly or transitively) failed or was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvableTask {
    /// The pending task.
    pub task_id: TaskId,
    /// Its direct hard prerequisite on the dead path.
    pub blocked_by: TaskId,
}

#[derive(Default)]
struct GraphInner {
    tasks: HashMap<TaskId, Task>,
    /// Insertion order, used for stable iteration.
    order: Vec<TaskId>,
    edges: Vec<DependencyEdge>,
    /// dependent -> prerequisites
    prerequisites: HashMap<TaskId, Vec<(TaskId, DependencyKind)>>,
}

impl GraphInner {
    fn task(&self, id: TaskId) -> CadenceResult<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| CadenceError::not_found("task", id))
    }

    fn task_mut(&mut self, id: TaskId) -> CadenceResult<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| CadenceError::not_found("task", id))
    }

    /// Whether `target` is reachable from `start` by following
    /// dependent -> prerequisite edges of any kind.
    fn reaches(&self, start: TaskId, target: TaskId) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(prereqs) = self.prerequisites.get(&id) {
                stack.extend(prereqs.iter().map(|(p, _)| *p));
            }
        }
        false
    }

    fn is_executable(&self, task: &Task) -> bool {
        task.status == TaskStatus::Pending
            && self
                .prerequisites
                .get(&task.id)
                .map(|prereqs| {
                    prereqs
                        .iter()
                        .filter(|(_, kind)| *kind == DependencyKind::Hard)
                        .all(|(p, _)| {
                            self.tasks
                                .get(p)
                                .is_some_and(|t| t.status == TaskStatus::Completed)
                        })
                })
                .unwrap_or(true)
    }

    fn dfs_cycle(&self, id: TaskId, visited: &mut HashMap<TaskId, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(prereqs) = self.prerequisites.get(&id) {
            for (dep, _) in prereqs {
                if self.dfs_cycle(*dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}

/// Tasks plus directed dependency edges, kept acyclic at all times.
///
/// All operations are synchronous and serialized behind one lock; an edge
/// that would close a cycle is rejected before insertion.
pub struct TaskDependencyGraph {
    inner: RwLock<GraphInner>,
    version: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl TaskDependencyGraph {
    /// Empty graph on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a graph that stamps `updated_at` from the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
            version: AtomicU64::new(0),
            clock,
        }
    }

    /// Monotonic counter bumped on every successful mutation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Add a task. Fails with `DuplicateTask` if the id is already present.
    pub fn add_task(&self, task: Task) -> CadenceResult<TaskId> {
        let id = task.id;
        {
            let mut inner = self.inner.write();
            if inner.tasks.contains_key(&id) {
                return Err(CadenceError::DuplicateTask(id));
            }
            inner.order.push(id);
            inner.tasks.insert(id, task);
        }
        self.bump();
        debug!(task_id = %id, "Task added to graph");
        Ok(id)
    }

    /// Record that `from` depends on `to`.
    ///
    /// Rejected with `CircularDependency` if `to` already (transitively)
    /// depends on `from`; the graph is left untouched on every error.
    pub fn add_dependency(
        &self,
        from: TaskId,
        to: TaskId,
        kind: DependencyKind,
    ) -> CadenceResult<()> {
        {
            let mut inner = self.inner.write();
            inner.task(from)?;
            inner.task(to)?;

            if from == to || inner.reaches(to, from) {
                warn!(from = %from, to = %to, "Rejected dependency: would close a cycle");
                return Err(CadenceError::CircularDependency { from, to });
            }

            let prereqs = inner.prerequisites.entry(from).or_default();
            if prereqs.iter().any(|(p, _)| *p == to) {
                return Err(CadenceError::Validation(format!(
                    "dependency {from} -> {to} already exists"
                )));
            }
            prereqs.push((to, kind));
            inner.edges.push(DependencyEdge { from, to, kind });
        }
        self.bump();
        debug!(from = %from, to = %to, kind = ?kind, "Dependency added");
        Ok(())
    }

    /// Pending tasks whose hard prerequisites are all completed,
    /// in creation order.
    pub fn get_executable_tasks(&self) -> Vec<Task> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| inner.is_executable(t))
            .cloned()
            .collect()
    }

    /// Get a copy of a task by id.
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.inner.read().tasks.get(&id).cloned()
    }

    /// All tasks in creation order.
    pub fn snapshot(&self) -> Vec<Task> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .cloned()
            .collect()
    }

    /// Copies of the given tasks, in the order requested.
    pub fn snapshot_of(&self, ids: &[TaskId]) -> CadenceResult<Vec<Task>> {
        let inner = self.inner.read();
        ids.iter().map(|id| inner.task(*id).cloned()).collect()
    }

    /// Edges leaving `id` (its prerequisites).
    pub fn dependencies_of(&self, id: TaskId) -> CadenceResult<Vec<DependencyEdge>> {
        let inner = self.inner.read();
        inner.task(id)?;
        Ok(inner
            .prerequisites
            .get(&id)
            .map(|prereqs| {
                prereqs
                    .iter()
                    .map(|(to, kind)| DependencyEdge {
                        from: id,
                        to: *to,
                        kind: *kind,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Transition a task's status. Completed and cancelled tasks are final.
    pub fn update_status(&self, id: TaskId, status: TaskStatus) -> CadenceResult<Task> {
        let now = self.clock.now();
        let updated = {
            let mut inner = self.inner.write();
            let task = inner.task_mut(id)?;
            if task.status == status {
                return Ok(task.clone());
            }
            if task.status.is_final() {
                return Err(CadenceError::Validation(format!(
                    "task {id} is {:?} and cannot move to {status:?}",
                    task.status
                )));
            }
            if status == TaskStatus::InProgress {
                task.started_at = Some(now);
            }
            if status == TaskStatus::Completed {
                if let Some(started) = task.started_at {
                    task.actual_duration = (now - started).to_std().ok();
                }
            }
            task.status = status;
            task.updated_at = now;
            task.clone()
        };
        self.bump();
        info!(task_id = %id, status = ?status, "Task status updated");
        Ok(updated)
    }

    /// Assign (or with `None`, unassign) a task to an agent.
    pub fn assign(&self, id: TaskId, agent: Option<AgentId>) -> CadenceResult<()> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.write();
            let task = inner.task_mut(id)?;
            if task.status.is_final() {
                return Err(CadenceError::Validation(format!(
                    "task {id} is {:?} and cannot be reassigned",
                    task.status
                )));
            }
            task.assigned_agent = agent;
            task.updated_at = now;
        }
        self.bump();
        Ok(())
    }

    /// Pending tasks that can never become executable.
    pub fn unresolvable_tasks(&self) -> Vec<UnresolvableTask> {
        let inner = self.inner.read();
        let mut dead: HashMap<TaskId, TaskId> = HashMap::new();

        // Propagate until no new dead task is found; order is topological-agnostic.
        loop {
            let mut changed = false;
            for id in &inner.order {
                if dead.contains_key(id) {
                    continue;
                }
                let Some(task) = inner.tasks.get(id) else {
                    continue;
                };
                if task.status != TaskStatus::Pending {
                    continue;
                }
                let Some(prereqs) = inner.prerequisites.get(id) else {
                    continue;
                };
                let blocker = prereqs
                    .iter()
                    .filter(|(_, kind)| *kind == DependencyKind::Hard)
                    .find_map(|(p, _)| {
                        let status = inner.tasks.get(p).map(|t| t.status)?;
                        if matches!(status, TaskStatus::Failed | TaskStatus::Cancelled) {
                            Some(*p)
                        } else {
                            dead.contains_key(p).then_some(*p)
                        }
                    });
                if let Some(blocker) = blocker {
                    dead.insert(*id, blocker);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        inner
            .order
            .iter()
            .filter_map(|id| {
                dead.get(id).map(|blocker| UnresolvableTask {
                    task_id: *id,
                    blocked_by: *blocker,
                })
            })
            .collect()
    }

    /// Full traversal check. Always false for a graph built through
    /// [`add_dependency`](Self::add_dependency).
    pub fn has_cycle(&self) -> bool {
        let inner = self.inner.read();
        let mut visited = HashMap::new();
        inner
            .order
            .iter()
            .any(|id| inner.dfs_cycle(*id, &mut visited))
    }

    /// Number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.inner.read().tasks.len()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }

    /// Number of tasks with the given status.
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.inner
            .read()
            .tasks
            .values()
            .filter(|t| t.status == status)
            .count()
    }
}

impl Default for TaskDependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::TaskPriority;
    use cadence_core::ManualClock;
    use chrono::Utc;

    fn task(title: &str) -> Task {
        Task::new(title, TaskPriority::Medium)
    }

    #[test]
    fn test_empty_graph() {
        let graph = TaskDependencyGraph::new();
        assert_eq!(graph.task_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.get_executable_tasks().is_empty());
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let graph = TaskDependencyGraph::new();
        let t = task("Design schema");
        let copy = t.clone();
        graph.add_task(t).unwrap();
        let err = graph.add_task(copy).unwrap_err();
        assert!(matches!(err, CadenceError::DuplicateTask(_)));
        assert_eq!(graph.task_count(), 1);
    }

    #[test]
    fn test_executable_in_creation_order() {
        let graph = TaskDependencyGraph::new();
        let low = Task::new("A", TaskPriority::Low);
        let critical = Task::new("B", TaskPriority::Critical);
        graph.add_task(low).unwrap();
        graph.add_task(critical).unwrap();

        let ready = graph.get_executable_tasks();
        let titles: Vec<&str> = ready.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn test_hard_dependency_blocks_until_completed() {
        let graph = TaskDependencyGraph::new();
        let spec = graph.add_task(task("Spec")).unwrap();
        let code = graph.add_task(task("Code")).unwrap();
        graph
            .add_dependency(code, spec, DependencyKind::Hard)
            .unwrap();

        let ready = graph.get_executable_tasks();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, spec);

        graph.update_status(spec, TaskStatus::InProgress).unwrap();
        assert!(graph.get_executable_tasks().is_empty());

        graph.update_status(spec, TaskStatus::Completed).unwrap();
        let ready = graph.get_executable_tasks();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, code);
    }

    #[test]
    fn test_soft_dependency_is_advisory() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        let b = graph.add_task(task("B")).unwrap();
        graph.add_dependency(b, a, DependencyKind::Soft).unwrap();
        assert_eq!(graph.get_executable_tasks().len(), 2);
    }

    #[test]
    fn test_dependency_chain() {
        let graph = TaskDependencyGraph::new();
        let spec = graph.add_task(task("Spec")).unwrap();
        let code = graph.add_task(task("Code")).unwrap();
        let test = graph.add_task(task("Test")).unwrap();
        let review = graph.add_task(task("Review")).unwrap();
        graph.add_dependency(code, spec, DependencyKind::Hard).unwrap();
        graph.add_dependency(test, code, DependencyKind::Hard).unwrap();
        graph.add_dependency(review, code, DependencyKind::Hard).unwrap();
        graph.add_dependency(review, test, DependencyKind::Hard).unwrap();

        for id in [spec, code, test, review] {
            let ready = graph.get_executable_tasks();
            assert_eq!(ready.len(), 1);
            assert_eq!(ready[0].id, id);
            graph.update_status(id, TaskStatus::InProgress).unwrap();
            graph.update_status(id, TaskStatus::Completed).unwrap();
        }
        assert!(graph.get_executable_tasks().is_empty());
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        let b = graph.add_task(task("B")).unwrap();
        let c = graph.add_task(task("C")).unwrap();
        graph.add_dependency(a, b, DependencyKind::Hard).unwrap();
        graph.add_dependency(b, c, DependencyKind::Soft).unwrap();

        let edges_before = graph.edge_count();
        let version_before = graph.version();
        let err = graph.add_dependency(c, a, DependencyKind::Hard).unwrap_err();
        assert!(matches!(
            err,
            CadenceError::CircularDependency { from, to } if from == c && to == a
        ));
        assert_eq!(graph.edge_count(), edges_before);
        assert_eq!(graph.version(), version_before);
        assert!(graph.dependencies_of(c).unwrap().is_empty());
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        assert!(matches!(
            graph.add_dependency(a, a, DependencyKind::Soft),
            Err(CadenceError::CircularDependency { .. })
        ));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_dependency_on_unknown_task() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        let err = graph
            .add_dependency(a, uuid::Uuid::new_v4(), DependencyKind::Hard)
            .unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(_)));
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        let b = graph.add_task(task("B")).unwrap();
        graph.add_dependency(a, b, DependencyKind::Hard).unwrap();
        assert!(matches!(
            graph.add_dependency(a, b, DependencyKind::Soft),
            Err(CadenceError::Validation(_))
        ));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_final_status_is_sticky() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        graph.update_status(a, TaskStatus::Cancelled).unwrap();
        assert!(graph.update_status(a, TaskStatus::Pending).is_err());
        assert!(graph.assign(a, Some("developer-1".into())).is_err());
        assert_eq!(graph.get(a).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_actual_duration_recorded() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let graph = TaskDependencyGraph::with_clock(clock.clone());
        let a = graph.add_task(task("A")).unwrap();
        graph.update_status(a, TaskStatus::InProgress).unwrap();
        clock.advance(chrono::Duration::minutes(30));
        let done = graph.update_status(a, TaskStatus::Completed).unwrap();
        assert_eq!(
            done.actual_duration,
            Some(std::time::Duration::from_secs(1800))
        );
    }

    #[test]
    fn test_unknown_task_status_update() {
        let graph = TaskDependencyGraph::new();
        assert!(matches!(
            graph.update_status(uuid::Uuid::new_v4(), TaskStatus::Completed),
            Err(CadenceError::NotFound(_))
        ));
    }

    #[test]
    fn test_unresolvable_tasks_transitive() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        let b = graph.add_task(task("B")).unwrap();
        let c = graph.add_task(task("C")).unwrap();
        let d = graph.add_task(task("D")).unwrap();
        graph.add_dependency(b, a, DependencyKind::Hard).unwrap();
        graph.add_dependency(c, b, DependencyKind::Hard).unwrap();
        graph.add_dependency(d, a, DependencyKind::Soft).unwrap();

        assert!(graph.unresolvable_tasks().is_empty());
        graph.update_status(a, TaskStatus::Failed).unwrap();

        let dead = graph.unresolvable_tasks();
        assert_eq!(
            dead,
            vec![
                UnresolvableTask {
                    task_id: b,
                    blocked_by: a
                },
                UnresolvableTask {
                    task_id: c,
                    blocked_by: b
                },
            ]
        );
    }

    #[test]
    fn test_snapshot_of_unknown_id() {
        let graph = TaskDependencyGraph::new();
        let a = graph.add_task(task("A")).unwrap();
        assert_eq!(graph.snapshot_of(&[a]).unwrap().len(), 1);
        assert!(graph.snapshot_of(&[a, uuid::Uuid::new_v4()]).is_err());
    }

    #[test]
    fn test_concurrent_edges_stay_acyclic() {
        let graph = Arc::new(TaskDependencyGraph::new());
        let ids: Vec<TaskId> = (0..12)
            .map(|i| graph.add_task(task(&format!("T{i}"))).unwrap())
            .collect();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let graph = graph.clone();
                let ids = ids.clone();
                scope.spawn(move || {
                    for (i, from) in ids.iter().enumerate() {
                        for (j, to) in ids.iter().enumerate() {
                            // Workers try opposing directions so that many
                            // candidate edges would close cycles.
                            let forward = (i + j + worker) % 2 == 0;
                            let (f, t) = if forward { (*from, *to) } else { (*to, *from) };
                            let _ = graph.add_dependency(f, t, DependencyKind::Hard);
                        }
                    }
                });
            }
        });

        assert!(graph.edge_count() > 0);
        assert!(!graph.has_cycle());
    }
}
