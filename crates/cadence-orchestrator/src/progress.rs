use crate::graph::TaskDependencyGraph;
use crate::state::{AgentStateManager, HealthReport};
use crate::types::TaskStatus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Project-wide progress derived from the agent table and the task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Agents in a non-terminal status.
    pub active_agents: usize,
    /// Registered agents.
    pub total_agents: usize,
    /// Mean of every agent's progress (not task-weighted).
    pub overall_progress: f64,
    /// Tasks in the graph.
    pub tasks_total: usize,
    /// Tasks in `Completed`.
    pub tasks_completed: usize,
    /// Pending tasks whose hard prerequisites are all completed.
    pub executable_tasks: usize,
}

struct CachedSummary {
    agents_version: u64,
    graph_version: u64,
    summary: ProgressSummary,
}

/// Read-only combinator over [`AgentStateManager`] and
/// [`TaskDependencyGraph`]. Caches the last summary until either source
/// reports a new version.
pub struct ProgressAggregator {
    graph: Arc<TaskDependencyGraph>,
    agents: Arc<AgentStateManager>,
    cache: Mutex<Option<CachedSummary>>,
    health_timeout: Duration,
}

impl ProgressAggregator {
    /// Aggregator with a 500 ms health-check timeout.
    pub fn new(graph: Arc<TaskDependencyGraph>, agents: Arc<AgentStateManager>) -> Self {
        Self {
            graph,
            agents,
            cache: Mutex::new(None),
            health_timeout: Duration::from_millis(500),
        }
    }

    /// Override the health-check timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Current summary, served from cache while neither source changed.
    pub async fn get_progress_summary(&self) -> ProgressSummary {
        // Versions are read before the snapshots: a concurrent mutation can
        // only make the cached entry look older than it is, never newer.
        let agents_version = self.agents.version();
        let graph_version = self.graph.version();
        if let Some(cached) = self.cache.lock().as_ref() {
            if cached.agents_version == agents_version && cached.graph_version == graph_version {
                return cached.summary.clone();
            }
        }

        let states = self.agents.snapshot().await;
        let active_agents = states.iter().filter(|s| !s.status.is_terminal()).count();
        let overall_progress = if states.is_empty() {
            0.0
        } else {
            states.iter().map(|s| s.progress).sum::<f64>() / states.len() as f64
        };

        let summary = ProgressSummary {
            active_agents,
            total_agents: states.len(),
            overall_progress,
            tasks_total: self.graph.task_count(),
            tasks_completed: self.graph.count_with_status(TaskStatus::Completed),
            executable_tasks: self.graph.get_executable_tasks().len(),
        };

        *self.cache.lock() = Some(CachedSummary {
            agents_version,
            graph_version,
            summary: summary.clone(),
        });
        summary
    }

    /// Agent health, degraded to "unhealthy" if the check does not finish
    /// within the configured timeout.
    pub async fn health(&self) -> HealthReport {
        match tokio::time::timeout(self.health_timeout, self.agents.health_check()).await {
            Ok(report) => report,
            Err(_) => {
                warn!(
                    timeout_ms = self.health_timeout.as_millis() as u64,
                    "Health check timed out; reporting unhealthy"
                );
                HealthReport::degraded("health check timed out")
            }
        }
    }
}
