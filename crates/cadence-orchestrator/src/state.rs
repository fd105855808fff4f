use crate::types::{AgentRegistration, AgentState, AgentStatus};
use cadence_core::{AgentId, CadenceError, CadenceResult, Clock, SystemClock, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Result of [`AgentStateManager::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// False if any agent needs attention or the check did not complete.
    pub healthy: bool,
    /// Summary naming the agents that need attention.
    pub message: String,
    /// Agents that are in `Error` or unresponsive beyond the threshold.
    #[serde(default)]
    pub unhealthy_agents: Vec<AgentId>,
}

impl HealthReport {
    /// Conservative signal used when the check itself could not run.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            unhealthy_agents: Vec::new(),
        }
    }
}

/// Owns one mutable [`AgentState`] per registered agent.
///
/// Every mutation happens under the write lock, so concurrent progress
/// reports are never lost. Other components only ever receive clones.
pub struct AgentStateManager {
    states: RwLock<HashMap<AgentId, AgentState>>,
    version: AtomicU64,
    clock: Arc<dyn Clock>,
    stale_after: chrono::Duration,
}

impl AgentStateManager {
    /// Empty table on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty table stamping updates with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            clock,
            stale_after: chrono::Duration::minutes(5),
        }
    }

    /// Set how long an agent may stay silent (or in `Error`) before the
    /// health check reports it.
    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Monotonic counter bumped on every successful mutation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Register an agent in `Idle` state.
    pub async fn add_agent(&self, registration: AgentRegistration) -> CadenceResult<()> {
        let now = self.clock.now();
        {
            let mut states = self.states.write().await;
            if states.contains_key(&registration.agent_id) {
                return Err(CadenceError::DuplicateAgent(registration.agent_id));
            }
            info!(agent_id = %registration.agent_id, role = %registration.role, "Agent registered");
            states.insert(
                registration.agent_id.clone(),
                AgentState {
                    agent_id: registration.agent_id,
                    role: registration.role,
                    status: AgentStatus::Idle,
                    progress: 0.0,
                    last_update: now,
                    status_since: now,
                    current_task: None,
                    working_directory: registration.working_directory,
                    process_id: registration.process_id,
                },
            );
        }
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Apply `f` to the agent's record under the write lock and stamp
    /// `last_update`. Fails with `NotFound` without touching anything else.
    async fn mutate<F>(&self, agent_id: &str, f: F) -> CadenceResult<()>
    where
        F: FnOnce(&mut AgentState, chrono::DateTime<chrono::Utc>),
    {
        let now = self.clock.now();
        {
            let mut states = self.states.write().await;
            let Some(state) = states.get_mut(agent_id) else {
                warn!(agent_id = %agent_id, "Update for unknown agent");
                return Err(CadenceError::not_found("agent", agent_id));
            };
            f(state, now);
            state.last_update = now;
        }
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Record a progress value in `[0, 1]`.
    pub async fn update_agent_progress(&self, agent_id: &str, progress: f64) -> CadenceResult<()> {
        validate_progress(progress)?;
        self.mutate(agent_id, |state, _| state.progress = progress)
            .await?;
        debug!(agent_id = %agent_id, progress, "Agent progress updated");
        Ok(())
    }

    /// Move an agent to a new status.
    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> CadenceResult<()> {
        self.mutate(agent_id, |state, now| set_status(state, status, now))
            .await?;
        debug!(agent_id = %agent_id, status = ?status, "Agent status updated");
        Ok(())
    }

    /// Apply a periodic `(progress, status)` report in one atomic step.
    pub async fn report(
        &self,
        agent_id: &str,
        progress: f64,
        status: AgentStatus,
    ) -> CadenceResult<()> {
        validate_progress(progress)?;
        self.mutate(agent_id, |state, now| {
            state.progress = progress;
            set_status(state, status, now);
        })
        .await
    }

    /// Apply a batch of `(agent, progress, status)` reports atomically:
    /// either every agent exists and every progress is valid and all are
    /// applied, or nothing changes.
    pub async fn apply_reports(
        &self,
        reports: &[(&str, f64, AgentStatus)],
    ) -> CadenceResult<()> {
        for (_, progress, _) in reports {
            validate_progress(*progress)?;
        }
        let now = self.clock.now();
        {
            let mut states = self.states.write().await;
            let unknown = reports
                .iter()
                .map(|(id, _, _)| *id)
                .find(|id| !states.contains_key(*id));
            if let Some(missing) = unknown {
                warn!(agent_id = %missing, "Report batch names unknown agent");
                return Err(CadenceError::not_found("agent", missing));
            }
            for (agent_id, progress, status) in reports {
                if let Some(state) = states.get_mut(*agent_id) {
                    state.progress = *progress;
                    set_status(state, *status, now);
                    state.last_update = now;
                }
            }
        }
        self.version.fetch_add(1, Ordering::AcqRel);
        debug!(reports = reports.len(), "Agent report batch applied");
        Ok(())
    }

    /// Mark an agent as working on a task, resetting its progress.
    pub async fn assign_task(&self, agent_id: &str, task_id: TaskId) -> CadenceResult<()> {
        self.mutate(agent_id, |state, now| {
            state.current_task = Some(task_id);
            state.progress = 0.0;
            set_status(state, AgentStatus::Working, now);
        })
        .await?;
        info!(agent_id = %agent_id, task_id = %task_id, "Agent started task");
        Ok(())
    }

    /// Mark an agent as idle (task completed or abandoned).
    pub async fn finish_task(&self, agent_id: &str) -> CadenceResult<()> {
        self.mutate(agent_id, |state, now| {
            state.current_task = None;
            set_status(state, AgentStatus::Idle, now);
        })
        .await
    }

    /// Refresh `last_update` without changing anything else.
    pub async fn heartbeat(&self, agent_id: &str) -> CadenceResult<()> {
        self.mutate(agent_id, |_, _| {}).await
    }

    /// Record (or clear) the OS process backing an agent.
    pub async fn set_process_id(&self, agent_id: &str, pid: Option<u32>) -> CadenceResult<()> {
        self.mutate(agent_id, |state, _| state.process_id = pid)
            .await
    }

    /// Get the state of a specific agent.
    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        self.states.read().await.get(agent_id).cloned()
    }

    /// Snapshot of all agent states, sorted by agent id.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut all: Vec<AgentState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Registered agent ids, sorted.
    pub async fn agent_ids(&self) -> Vec<AgentId> {
        let states = self.states.read().await;
        let mut ids: Vec<AgentId> = states.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered agents.
    pub async fn agent_count(&self) -> usize {
        self.states.read().await.len()
    }

    /// Unhealthy if any agent has been in `Error`, or silent, for longer
    /// than the stale threshold.
    pub async fn health_check(&self) -> HealthReport {
        let now = self.clock.now();
        let states = self.states.read().await;

        let mut errored = Vec::new();
        let mut stale = Vec::new();
        for state in states.values() {
            if state.status == AgentStatus::Error && now - state.status_since > self.stale_after {
                errored.push(state.agent_id.clone());
            } else if state.status != AgentStatus::Completed
                && now - state.last_update > self.stale_after
            {
                stale.push(state.agent_id.clone());
            }
        }
        errored.sort();
        stale.sort();

        if errored.is_empty() && stale.is_empty() {
            return HealthReport {
                healthy: true,
                message: format!("{} agent(s) healthy", states.len()),
                unhealthy_agents: Vec::new(),
            };
        }

        let mut parts = Vec::new();
        if !errored.is_empty() {
            parts.push(format!("in error: {}", errored.join(", ")));
        }
        if !stale.is_empty() {
            parts.push(format!("unresponsive: {}", stale.join(", ")));
        }
        let mut unhealthy_agents = errored;
        unhealthy_agents.extend(stale);
        HealthReport {
            healthy: false,
            message: parts.join("; "),
            unhealthy_agents,
        }
    }

    /// Hold the table's write lock, stalling every reader until dropped.
    #[cfg(test)]
    pub(crate) async fn lock_table(
        &self,
    ) -> tokio::sync::RwLockWriteGuard<'_, HashMap<AgentId, AgentState>> {
        self.states.write().await
    }
}

impl Default for AgentStateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_progress(progress: f64) -> CadenceResult<()> {
    if !progress.is_finite() || !(0.0..=1.0).contains(&progress) {
        return Err(CadenceError::Validation(format!(
            "progress must be within [0, 1], got {progress}"
        )));
    }
    Ok(())
}

fn set_status(state: &mut AgentState, status: AgentStatus, now: chrono::DateTime<chrono::Utc>) {
    if state.status != status {
        state.status = status;
        state.status_since = now;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::AgentRole;
    use cadence_core::ManualClock;
    use chrono::Utc;
    use uuid::Uuid;

    fn dev(id: &str) -> AgentRegistration {
        AgentRegistration::new(id, AgentRole::Developer)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let manager = AgentStateManager::new();
        manager.add_agent(dev("developer-1")).await.unwrap();
        let state = manager.get_state("developer-1").await.unwrap();
        assert_eq!(state.status, AgentStatus::Idle);
        assert_eq!(state.progress, 0.0);
        assert!(state.current_task.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_agent_rejected() {
        let manager = AgentStateManager::new();
        manager.add_agent(dev("developer-1")).await.unwrap();
        let err = manager.add_agent(dev("developer-1")).await.unwrap_err();
        assert!(matches!(err, CadenceError::DuplicateAgent(id) if id == "developer-1"));
        assert_eq!(manager.agent_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_update_leaves_table_unchanged() {
        let manager = AgentStateManager::new();
        manager.add_agent(dev("developer-1")).await.unwrap();
        let before = manager.snapshot().await;
        let version = manager.version();

        let err = manager
            .update_agent_progress("ghost", 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(_)));
        assert!(manager
            .update_agent_status("ghost", AgentStatus::Working)
            .await
            .is_err());

        let after = manager.snapshot().await;
        assert_eq!(after.len(), before.len());
        assert_eq!(after[0].last_update, before[0].last_update);
        assert_eq!(manager.version(), version);
    }

    #[tokio::test]
    async fn test_progress_out_of_range() {
        let manager = AgentStateManager::new();
        manager.add_agent(dev("developer-1")).await.unwrap();
        assert!(matches!(
            manager.update_agent_progress("developer-1", 1.2).await,
            Err(CadenceError::Validation(_))
        ));
        assert!(manager
            .update_agent_progress("developer-1", f64::NAN)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_report_batch_is_all_or_nothing() {
        let manager = AgentStateManager::new();
        manager.add_agent(dev("developer-1")).await.unwrap();
        manager.add_agent(dev("developer-2")).await.unwrap();
        let version = manager.version();

        let err = manager
            .apply_reports(&[
                ("developer-1", 0.5, AgentStatus::Working),
                ("ghost", 0.5, AgentStatus::Working),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(_)));
        assert!(manager
            .apply_reports(&[
                ("developer-1", 0.5, AgentStatus::Working),
                ("developer-2", 1.5, AgentStatus::Working),
            ])
            .await
            .is_err());
        assert_eq!(manager.get_state("developer-1").await.unwrap().progress, 0.0);
        assert_eq!(manager.version(), version);

        manager
            .apply_reports(&[
                ("developer-1", 0.5, AgentStatus::Working),
                ("developer-2", 0.2, AgentStatus::Blocked),
            ])
            .await
            .unwrap();
        let second = manager.get_state("developer-2").await.unwrap();
        assert_eq!(second.progress, 0.2);
        assert_eq!(second.status, AgentStatus::Blocked);
        assert_eq!(manager.version(), version + 1);
    }

    #[tokio::test]
    async fn test_assign_and_finish_task() {
        let manager = AgentStateManager::new();
        manager.add_agent(dev("developer-1")).await.unwrap();
        let task_id = Uuid::new_v4();

        manager.assign_task("developer-1", task_id).await.unwrap();
        let state = manager.get_state("developer-1").await.unwrap();
        assert_eq!(state.status, AgentStatus::Working);
        assert_eq!(state.current_task, Some(task_id));

        manager.finish_task("developer-1").await.unwrap();
        let state = manager.get_state("developer-1").await.unwrap();
        assert_eq!(state.status, AgentStatus::Idle);
        assert!(state.current_task.is_none());
    }

    #[tokio::test]
    async fn test_status_since_only_moves_on_change() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = AgentStateManager::with_clock(clock.clone());
        manager.add_agent(dev("developer-1")).await.unwrap();

        manager
            .update_agent_status("developer-1", AgentStatus::Blocked)
            .await
            .unwrap();
        let blocked_at = manager.get_state("developer-1").await.unwrap().status_since;

        clock.advance(chrono::Duration::minutes(3));
        manager
            .report("developer-1", 0.4, AgentStatus::Blocked)
            .await
            .unwrap();
        let state = manager.get_state("developer-1").await.unwrap();
        assert_eq!(state.status_since, blocked_at);
        assert_eq!(state.last_update, blocked_at + chrono::Duration::minutes(3));
    }

    #[tokio::test]
    async fn test_concurrent_reports_not_lost() {
        let manager = Arc::new(AgentStateManager::new());
        let ids: Vec<String> = (1..=8).map(|i| format!("developer-{i}")).collect();

        let mut handles = Vec::new();
        for id in &ids {
            let manager = manager.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                manager.add_agent(dev(&id)).await.unwrap();
                for step in 1..=10 {
                    manager
                        .update_agent_progress(&id, f64::from(step) / 10.0)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let states = manager.snapshot().await;
        assert_eq!(states.len(), 8);
        assert!(states.iter().all(|s| s.progress == 1.0));
        // 8 registrations + 80 progress updates
        assert_eq!(manager.version(), 88);
    }

    #[tokio::test]
    async fn test_health_check() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = AgentStateManager::with_clock(clock.clone())
            .with_stale_after(chrono::Duration::minutes(5));
        manager.add_agent(dev("developer-1")).await.unwrap();
        manager.add_agent(dev("developer-2")).await.unwrap();
        assert!(manager.health_check().await.healthy);

        manager
            .update_agent_status("developer-1", AgentStatus::Error)
            .await
            .unwrap();
        // In error, but not yet for long enough.
        clock.advance(chrono::Duration::minutes(2));
        manager.heartbeat("developer-2").await.unwrap();
        assert!(manager.health_check().await.healthy);

        clock.advance(chrono::Duration::minutes(4));
        manager.heartbeat("developer-2").await.unwrap();
        let report = manager.health_check().await;
        assert!(!report.healthy);
        assert_eq!(report.unhealthy_agents, vec!["developer-1".to_string()]);
        assert!(report.message.contains("in error"));
    }

    #[tokio::test]
    async fn test_stale_agent_unhealthy() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = AgentStateManager::with_clock(clock.clone())
            .with_stale_after(chrono::Duration::minutes(5));
        manager.add_agent(dev("developer-1")).await.unwrap();
        clock.advance(chrono::Duration::minutes(10));
        let report = manager.health_check().await;
        assert!(!report.healthy);
        assert!(report.message.contains("unresponsive: developer-1"));
    }
}
