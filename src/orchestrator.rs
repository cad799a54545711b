//! Worker pool owner.
//!
//! Spawns and scales agent loops, owns the shared services (budget tracker,
//! worktree manager, queue client, templates), wires the budget trip to a
//! pool-wide pause, and runs the periodic worktree sweep. Scale-down removes
//! the youngest agents first (highest ids); a stopping agent gets a grace
//! period to drain and is dropped from the map either way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent_lifecycle::AgentState;
use crate::agents::{AgentDeps, AgentHandle, AgentLoop, AgentLoopError, AgentLoopSettings};
use crate::budget::{BudgetStatus, BudgetTracker};
use crate::config::OrchestratorConfig;
use crate::events::{EventSink, NullEventSink};
use crate::external::GitCli;
use crate::github::{GraphQlClient, RetryConfig};
use crate::llm::SessionDriver;
use crate::queue::{GitHubWorkQueue, WorkQueue};
use crate::template::TemplateEngine;
use crate::worktree::{WorktreeManager, WorktreeProvider};

struct AgentSlot {
    handle: AgentHandle,
    join: JoinHandle<Result<(), AgentLoopError>>,
}

#[derive(Default)]
struct Pool {
    agents: HashMap<u32, AgentSlot>,
    next_id: u32,
    desired_instances: usize,
}

/// Status snapshot for the dashboard.
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub agents: Vec<(u32, AgentState)>,
    pub budget_status: BudgetStatus,
    pub active_worktrees: usize,
    pub desired_instances: usize,
}

/// Owns the pool and all shared services.
pub struct Orchestrator {
    config: OrchestratorConfig,
    deps: AgentDeps,
    pool: Arc<Mutex<Pool>>,
    started: AtomicBool,
    budget_trip_registered: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl Orchestrator {
    /// Production constructor: builds the GitHub-backed queue and the real
    /// worktree manager from the configuration.
    pub fn new(
        config: OrchestratorConfig,
        driver: Arc<dyn SessionDriver>,
        events: Arc<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        let client = Arc::new(GraphQlClient::with_endpoint(
            config.host_token.clone(),
            "https://api.github.com/graphql".to_string(),
            RetryConfig::default(),
        )?);
        let claim_field_id = config
            .claim_field_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("claim_field_id is required for the GitHub queue"))?;
        let queue: Arc<dyn WorkQueue> = Arc::new(GitHubWorkQueue::new(
            client,
            config.project_id.clone(),
            claim_field_id,
        ));

        let git = GitCli::default();
        let worktrees: Arc<dyn WorktreeProvider> = Arc::new(WorktreeManager::new(
            config.workspace_root.clone(),
            git.clone(),
        )?);

        Ok(Self::with_components(config, queue, worktrees, driver, events, git))
    }

    /// Fully-injected constructor; tests swap any collaborator.
    pub fn with_components(
        config: OrchestratorConfig,
        queue: Arc<dyn WorkQueue>,
        worktrees: Arc<dyn WorktreeProvider>,
        driver: Arc<dyn SessionDriver>,
        events: Arc<dyn EventSink>,
        git: GitCli,
    ) -> Self {
        let budget = Arc::new(BudgetTracker::new(
            config.daily_budget_usd,
            config.monthly_budget_usd,
            config.sessions_dir(),
        ));
        let templates = Arc::new(TemplateEngine::new(config.category_prompts_dir.clone()));

        let deps = AgentDeps {
            queue,
            budget,
            worktrees,
            driver,
            templates,
            events,
            git,
        };

        Self {
            config,
            deps,
            pool: Arc::new(Mutex::new(Pool::default())),
            started: AtomicBool::new(false),
            budget_trip_registered: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }
    }

    /// Convenience for callers without an observer.
    pub fn detached_events() -> Arc<dyn EventSink> {
        Arc::new(NullEventSink)
    }

    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.deps.budget
    }

    /// Bring the pool up. Idempotent; a second call is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            info!("orchestrator already started");
            return;
        }

        info!(desired = self.config.desired_instances, "orchestrator starting");
        self.deps.budget.load_from_file().await;

        match self.deps.worktrees.cleanup_orphaned_worktrees().await {
            Ok(removed) if removed > 0 => info!(removed, "removed orphaned worktrees"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "orphan cleanup failed"),
        }

        if !self.budget_trip_registered.swap(true, Ordering::SeqCst) {
            let pool = Arc::clone(&self.pool);
            self.deps.budget.on_budget_exceeded(move |status| {
                warn!(
                    daily_spend = %status.daily_spend,
                    monthly_spend = %status.monthly_spend,
                    "budget exceeded, pausing all agents"
                );
                // Non-blocking: pause only flips flags and cancels tokens.
                let handles: Vec<AgentHandle> = pool
                    .lock()
                    .expect("pool lock poisoned")
                    .agents
                    .values()
                    .map(|slot| slot.handle.clone())
                    .collect();
                for handle in handles {
                    handle.pause();
                }
            });
        }

        {
            let mut pool = self.pool.lock().expect("pool lock poisoned");
            pool.desired_instances = self.config.desired_instances;
            for _ in 0..self.config.desired_instances {
                Self::spawn_agent(&mut pool, &self.config, &self.deps);
            }
        }

        self.start_sweeper();
    }

    fn spawn_agent(pool: &mut Pool, config: &OrchestratorConfig, deps: &AgentDeps) -> u32 {
        pool.next_id += 1;
        let id = pool.next_id;

        let agent = AgentLoop::new(id, deps.clone(), AgentLoopSettings::from(config));
        let handle = agent.handle();
        let join = tokio::spawn(agent.run());

        pool.agents.insert(id, AgentSlot { handle, join });
        info!(agent_id = %id, "spawned agent");
        id
    }

    fn start_sweeper(&self) {
        let pool = Arc::clone(&self.pool);
        let worktrees = Arc::clone(&self.deps.worktrees);
        let events = Arc::clone(&self.deps.events);
        let interval = self.config.worktree_sweep_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick is immediate; skip it
            loop {
                ticker.tick().await;
                reap_finished(&pool, events.as_ref()).await;
                sweep_inactive_worktrees(&pool, worktrees.as_ref()).await;
            }
        });

        *self.sweeper.lock().expect("sweeper lock poisoned") = Some(task);
    }

    /// Resize the pool. Negative values are ignored. Scale-down stops the
    /// highest ids first.
    pub async fn set_desired_instances(&self, desired: i64) {
        if desired < 0 {
            warn!(desired, "ignoring negative desired instance count");
            return;
        }
        let desired = desired as usize;

        let (to_stop, spawned) = {
            let mut pool = self.pool.lock().expect("pool lock poisoned");
            pool.desired_instances = desired;
            let current = pool.agents.len();

            if desired > current {
                let mut ids = Vec::new();
                for _ in current..desired {
                    ids.push(Self::spawn_agent(&mut pool, &self.config, &self.deps));
                }
                (Vec::new(), ids)
            } else {
                let mut ids: Vec<u32> = pool.agents.keys().copied().collect();
                ids.sort_unstable_by(|a, b| b.cmp(a));
                let victims: Vec<u32> = ids.into_iter().take(current - desired).collect();
                let slots = victims
                    .into_iter()
                    .filter_map(|id| pool.agents.remove(&id).map(|slot| (id, slot)))
                    .collect();
                (slots, Vec::new())
            }
        };

        if !spawned.is_empty() {
            info!(count = spawned.len(), "scaled up");
        }
        for (id, slot) in to_stop {
            info!(agent_id = %id, "scaling down agent");
            self.stop_slot(id, slot).await;
        }
    }

    async fn stop_slot(&self, id: u32, slot: AgentSlot) {
        slot.handle.stop();
        match tokio::time::timeout(self.config.stop_grace(), slot.join).await {
            Ok(Ok(Ok(()))) => info!(agent_id = %id, "agent drained"),
            Ok(Ok(Err(e))) => warn!(agent_id = %id, error = %e, "agent exited with error"),
            Ok(Err(e)) => warn!(agent_id = %id, error = %e, "agent task panicked"),
            Err(_) => warn!(agent_id = %id, "agent did not drain within grace period"),
        }
    }

    pub fn pause_all(&self) {
        info!("pausing all agents");
        for handle in self.handles() {
            handle.pause();
        }
    }

    pub fn resume_all(&self) {
        info!("resuming all agents");
        for handle in self.handles() {
            handle.resume();
        }
    }

    pub fn pause_agent(&self, id: u32) {
        match self.handle_of(id) {
            Some(handle) => handle.pause(),
            None => warn!(agent_id = %id, "pause requested for unknown agent"),
        }
    }

    pub fn resume_agent(&self, id: u32) {
        match self.handle_of(id) {
            Some(handle) => handle.resume(),
            None => warn!(agent_id = %id, "resume requested for unknown agent"),
        }
    }

    /// Graceful shutdown: stop every loop, racing each drain against the
    /// grace period, then persist the budget.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator stopping");

        self.abort_sweeper();

        let slots: Vec<(u32, AgentSlot)> = {
            let mut pool = self.pool.lock().expect("pool lock poisoned");
            pool.agents.drain().collect()
        };

        for (_, slot) in &slots {
            slot.handle.stop();
        }
        let grace = self.config.stop_grace();
        join_all(slots.into_iter().map(|(id, slot)| async move {
            match tokio::time::timeout(grace, slot.join).await {
                Ok(Ok(Ok(()))) => info!(agent_id = %id, "agent drained"),
                Ok(Ok(Err(e))) => warn!(agent_id = %id, error = %e, "agent exited with error"),
                Ok(Err(e)) => warn!(agent_id = %id, error = %e, "agent task panicked"),
                Err(_) => warn!(agent_id = %id, "agent did not drain within grace period"),
            }
        }))
        .await;

        if let Err(e) = self.deps.budget.persist_to_file().await {
            warn!(error = %e, "budget persist on stop failed");
        }
        info!("orchestrator stopped");
    }

    /// Immediate shutdown: abort loop tasks without waiting for drain.
    pub async fn emergency_stop(&self) {
        warn!("emergency stop");
        self.started.store(false, Ordering::SeqCst);
        self.abort_sweeper();

        let slots: Vec<(u32, AgentSlot)> = {
            let mut pool = self.pool.lock().expect("pool lock poisoned");
            pool.agents.drain().collect()
        };
        for (id, slot) in slots {
            slot.handle.stop();
            slot.join.abort();
            info!(agent_id = %id, "agent aborted");
        }

        if let Err(e) = self.deps.budget.persist_to_file().await {
            warn!(error = %e, "budget persist on emergency stop failed");
        }
    }

    fn abort_sweeper(&self) {
        if let Some(task) = self.sweeper.lock().expect("sweeper lock poisoned").take() {
            task.abort();
        }
    }

    /// Reap agents whose loop task finished on its own (crash or drain).
    /// Crashed agents are not respawned; the operator scales the pool to
    /// replace them. Also runs on every sweep tick.
    pub async fn reap_finished_agents(&self) {
        reap_finished(&self.pool, self.deps.events.as_ref()).await;
    }

    pub fn get_status(&self) -> OrchestratorStatus {
        let pool = self.pool.lock().expect("pool lock poisoned");
        let mut agents: Vec<(u32, AgentState)> = pool
            .agents
            .iter()
            .map(|(id, slot)| (*id, slot.handle.state()))
            .collect();
        agents.sort_unstable_by_key(|(id, _)| *id);

        let active_worktrees = agents
            .iter()
            .filter(|(_, state)| matches!(state, AgentState::Working | AgentState::Reviewing))
            .count();

        OrchestratorStatus {
            agents,
            budget_status: self.deps.budget.get_budget_status(),
            active_worktrees,
            desired_instances: pool.desired_instances,
        }
    }

    fn handles(&self) -> Vec<AgentHandle> {
        self.pool
            .lock()
            .expect("pool lock poisoned")
            .agents
            .values()
            .map(|slot| slot.handle.clone())
            .collect()
    }

    fn handle_of(&self, id: u32) -> Option<AgentHandle> {
        self.pool
            .lock()
            .expect("pool lock poisoned")
            .agents
            .get(&id)
            .map(|slot| slot.handle.clone())
    }
}

/// Drop finished loop tasks from the map, surfacing crashes through the
/// error callback.
async fn reap_finished(pool: &Arc<Mutex<Pool>>, events: &dyn EventSink) {
    let finished: Vec<(u32, AgentSlot)> = {
        let mut pool = pool.lock().expect("pool lock poisoned");
        let ids: Vec<u32> = pool
            .agents
            .iter()
            .filter(|(_, slot)| slot.join.is_finished())
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| pool.agents.remove(&id).map(|slot| (id, slot)))
            .collect()
    };

    for (id, slot) in finished {
        match slot.join.await {
            Ok(Ok(())) => info!(agent_id = %id, "agent loop finished"),
            Ok(Err(e)) => {
                error!(agent_id = %id, error = %e, "agent loop crashed");
                events.on_error(id, &e.to_string());
            }
            Err(e) => {
                error!(agent_id = %id, error = %e, "agent task panicked");
                events.on_error(id, &e.to_string());
            }
        }
    }
}

/// Remove worktree directories not owned by a currently busy agent.
///
/// The remove-everything cleanup is reserved for `start()` when the pool is
/// empty; mid-flight, sweeping a Working/Reviewing agent's directory would
/// destroy a live checkout.
async fn sweep_inactive_worktrees(pool: &Arc<Mutex<Pool>>, worktrees: &dyn WorktreeProvider) {
    let busy: Vec<u32> = {
        let pool = pool.lock().expect("pool lock poisoned");
        pool.agents
            .iter()
            .filter(|(_, slot)| {
                matches!(
                    slot.handle.state(),
                    AgentState::Working | AgentState::Reviewing
                )
            })
            .map(|(id, _)| *id)
            .collect()
    };

    let listed = match worktrees.list_active_worktrees().await {
        Ok(listed) => listed,
        Err(e) => {
            warn!(error = %e, "worktree sweep listing failed");
            return;
        }
    };

    for info in listed {
        if busy.contains(&info.agent_id) {
            continue;
        }
        match worktrees.remove_worktree(&info.path).await {
            Ok(()) => info!(path = %info.path.display(), "swept stale worktree"),
            Err(e) => warn!(path = %info.path.display(), error = %e, "worktree sweep failed"),
        }
    }
}
