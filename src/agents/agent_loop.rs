//! Drives a single worker through its lifecycle.
//!
//! The loop owns its state machine, its current work item, and the cancel
//! handle for any in-flight LLM call. Control operations (`pause`, `resume`,
//! `stop`) arrive through a cloneable [`AgentHandle`] and are non-blocking:
//! they cancel in-flight work and set flags; the loop applies the state
//! transition at its next dispatch point. In-flight work that was not
//! cancelled always completes its lifecycle path before a pause lands.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent_lifecycle::{AgentEvent, AgentState, AgentStateMachine};
use crate::agents::executor::ExecutionAgent;
use crate::agents::ideation::{IdeationAgent, ParsedIdea};
use crate::agents::reviewer::ReviewAgent;
use crate::budget::BudgetTracker;
use crate::config::OrchestratorConfig;
use crate::events::EventSink;
use crate::external::GitCli;
use crate::llm::SessionDriver;
use crate::queue::{WorkItem, WorkQueue};
use crate::sessions::{AgentSessionSnapshot, SessionHooks};
use crate::template::{self, TemplateEngine, TemplateError};
use crate::worktree::{WorktreeInfo, WorktreeProvider};

const MAX_REVIEW_RETRIES: u32 = 2;

/// Shared services injected into every loop.
#[derive(Clone)]
pub struct AgentDeps {
    pub queue: Arc<dyn WorkQueue>,
    pub budget: Arc<BudgetTracker>,
    pub worktrees: Arc<dyn WorktreeProvider>,
    pub driver: Arc<dyn SessionDriver>,
    pub templates: Arc<TemplateEngine>,
    pub events: Arc<dyn EventSink>,
    pub git: GitCli,
}

/// Per-loop knobs derived from the orchestrator configuration.
#[derive(Debug, Clone)]
pub struct AgentLoopSettings {
    pub owner: String,
    pub repo: String,
    pub project_id: String,
    pub enabled_categories: Vec<String>,
    pub workspace_root: PathBuf,
    pub idle_poll: Duration,
    pub cooldown: Duration,
    pub max_budget_per_task_usd: f64,
    pub max_budget_per_review_usd: f64,
    pub max_budget_per_ideation_usd: f64,
    pub max_turns_per_task: u32,
}

impl From<&OrchestratorConfig> for AgentLoopSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            project_id: config.project_id.clone(),
            enabled_categories: config.enabled_categories.clone(),
            workspace_root: config.workspace_root.clone(),
            idle_poll: config.idle_poll(),
            cooldown: config.cooldown(),
            max_budget_per_task_usd: config.max_budget_per_task_usd,
            max_budget_per_review_usd: config.max_budget_per_review_usd,
            max_budget_per_ideation_usd: config.max_budget_per_ideation_usd,
            max_turns_per_task: config.max_turns_per_task,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentLoopError {
    #[error("agent {id} internal state corrupted: {reason}")]
    Internal { id: u32, reason: String },
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, Default)]
struct Runtime {
    item: Option<WorkItem>,
    worktree: Option<WorktreeInfo>,
    pending_idea: Option<ParsedIdea>,
    retry_count: u32,
    tasks_completed: u64,
    error_count: u64,
    last_error: Option<String>,
    last_heartbeat: Option<chrono::DateTime<Utc>>,
}

/// State shared between the loop task and its control handle.
struct Shared {
    id: u32,
    fsm: Mutex<AgentStateMachine>,
    runtime: Mutex<Runtime>,
    pause_requested: watch::Sender<bool>,
    stop: CancellationToken,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl Shared {
    fn state(&self) -> AgentState {
        self.fsm.lock().expect("fsm lock poisoned").state()
    }

    fn cancel_in_flight(&self) {
        if let Some(token) = self
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .as_ref()
        {
            token.cancel();
        }
    }

    fn request_pause(&self) {
        self.cancel_in_flight();
        let _ = self.pause_requested.send(true);
    }

    fn snapshot(&self) -> AgentSessionSnapshot {
        let state = self.state();
        let runtime = self.runtime.lock().expect("runtime lock poisoned");
        AgentSessionSnapshot {
            agent_id: format!("agent-{}", self.id),
            status: state.into(),
            current_project_number: runtime.item.as_ref().map(|i| i.project_number),
            current_phase: runtime.item.as_ref().and_then(|i| {
                i.labels
                    .iter()
                    .find_map(|l| l.strip_prefix("phase:").map(str::to_string))
            }),
            branch_name: runtime.worktree.as_ref().map(|w| w.branch.clone()),
            last_heartbeat: runtime.last_heartbeat.unwrap_or_else(Utc::now),
            tasks_completed: runtime.tasks_completed,
            current_task_description: runtime.item.as_ref().map(|i| i.issue_title.clone()),
            error_count: runtime.error_count,
            last_error: runtime.last_error.clone(),
        }
    }
}

/// Cloneable control surface for one agent loop.
#[derive(Clone)]
pub struct AgentHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl AgentHandle {
    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn state(&self) -> AgentState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> AgentSessionSnapshot {
        self.shared.snapshot()
    }

    /// Abort any in-flight LLM call and request a pause. The loop applies
    /// the Paused transition at its next dispatch point.
    pub fn pause(&self) {
        info!(agent_id = %self.shared.id, "pause requested");
        self.shared.request_pause();
    }

    /// Release the pause barrier; the loop transitions back to Idle.
    pub fn resume(&self) {
        info!(agent_id = %self.shared.id, "resume requested");
        let _ = self.shared.pause_requested.send(false);
    }

    /// Abort in-flight work, release all barriers, and let the loop drain to
    /// Stopped. The owner awaits loop exit through its join handle.
    pub fn stop(&self) {
        info!(agent_id = %self.shared.id, "stop requested");
        self.shared.stop.cancel();
        self.shared.cancel_in_flight();
    }
}

/// One worker. Constructed by the orchestrator and consumed by `run`.
pub struct AgentLoop {
    shared: Arc<Shared>,
    deps: AgentDeps,
    settings: AgentLoopSettings,
    executor: ExecutionAgent,
    reviewer: ReviewAgent,
    ideation: IdeationAgent,
    hooks: SessionHooks,
    pause_rx: watch::Receiver<bool>,
}

impl AgentLoop {
    pub fn new(id: u32, deps: AgentDeps, settings: AgentLoopSettings) -> Self {
        let (pause_tx, pause_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            id,
            fsm: Mutex::new(AgentStateMachine::new(id)),
            runtime: Mutex::new(Runtime::default()),
            pause_requested: pause_tx,
            stop: CancellationToken::new(),
            in_flight: Mutex::new(None),
        });

        // The dashboard sees every FSM transition through the sink.
        {
            let events = Arc::clone(&deps.events);
            let mut fsm = shared.fsm.lock().expect("fsm lock poisoned");
            fsm.add_observer(move |from, to| events.on_status_change(id, from, to));
        }

        let hooks = SessionHooks::new(
            id,
            settings.workspace_root.join(".claude-sessions"),
            {
                // Hooks read agent state through this closure only. Each
                // firing advances the shared heartbeat.
                let shared = Arc::clone(&shared);
                Arc::new(move || {
                    shared
                        .runtime
                        .lock()
                        .expect("runtime lock poisoned")
                        .last_heartbeat = Some(Utc::now());
                    shared.snapshot()
                })
            },
            Arc::clone(&deps.events),
        );

        let executor = ExecutionAgent::new(
            Arc::clone(&deps.driver),
            settings.max_budget_per_task_usd,
            settings.max_turns_per_task,
        );
        let reviewer = ReviewAgent::new(
            Arc::clone(&deps.driver),
            deps.git.clone(),
            settings.max_budget_per_review_usd,
        );
        let ideation = IdeationAgent::new(
            Arc::clone(&deps.driver),
            settings.max_budget_per_ideation_usd,
        );

        Self {
            shared,
            deps,
            settings,
            executor,
            reviewer,
            ideation,
            hooks,
            pause_rx,
        }
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn agent_label(&self) -> String {
        format!("agent-{}", self.shared.id)
    }

    /// Apply an event, dropping it when a control operation already moved the
    /// machine elsewhere.
    fn fire(&self, event: AgentEvent) {
        let mut fsm = self.shared.fsm.lock().expect("fsm lock poisoned");
        if let Err(e) = fsm.transition(event) {
            warn!(agent_id = %self.shared.id, error = %e, "event dropped");
        }
    }

    fn set_last_error(&self, message: String) {
        let mut runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
        runtime.last_error = Some(message);
    }

    fn take_in_flight_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.shared.in_flight.lock().expect("in-flight lock poisoned") = Some(token.clone());
        token
    }

    fn clear_in_flight(&self) {
        *self.shared.in_flight.lock().expect("in-flight lock poisoned") = None;
    }

    /// Main dispatch loop. Exits when the machine reaches Stopped.
    pub async fn run(mut self) -> Result<(), AgentLoopError> {
        info!(agent_id = %self.shared.id, "agent loop starting");

        loop {
            // Control flags are applied between handler steps so an atomic
            // step never sees the state change under it.
            if self.shared.stop.is_cancelled() {
                let mut fsm = self.shared.fsm.lock().expect("fsm lock poisoned");
                if fsm.can_transition(AgentEvent::Stop) {
                    let _ = fsm.transition(AgentEvent::Stop);
                }
            } else if *self.pause_rx.borrow() {
                let mut fsm = self.shared.fsm.lock().expect("fsm lock poisoned");
                if fsm.state() != AgentState::Paused && fsm.can_transition(AgentEvent::Pause) {
                    let _ = fsm.transition(AgentEvent::Pause);
                }
            }

            let state = self.shared.state();
            let step = match state {
                AgentState::Stopped => break,
                AgentState::Idle => self.handle_idle().await,
                AgentState::Claiming => self.handle_claiming().await,
                AgentState::Working => self.handle_working().await,
                AgentState::Reviewing => self.handle_reviewing().await,
                AgentState::Ideating => self.handle_ideating().await,
                AgentState::CreatingProject => self.handle_creating_project().await,
                AgentState::Error => self.handle_error().await,
                AgentState::Cooldown => self.handle_cooldown().await,
                AgentState::Paused => self.handle_paused().await,
            };

            if let Err(e) = step {
                self.recover_from_step_error(state, e);
            }
        }

        info!(agent_id = %self.shared.id, "agent loop exited");
        Ok(())
    }

    /// Map a bubbled handler error to the nearest error event valid from the
    /// state the step started in; reset as a last resort. The loop never
    /// dies from a step failure.
    fn recover_from_step_error(&self, state: AgentState, e: StepError) {
        error!(agent_id = %self.shared.id, state = %state, error = %e, "state handler failed");
        self.set_last_error(e.to_string());

        let event = match state {
            AgentState::Claiming => Some(AgentEvent::ClaimFailed),
            AgentState::Working => Some(AgentEvent::ExecutionError),
            AgentState::Reviewing => Some(AgentEvent::ReviewError),
            AgentState::Ideating => Some(AgentEvent::IdeationError),
            AgentState::CreatingProject => Some(AgentEvent::CreationError),
            _ => None,
        };

        let mut fsm = self.shared.fsm.lock().expect("fsm lock poisoned");
        match event {
            Some(event) if fsm.can_transition(event) => {
                let _ = fsm.transition(event);
            }
            _ => {
                warn!(agent_id = %self.shared.id, state = %state, "no error event available, resetting");
                fsm.reset();
            }
        }
    }

    async fn handle_idle(&mut self) -> Result<(), StepError> {
        // Idle owns no work; drop whatever an error or cancelled step left
        // behind. The directory itself is the sweeper's problem.
        {
            let mut runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
            if runtime.item.is_some() {
                runtime.item = None;
                runtime.worktree = None;
                runtime.retry_count = 0;
            }
        }

        if !self.deps.budget.is_within_budget() {
            info!(agent_id = %self.shared.id, "budget exhausted, pausing");
            self.shared.request_pause();
            return Ok(());
        }

        match self.deps.queue.find_next_work_item(self.shared.id).await {
            Ok(Some(item)) => {
                debug!(agent_id = %self.shared.id, issue = %item.issue_number, "found work");
                {
                    let mut runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
                    runtime.item = Some(item);
                    runtime.worktree = None;
                    runtime.retry_count = 0;
                }
                self.fire(AgentEvent::QueueHasWork);
            }
            Ok(None) if !self.settings.enabled_categories.is_empty() => {
                self.fire(AgentEvent::QueueEmptyIdeate);
            }
            Ok(None) => self.idle_wait().await,
            Err(e) => {
                // Queue polling errors are soft; back off for one interval.
                warn!(agent_id = %self.shared.id, error = %e, "queue poll failed");
                self.idle_wait().await;
            }
        }
        Ok(())
    }

    async fn idle_wait(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.idle_poll) => {}
            _ = self.shared.stop.cancelled() => {}
            _ = self.pause_rx.changed() => {}
        }
    }

    async fn handle_claiming(&mut self) -> Result<(), StepError> {
        let Some(item) = self
            .shared
            .runtime
            .lock()
            .expect("runtime lock poisoned")
            .item
            .clone()
        else {
            warn!(agent_id = %self.shared.id, "claiming without an item");
            self.fire(AgentEvent::ClaimFailed);
            return Ok(());
        };

        let claimed = self
            .deps
            .queue
            .claim_issue(&self.settings.project_id, &item.item_id, self.shared.id)
            .await;
        if !claimed {
            debug!(agent_id = %self.shared.id, issue = %item.issue_number, "claim lost");
            self.release_current_item();
            self.fire(AgentEvent::ClaimFailed);
            return Ok(());
        }

        match self
            .deps
            .worktrees
            .create_worktree(self.shared.id, item.issue_number)
            .await
        {
            Ok(worktree) => {
                self.shared
                    .runtime
                    .lock()
                    .expect("runtime lock poisoned")
                    .worktree = Some(worktree);
                self.fire(AgentEvent::ClaimSuccess);
            }
            Err(e) => {
                warn!(agent_id = %self.shared.id, issue = %item.issue_number, error = %e, "worktree creation failed");
                self.set_last_error(e.to_string());
                self.release_current_item();
                self.fire(AgentEvent::ClaimFailed);
            }
        }
        Ok(())
    }

    async fn handle_working(&mut self) -> Result<(), StepError> {
        let (item, worktree) = {
            let runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
            match (runtime.item.clone(), runtime.worktree.clone()) {
                (Some(item), Some(worktree)) => (item, worktree),
                _ => {
                    drop(runtime);
                    warn!(agent_id = %self.shared.id, "working without item or worktree");
                    self.fire(AgentEvent::ExecutionError);
                    return Ok(());
                }
            }
        };

        let cancel = self.take_in_flight_token();
        let outcome = self
            .executor
            .execute(&item, &worktree.path, &self.hooks, cancel.clone())
            .await;
        self.clear_in_flight();

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.set_last_error(e.to_string());
                self.fire(AgentEvent::ExecutionError);
                return Ok(());
            }
        };

        // Partial cost survives aborts; record before branching.
        if result.cost_usd > 0.0 {
            self.deps
                .budget
                .record_cost(&self.agent_label(), result.cost_usd, item.project_number);
            self.deps
                .events
                .on_cost_update(self.shared.id, result.cost_usd);
        }

        if cancel.is_cancelled() {
            // Clean early exit; the pause/stop transition lands at the next
            // dispatch point.
            debug!(agent_id = %self.shared.id, "execution cancelled");
            return Ok(());
        }

        if !result.success {
            self.set_last_error(
                result
                    .error
                    .unwrap_or_else(|| "execution failed".to_string()),
            );
            self.fire(AgentEvent::ExecutionError);
            return Ok(());
        }

        info!(
            agent_id = %self.shared.id,
            issue = %item.issue_number,
            cost_usd = %result.cost_usd,
            turns = %result.turns_used,
            files = result.files_touched.len(),
            "execution complete"
        );

        let message = format!("Implement #{}: {}", item.issue_number, item.issue_title);
        match self
            .deps
            .worktrees
            .commit_and_push(&worktree.path, &message)
            .await
        {
            Ok(()) => self.fire(AgentEvent::ExecutionComplete),
            Err(e) => {
                warn!(agent_id = %self.shared.id, error = %e, "commit and push failed");
                self.set_last_error(e.to_string());
                self.fire(AgentEvent::ExecutionError);
            }
        }
        Ok(())
    }

    async fn handle_reviewing(&mut self) -> Result<(), StepError> {
        let (item, worktree) = {
            let runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
            match (runtime.item.clone(), runtime.worktree.clone()) {
                (Some(item), Some(worktree)) => (item, worktree),
                _ => {
                    drop(runtime);
                    warn!(agent_id = %self.shared.id, "reviewing without item or worktree");
                    self.fire(AgentEvent::ReviewError);
                    return Ok(());
                }
            }
        };

        let cancel = self.take_in_flight_token();
        let verdict = self
            .reviewer
            .review(&item, &worktree.path, cancel.clone())
            .await;
        self.clear_in_flight();

        if cancel.is_cancelled() {
            debug!(agent_id = %self.shared.id, "review cancelled");
            return Ok(());
        }

        match verdict {
            Ok(outcome) if outcome.approved => {
                info!(
                    agent_id = %self.shared.id,
                    issue = %item.issue_number,
                    summary = %outcome.summary,
                    "review approved"
                );
                self.finalize_approved(&worktree).await;
                self.fire(AgentEvent::ReviewApproved);
            }
            Ok(outcome) => {
                let retry_count = {
                    let runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
                    runtime.retry_count
                };
                if retry_count < MAX_REVIEW_RETRIES {
                    info!(
                        agent_id = %self.shared.id,
                        issue = %item.issue_number,
                        retry = retry_count + 1,
                        summary = %outcome.summary,
                        "review rejected, retrying"
                    );
                    self.shared
                        .runtime
                        .lock()
                        .expect("runtime lock poisoned")
                        .retry_count += 1;
                    self.fire(AgentEvent::ReviewRejected);
                } else {
                    warn!(
                        agent_id = %self.shared.id,
                        issue = %item.issue_number,
                        "review rejected at retry limit"
                    );
                    self.set_last_error(format!(
                        "review rejected after {MAX_REVIEW_RETRIES} retries: {}",
                        outcome.summary
                    ));
                    self.abandon_worktree(&worktree).await;
                    self.fire(AgentEvent::ReviewError);
                }
            }
            Err(e) => {
                warn!(agent_id = %self.shared.id, error = %e, "review failed");
                self.set_last_error(e.to_string());
                self.abandon_worktree(&worktree).await;
                self.fire(AgentEvent::ReviewError);
            }
        }
        Ok(())
    }

    async fn finalize_approved(&self, worktree: &WorktreeInfo) {
        if let Err(e) = self.deps.worktrees.remove_worktree(&worktree.path).await {
            warn!(agent_id = %self.shared.id, error = %e, "worktree removal failed");
        }
        let mut runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
        runtime.tasks_completed += 1;
        runtime.retry_count = 0;
        runtime.item = None;
        runtime.worktree = None;
    }

    async fn abandon_worktree(&self, worktree: &WorktreeInfo) {
        if let Err(e) = self.deps.worktrees.remove_worktree(&worktree.path).await {
            warn!(agent_id = %self.shared.id, error = %e, "worktree removal failed");
        }
        self.release_current_item();
    }

    fn release_current_item(&self) {
        let mut runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
        runtime.item = None;
        runtime.worktree = None;
        runtime.retry_count = 0;
    }

    async fn handle_ideating(&mut self) -> Result<(), StepError> {
        let category = {
            let categories = &self.settings.enabled_categories;
            if categories.is_empty() {
                // Should not happen; Idle only ideates with categories set.
                self.fire(AgentEvent::NoIdea);
                return Ok(());
            }
            let index = rand::rng().random_range(0..categories.len());
            categories[index].clone()
        };

        let context = template::build_context(
            &self.settings.workspace_root,
            &self.settings.owner,
            &self.settings.repo,
            self.deps.queue.as_ref(),
        )
        .await;
        let prompt = self
            .deps
            .templates
            .load_category_prompt(&category, &context)
            .await?;

        let existing_titles = match self
            .deps
            .queue
            .list_open_issue_titles(&self.settings.owner, &self.settings.repo)
            .await
        {
            Ok(titles) => titles,
            Err(e) => {
                warn!(agent_id = %self.shared.id, error = %e, "title listing failed, duplicate filter degraded");
                Vec::new()
            }
        };

        let cancel = self.take_in_flight_token();
        let outcome = self
            .ideation
            .ideate(
                &category,
                prompt,
                &existing_titles,
                self.settings.workspace_root.clone(),
                cancel.clone(),
            )
            .await;
        self.clear_in_flight();

        if cancel.is_cancelled() {
            debug!(agent_id = %self.shared.id, "ideation cancelled");
            return Ok(());
        }

        if outcome.no_idea_available {
            debug!(agent_id = %self.shared.id, category = %category, "no idea available");
            self.fire(AgentEvent::NoIdea);
        } else if let Some(idea) = outcome.idea {
            info!(agent_id = %self.shared.id, category = %category, title = %idea.title, "idea generated");
            self.shared
                .runtime
                .lock()
                .expect("runtime lock poisoned")
                .pending_idea = Some(idea);
            self.fire(AgentEvent::IdeaGenerated);
        } else {
            self.set_last_error(format!("ideation failed for category '{category}'"));
            self.fire(AgentEvent::IdeationError);
        }
        Ok(())
    }

    async fn handle_creating_project(&mut self) -> Result<(), StepError> {
        let Some(idea) = self
            .shared
            .runtime
            .lock()
            .expect("runtime lock poisoned")
            .pending_idea
            .take()
        else {
            warn!(agent_id = %self.shared.id, "creating project without a pending idea");
            self.fire(AgentEvent::CreationError);
            return Ok(());
        };

        let body = issue_body_from_idea(&idea, self.shared.id);
        let labels = vec![idea.category.clone()];
        match self
            .deps
            .queue
            .create_issue(
                &self.settings.owner,
                &self.settings.repo,
                &idea.title,
                &body,
                Some(labels),
            )
            .await
        {
            Ok(created) => {
                info!(
                    agent_id = %self.shared.id,
                    issue = %created.number,
                    title = %idea.title,
                    "filed new issue"
                );
                self.fire(AgentEvent::ProjectCreated);
            }
            Err(e) => {
                warn!(agent_id = %self.shared.id, error = %e, "issue creation failed");
                self.set_last_error(e.to_string());
                self.fire(AgentEvent::CreationError);
            }
        }
        Ok(())
    }

    async fn handle_error(&mut self) -> Result<(), StepError> {
        let message = {
            let mut runtime = self.shared.runtime.lock().expect("runtime lock poisoned");
            runtime.error_count += 1;
            runtime
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string())
        };
        self.deps.events.on_error(self.shared.id, &message);
        self.fire(AgentEvent::ErrorAcknowledged);
        Ok(())
    }

    async fn handle_cooldown(&mut self) -> Result<(), StepError> {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.cooldown) => {}
            _ = self.shared.stop.cancelled() => {}
        }
        self.fire(AgentEvent::CooldownComplete);
        Ok(())
    }

    async fn handle_paused(&mut self) -> Result<(), StepError> {
        loop {
            if self.shared.stop.is_cancelled() {
                // Loop top turns this into the Stop transition.
                return Ok(());
            }
            if !*self.pause_rx.borrow() {
                self.fire(AgentEvent::Resume);
                return Ok(());
            }
            tokio::select! {
                _ = self.shared.stop.cancelled() => {}
                result = self.pause_rx.changed() => {
                    if result.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn issue_body_from_idea(idea: &ParsedIdea, agent_id: u32) -> String {
    let criteria = idea
        .acceptance_criteria
        .iter()
        .map(|c| format!("- [ ] {c}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{description}\n\n## Technical approach\n{approach}\n\n\
         ## Acceptance criteria\n{criteria}\n\n\
         _Effort: ~{effort}h | Category: {category} | Proposed by agent-{agent_id}_\n",
        description = idea.description,
        approach = idea.technical_approach,
        criteria = criteria,
        effort = idea.effort_hours,
        category = idea.category,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_body_contains_checklist_and_metadata() {
        let idea = ParsedIdea {
            title: "Add cache warmup".to_string(),
            description: "Warm the cache at startup so first requests are fast.".to_string(),
            acceptance_criteria: vec![
                "Warmup runs at boot".to_string(),
                "Metrics exposed".to_string(),
                "Docs updated".to_string(),
            ],
            technical_approach: "Background task on startup.".to_string(),
            effort_hours: 2,
            category: "performance".to_string(),
        };

        let body = issue_body_from_idea(&idea, 3);
        assert!(body.contains("- [ ] Warmup runs at boot"));
        assert!(body.contains("## Technical approach"));
        assert!(body.contains("_Effort: ~2h | Category: performance | Proposed by agent-3_"));
    }
}
