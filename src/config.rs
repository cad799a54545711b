use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Orchestrator configuration.
///
/// Covers the closed set of knobs the core consumes. Event-sink callbacks and
/// the LLM session driver are injected into [`crate::Orchestrator`] directly;
/// they have no file representation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Base directory for session files; also the repository checkout the
    /// worktrees branch from.
    pub workspace_root: PathBuf,
    /// Initial worker pool size.
    pub desired_instances: usize,
    /// Global daily spend ceiling in USD.
    pub daily_budget_usd: f64,
    /// Global monthly spend ceiling in USD.
    pub monthly_budget_usd: f64,
    /// Per-execution-session spend cap.
    pub max_budget_per_task_usd: f64,
    /// Per-review-session spend cap.
    pub max_budget_per_review_usd: f64,
    /// Per-ideation-session spend cap.
    pub max_budget_per_ideation_usd: f64,
    /// LLM turn cap per execution session.
    pub max_turns_per_task: u32,
    /// Ideation categories; an empty list disables ideation entirely.
    pub enabled_categories: Vec<String>,
    /// Project board node id.
    pub project_id: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Code-host API token.
    pub host_token: String,
    /// Directory of `<category>.md` prompt templates.
    pub category_prompts_dir: PathBuf,
    /// Board field the claim mutation writes the agent label into.
    pub claim_field_id: Option<String>,
    /// Idle queue-poll interval.
    pub idle_poll_seconds: u64,
    /// Post-error quiet period.
    pub cooldown_seconds: u64,
    /// Grace period an agent gets to drain on stop.
    pub stop_grace_seconds: u64,
    /// Interval of the periodic worktree sweep.
    pub worktree_sweep_interval_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            desired_instances: 1,
            daily_budget_usd: 50.0,
            monthly_budget_usd: 500.0,
            max_budget_per_task_usd: 5.0,
            max_budget_per_review_usd: 1.0,
            max_budget_per_ideation_usd: 1.0,
            max_turns_per_task: 50,
            enabled_categories: Vec::new(),
            project_id: String::new(),
            owner: String::new(),
            repo: String::new(),
            host_token: String::new(),
            category_prompts_dir: PathBuf::from("prompts"),
            claim_field_id: None,
            idle_poll_seconds: 30,
            cooldown_seconds: 60,
            stop_grace_seconds: 30,
            worktree_sweep_interval_seconds: 1800,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from an optional TOML file layered with
    /// `SODA_FOUNTAIN_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("SODA_FOUNTAIN").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Session-state directory (`<workspace>/.claude-sessions`).
    pub fn sessions_dir(&self) -> PathBuf {
        self.workspace_root.join(".claude-sessions")
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn worktree_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.worktree_sweep_interval_seconds)
    }

    /// Ideation runs only when at least one category is enabled.
    pub fn ideation_enabled(&self) -> bool {
        !self.enabled_categories.is_empty()
    }
}
