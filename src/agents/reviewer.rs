//! Review agent: evaluates a finished diff against acceptance criteria.
//!
//! Runs a read-only session, so the review can never mutate the worktree it
//! is judging. The verdict comes back as JSON; anything that does not parse
//! into the expected shape becomes a synthetic rejection rather than an
//! error, so a malformed verdict sends the work back instead of crashing the
//! loop.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::external::GitCli;
use crate::llm::{SessionDriver, SessionMessage, SessionRequest, SessionResult, ToolPreset};
use crate::queue::WorkItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion: String,
    pub passed: bool,
    #[serde(default)]
    pub feedback: String,
}

/// Structured review verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub approved: bool,
    pub criteria_results: Vec<CriterionResult>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tests_ran: bool,
    #[serde(default)]
    pub tests_passed: bool,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("session error: {0}")]
    Session(#[from] crate::llm::SessionError),
    #[error("review session failed: {0}")]
    SessionFailed(String),
}

/// Runs read-only review sessions over completed work.
pub struct ReviewAgent {
    driver: Arc<dyn SessionDriver>,
    git: GitCli,
    max_budget_usd: f64,
}

impl std::fmt::Debug for ReviewAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewAgent")
            .field("max_budget_usd", &self.max_budget_usd)
            .finish()
    }
}

const REVIEW_TURN_CAP: u32 = 20;

impl ReviewAgent {
    pub fn new(driver: Arc<dyn SessionDriver>, git: GitCli, max_budget_usd: f64) -> Self {
        Self {
            driver,
            git,
            max_budget_usd,
        }
    }

    pub async fn review(
        &self,
        item: &WorkItem,
        worktree: &Path,
        cancel: CancellationToken,
    ) -> Result<ReviewOutcome, ReviewError> {
        let diff = self.git.diff_against_parent(worktree).await;
        if diff.is_empty() {
            debug!(issue = %item.issue_number, "no parent commit or empty diff");
        }

        let request = SessionRequest {
            prompt: build_prompt(item, &diff),
            cwd: worktree.to_path_buf(),
            tools: ToolPreset::ReadOnly,
            max_budget_usd: self.max_budget_usd,
            max_turns: REVIEW_TURN_CAP,
            cancel,
        };
        let mut stream = self.driver.run(request).await?;

        let mut terminal: Option<SessionResult> = None;
        while let Some(message) = stream.recv().await {
            if let SessionMessage::Result(result) = message {
                terminal = Some(result);
                break;
            }
        }

        let result = terminal
            .ok_or_else(|| ReviewError::SessionFailed("stream ended without result".into()))?;
        if !result.is_success() {
            return Err(ReviewError::SessionFailed(result.error_text()));
        }

        let text = result.result.unwrap_or_default();
        Ok(parse_outcome(&text))
    }
}

fn build_prompt(item: &WorkItem, diff: &str) -> String {
    let criteria = item
        .acceptance_criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Review the change below for issue #{number} ({title}).\n\n\
         Evaluate every acceptance criterion pass/fail and answer with a JSON \
         object: {{\"approved\": bool, \"criteriaResults\": [{{\"criterion\", \
         \"passed\", \"feedback\"}}], \"summary\", \"testsRan\", \"testsPassed\"}}.\n\n\
         # Acceptance criteria\n{criteria}\n\n# Diff\n```diff\n{diff}\n```",
        number = item.issue_number,
        title = item.issue_title,
        criteria = criteria,
        diff = diff,
    )
}

/// Strip an optional markdown code fence around a JSON payload.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse the verdict text. A shape violation yields a rejected outcome whose
/// summary names the failure.
pub fn parse_outcome(text: &str) -> ReviewOutcome {
    let payload = strip_code_fence(text);

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => return rejected(format!("review verdict was not valid JSON: {e}")),
    };

    let has_shape = value.get("approved").map(serde_json::Value::is_boolean) == Some(true)
        && value.get("criteriaResults").map(serde_json::Value::is_array) == Some(true);
    if !has_shape {
        return rejected(
            "review verdict missing boolean 'approved' or array 'criteriaResults'".to_string(),
        );
    }

    match serde_json::from_value::<ReviewOutcome>(value) {
        Ok(outcome) => outcome,
        Err(e) => rejected(format!("review verdict had unexpected field types: {e}")),
    }
}

fn rejected(summary: String) -> ReviewOutcome {
    warn!(reason = %summary, "synthesizing rejected review outcome");
    ReviewOutcome {
        approved: false,
        criteria_results: Vec::new(),
        summary,
        tests_ran: false,
        tests_passed: false,
    }
}
