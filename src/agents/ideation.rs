//! Ideation agent: proposes a new work item when the queue runs dry.
//!
//! The model may decline with a literal `NO_IDEA_AVAILABLE`. Accepted ideas
//! are validated structurally and run through a token-overlap duplicate
//! filter against the open issue titles. Every failure mode folds into the
//! outcome value; this agent never returns an `Err` to the loop.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::llm::{SessionDriver, SessionMessage, SessionRequest, SessionResult, ToolPreset};

const NO_IDEA_TOKEN: &str = "NO_IDEA_AVAILABLE";
const DUPLICATE_OVERLAP_THRESHOLD: f64 = 0.8;
const IDEATION_TURN_CAP: u32 = 15;

/// A validated idea ready to be filed as an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedIdea {
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub technical_approach: String,
    pub effort_hours: u32,
    #[serde(default)]
    pub category: String,
}

/// Outcome of one ideation run.
///
/// `idea == None && !no_idea_available` is the error shape.
#[derive(Debug, Clone, PartialEq)]
pub struct IdeationOutcome {
    pub idea: Option<ParsedIdea>,
    pub no_idea_available: bool,
    pub category: String,
}

impl IdeationOutcome {
    fn no_idea(category: &str) -> Self {
        Self {
            idea: None,
            no_idea_available: true,
            category: category.to_string(),
        }
    }

    fn error(category: &str) -> Self {
        Self {
            idea: None,
            no_idea_available: false,
            category: category.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.idea.is_none() && !self.no_idea_available
    }
}

/// Runs read-only ideation sessions.
pub struct IdeationAgent {
    driver: Arc<dyn SessionDriver>,
    max_budget_usd: f64,
}

impl std::fmt::Debug for IdeationAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdeationAgent")
            .field("max_budget_usd", &self.max_budget_usd)
            .finish()
    }
}

impl IdeationAgent {
    pub fn new(driver: Arc<dyn SessionDriver>, max_budget_usd: f64) -> Self {
        Self {
            driver,
            max_budget_usd,
        }
    }

    /// Generate one idea for `category`.
    ///
    /// `prompt` is the already-interpolated category template;
    /// `existing_titles` feeds the duplicate filter.
    pub async fn ideate(
        &self,
        category: &str,
        prompt: String,
        existing_titles: &[String],
        workspace_root: PathBuf,
        cancel: CancellationToken,
    ) -> IdeationOutcome {
        let request = SessionRequest {
            prompt,
            cwd: workspace_root,
            tools: ToolPreset::ReadOnly,
            max_budget_usd: self.max_budget_usd,
            max_turns: IDEATION_TURN_CAP,
            cancel,
        };

        let mut stream = match self.driver.run(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(category = %category, error = %e, "ideation session failed to start");
                return IdeationOutcome::error(category);
            }
        };

        let mut terminal: Option<SessionResult> = None;
        while let Some(message) = stream.recv().await {
            if let SessionMessage::Result(result) = message {
                terminal = Some(result);
                break;
            }
        }

        let Some(result) = terminal else {
            warn!(category = %category, "ideation stream ended without result");
            return IdeationOutcome::error(category);
        };
        if !result.is_success() {
            warn!(category = %category, error = %result.error_text(), "ideation session failed");
            return IdeationOutcome::error(category);
        }

        let text = result.result.unwrap_or_default();
        if text.contains(NO_IDEA_TOKEN) {
            debug!(category = %category, "model reported no idea available");
            return IdeationOutcome::no_idea(category);
        }

        let Some(mut idea) = parse_idea(&text) else {
            warn!(category = %category, "ideation response failed validation");
            return IdeationOutcome::error(category);
        };
        idea.category = category.to_string();

        if check_duplicate(&idea.title, existing_titles) {
            info!(category = %category, title = %idea.title, "idea filtered as duplicate");
            return IdeationOutcome::no_idea(category);
        }

        IdeationOutcome {
            idea: Some(idea),
            no_idea_available: false,
            category: category.to_string(),
        }
    }
}

/// Parse and validate an idea payload, tolerating code fences and prose
/// around the JSON object.
pub fn parse_idea(text: &str) -> Option<ParsedIdea> {
    let stripped = super::reviewer::strip_code_fence(text);

    let value: serde_json::Value = serde_json::from_str(stripped)
        .ok()
        .or_else(|| first_json_object(stripped).and_then(|s| serde_json::from_str(s).ok()))?;

    let idea: ParsedIdea = serde_json::from_value(value).ok()?;
    validate_idea(&idea).then_some(idea)
}

fn validate_idea(idea: &ParsedIdea) -> bool {
    let title_ok = !idea.title.trim().is_empty() && idea.title.len() < 100;
    let description_ok = (20..=500).contains(&idea.description.len());
    let criteria_ok = idea.acceptance_criteria.len() >= 3
        && idea.acceptance_criteria.iter().all(|c| !c.trim().is_empty());
    let approach_ok = !idea.technical_approach.trim().is_empty();
    let effort_ok = (1..=8).contains(&idea.effort_hours);

    if !(title_ok && description_ok && criteria_ok && approach_ok && effort_ok) {
        debug!(
            title_ok,
            description_ok, criteria_ok, approach_ok, effort_ok, "idea shape validation failed"
        );
        return false;
    }
    true
}

/// Extract the first balanced `{...}` block, respecting string literals.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn tokenize(title: &str) -> BTreeSet<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Word-overlap duplicate test.
///
/// Titles are tokenized into lowercase alphanumeric words; a candidate is a
/// duplicate of an existing title when the overlap relative to the smaller
/// token set exceeds 0.8.
pub fn check_duplicate(candidate: &str, existing_titles: &[String]) -> bool {
    let candidate_tokens = tokenize(candidate);
    if candidate_tokens.is_empty() {
        return false;
    }

    for existing in existing_titles {
        let existing_tokens = tokenize(existing);
        if existing_tokens.is_empty() {
            continue;
        }
        let intersection = candidate_tokens.intersection(&existing_tokens).count();
        let smaller = candidate_tokens.len().min(existing_tokens.len());
        if intersection as f64 / smaller as f64 > DUPLICATE_OVERLAP_THRESHOLD {
            return true;
        }
    }
    false
}
