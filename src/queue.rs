//! Work queue adapter.
//!
//! Agent loops consume work through the [`WorkQueue`] seam; the production
//! implementation reads a GitHub Projects v2 board through the GraphQL
//! client. Tests inject in-memory queues.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::github::{CreatedIssue, GitHubError, GraphQlClient};

/// A unit of work claimed from the board.
///
/// `item_id` is the board item node id; the claim mutation is unaddressable
/// without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub project_number: u64,
    pub issue_number: u64,
    pub item_id: String,
    pub issue_title: String,
    pub issue_body: String,
    pub acceptance_criteria: Vec<String>,
    pub labels: BTreeSet<String>,
}

/// Queue operations the agent loop depends on.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Next unclaimed item, or `None` when the board is drained.
    async fn find_next_work_item(&self, agent_id: u32) -> Result<Option<WorkItem>, GitHubError>;

    /// Idempotent assign. `false` on any failure (including a lost race).
    async fn claim_issue(&self, project_id: &str, item_id: &str, agent_id: u32) -> bool;

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        labels: Option<Vec<String>>,
    ) -> Result<CreatedIssue, GitHubError>;

    async fn update_issue_status(
        &self,
        project_id: &str,
        item_id: &str,
        field_id: &str,
        option_id: &str,
    ) -> Result<(), GitHubError>;

    async fn get_open_issue_count(&self, owner: &str, repo: &str) -> Result<u64, GitHubError>;

    async fn list_open_issue_titles(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<String>, GitHubError>;
}

/// Board-backed queue.
///
/// An item is eligible when its status column reads `Todo` and no agent is
/// recorded in the claim field. The claim field id is explicit configuration;
/// see DESIGN.md for why it is not derived from the item.
pub struct GitHubWorkQueue {
    client: Arc<GraphQlClient>,
    project_id: String,
    claim_field_id: String,
}

impl GitHubWorkQueue {
    pub fn new(client: Arc<GraphQlClient>, project_id: String, claim_field_id: String) -> Self {
        Self {
            client,
            project_id,
            claim_field_id,
        }
    }

    fn agent_label(agent_id: u32) -> String {
        format!("agent-{agent_id}")
    }
}

#[async_trait]
impl WorkQueue for GitHubWorkQueue {
    async fn find_next_work_item(&self, agent_id: u32) -> Result<Option<WorkItem>, GitHubError> {
        let data = self.client.project_items(&self.project_id).await?;
        let item = next_eligible_item(&data);
        debug!(
            agent_id = %agent_id,
            found = item.is_some(),
            "polled project board"
        );
        Ok(item)
    }

    async fn claim_issue(&self, project_id: &str, item_id: &str, agent_id: u32) -> bool {
        self.client
            .claim_issue(
                project_id,
                item_id,
                &self.claim_field_id,
                &Self::agent_label(agent_id),
            )
            .await
    }

    async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        labels: Option<Vec<String>>,
    ) -> Result<CreatedIssue, GitHubError> {
        self.client
            .create_issue(owner, repo, title, body, labels.as_deref())
            .await
    }

    async fn update_issue_status(
        &self,
        project_id: &str,
        item_id: &str,
        field_id: &str,
        option_id: &str,
    ) -> Result<(), GitHubError> {
        self.client
            .update_issue_status(project_id, item_id, field_id, option_id)
            .await
    }

    async fn get_open_issue_count(&self, owner: &str, repo: &str) -> Result<u64, GitHubError> {
        self.client.get_open_issue_count(owner, repo).await
    }

    async fn list_open_issue_titles(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<String>, GitHubError> {
        self.client.list_open_issue_titles(owner, repo).await
    }
}

/// Pick the first board item in `Todo` with an empty claim field.
fn next_eligible_item(data: &serde_json::Value) -> Option<WorkItem> {
    let project = data.get("node")?;
    let project_number = project.get("number").and_then(serde_json::Value::as_u64)?;
    let items = project.pointer("/items/nodes")?.as_array()?;

    for node in items {
        match work_item_from_node(project_number, node) {
            Some(item) => return Some(item),
            None => continue,
        }
    }
    None
}

fn work_item_from_node(project_number: u64, node: &serde_json::Value) -> Option<WorkItem> {
    let item_id = node.get("id")?.as_str()?.to_string();
    let content = node.get("content")?;
    let issue_number = content.get("number").and_then(serde_json::Value::as_u64)?;

    let mut status = None;
    let mut claimed_by = None;
    if let Some(values) = node.pointer("/fieldValues/nodes").and_then(|v| v.as_array()) {
        for value in values {
            let field_name = value.pointer("/field/name").and_then(|v| v.as_str());
            match field_name {
                Some("Status") => status = value.get("name").and_then(|v| v.as_str()),
                Some("Agent") => {
                    claimed_by = value
                        .get("text")
                        .and_then(|v| v.as_str())
                        .filter(|t| !t.trim().is_empty())
                }
                _ => {}
            }
        }
    }

    if status != Some("Todo") {
        return None;
    }
    if let Some(agent) = claimed_by {
        debug!(issue = %issue_number, agent = %agent, "item already claimed");
        return None;
    }

    let issue_title = content
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let issue_body = content
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let labels = content
        .pointer("/labels/nodes")
        .and_then(|v| v.as_array())
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n.get("name").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let acceptance_criteria = extract_acceptance_criteria(&issue_body);
    if acceptance_criteria.is_empty() {
        warn!(issue = %issue_number, "issue has no acceptance criteria checklist");
    }

    Some(WorkItem {
        project_number,
        issue_number,
        item_id,
        issue_title,
        issue_body,
        acceptance_criteria,
        labels,
    })
}

/// Pull the unchecked checklist items out of an issue body, in order.
pub fn extract_acceptance_criteria(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            trimmed
                .strip_prefix("- [ ]")
                .or_else(|| trimmed.strip_prefix("* [ ]"))
                .map(|rest| rest.trim().to_string())
        })
        .filter(|c| !c.is_empty())
        .collect()
}
