//! GraphQL client for the code-host API.
//!
//! Wire policy:
//! - 30 second per-request timeout
//! - up to 3 retries with exponential backoff (2s, 4s, 8s) on transport
//!   errors and 5xx responses
//! - `X-RateLimit-Remaining: 0` or HTTP 429 sleeps until the advertised
//!   reset epoch plus one second, still bounded by the retry cap
//! - other 4xx fail fast; GraphQL `errors` are concatenated and surfaced
//!
//! A client-side `governor` quota keeps the pool from bursting into the
//! server-side limit in the first place.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::errors::GitHubError;

const DEFAULT_ENDPOINT: &str = "https://api.github.com/graphql";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIssue {
    pub number: u64,
    pub id: String,
}

/// Shared GraphQL client. Retry/backoff state is per-call; the token is
/// read-only after construction, so one instance serves the whole pool.
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    retry: RetryConfig,
    limiter: Arc<DefaultDirectRateLimiter>,
    repository_id: OnceCell<String>,
}

impl std::fmt::Debug for GraphQlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQlClient")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish()
    }
}

impl GraphQlClient {
    pub fn new(token: String) -> Result<Self, GitHubError> {
        Self::with_endpoint(token, DEFAULT_ENDPOINT.to_string(), RetryConfig::default())
    }

    pub fn with_endpoint(
        token: String,
        endpoint: String,
        retry: RetryConfig,
    ) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("soda-fountain")
            .build()
            .map_err(|e| GitHubError::Network(e.to_string()))?;

        // Authenticated GraphQL allows 5000 points/hour; one request per
        // second with a burst of ten stays comfortably under it.
        let quota = Quota::per_second(NonZeroU32::new(1).unwrap())
            .allow_burst(NonZeroU32::new(10).unwrap());

        Ok(Self {
            http,
            endpoint,
            token,
            retry,
            limiter: Arc::new(RateLimiter::direct(quota)),
            repository_id: OnceCell::new(),
        })
    }

    /// Execute a query/mutation and return the `data` payload.
    pub async fn execute(&self, query: &str, variables: Value) -> Result<Value, GitHubError> {
        let body = json!({ "query": query, "variables": variables });
        let mut attempt: u32 = 0;
        let mut last_error;

        loop {
            self.limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
                .await;

            match self.send_once(&body).await {
                Ok(data) => return Ok(data),
                Err(GitHubError::RateLimit {
                    reset_time,
                    remaining,
                }) => {
                    let e = GitHubError::RateLimit {
                        reset_time,
                        remaining,
                    };
                    if attempt >= self.retry.max_retries {
                        return Err(GitHubError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: e.to_string(),
                        });
                    }
                    let wait = (reset_time - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        + Duration::from_secs(1);
                    warn!(wait_secs = wait.as_secs(), "rate limited, sleeping until reset");
                    tokio::time::sleep(wait).await;
                    last_error = e;
                }
                Err(e) if e.is_retryable() => {
                    if attempt >= self.retry.max_retries {
                        return Err(GitHubError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.retry.base_delay * 2_u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient GraphQL failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = e;
                }
                Err(e) => return Err(e),
            }

            attempt += 1;
            debug!(attempt = attempt, error = %last_error, "retrying GraphQL request");
        }
    }

    async fn send_once(&self, body: &Value) -> Result<Value, GitHubError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GitHubError::Timeout {
                        operation: "graphql".to_string(),
                        duration_ms: REQUEST_TIMEOUT.as_millis() as u64,
                    }
                } else {
                    GitHubError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let remaining = header_u64(&response, "x-ratelimit-remaining");
        if status.as_u16() == 429 || remaining == Some(0) {
            let reset_time = header_u64(&response, "x-ratelimit-reset")
                .and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single())
                .unwrap_or_else(Utc::now);
            return Err(GitHubError::RateLimit {
                reset_time,
                remaining: remaining.unwrap_or(0) as u32,
            });
        }

        if status.is_server_error() || status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| GitHubError::MalformedResponse(e.to_string()))?;

        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let joined = errors
                    .iter()
                    .map(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string()
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(GitHubError::GraphQl(joined));
            }
        }

        payload
            .get("data")
            .cloned()
            .ok_or_else(|| GitHubError::MalformedResponse("response has no data field".into()))
    }

    /// Count of open issues in the repository.
    pub async fn get_open_issue_count(&self, owner: &str, repo: &str) -> Result<u64, GitHubError> {
        let data = self
            .execute(
                r"query($owner: String!, $repo: String!) {
                    repository(owner: $owner, name: $repo) {
                        issues(states: OPEN) { totalCount }
                    }
                }",
                json!({ "owner": owner, "repo": repo }),
            )
            .await?;

        data.pointer("/repository/issues/totalCount")
            .and_then(Value::as_u64)
            .ok_or_else(|| GitHubError::MalformedResponse("missing issues.totalCount".into()))
    }

    /// Titles of currently open issues, used by the ideation duplicate
    /// filter.
    pub async fn list_open_issue_titles(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<String>, GitHubError> {
        let data = self
            .execute(
                r"query($owner: String!, $repo: String!) {
                    repository(owner: $owner, name: $repo) {
                        issues(states: OPEN, first: 100, orderBy: {field: CREATED_AT, direction: DESC}) {
                            nodes { title }
                        }
                    }
                }",
                json!({ "owner": owner, "repo": repo }),
            )
            .await?;

        let nodes = data
            .pointer("/repository/issues/nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| GitHubError::MalformedResponse("missing issues.nodes".into()))?;
        Ok(nodes
            .iter()
            .filter_map(|n| n.get("title").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Mark a board item as claimed by an agent. Idempotent; returns `false`
    /// on any failure rather than erroring, so a lost claim race just sends
    /// the agent back to the queue.
    pub async fn claim_issue(
        &self,
        project_id: &str,
        item_id: &str,
        field_id: &str,
        agent_label: &str,
    ) -> bool {
        let result = self
            .execute(
                r"mutation($project: ID!, $item: ID!, $field: ID!, $agent: String!) {
                    updateProjectV2ItemFieldValue(input: {
                        projectId: $project,
                        itemId: $item,
                        fieldId: $field,
                        value: { text: $agent }
                    }) {
                        projectV2Item { id }
                    }
                }",
                json!({
                    "project": project_id,
                    "item": item_id,
                    "field": field_id,
                    "agent": agent_label,
                }),
            )
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(item_id = %item_id, error = %e, "claim failed");
                false
            }
        }
    }

    /// Create a new issue; labels that do not exist in the repository are
    /// skipped with a warning.
    pub async fn create_issue(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        labels: Option<&[String]>,
    ) -> Result<CreatedIssue, GitHubError> {
        let repository_id = self.repository_id(owner, repo).await?;

        let mut label_ids = Vec::new();
        for name in labels.unwrap_or_default() {
            match self.label_id(owner, repo, name).await {
                Ok(Some(id)) => label_ids.push(id),
                Ok(None) => warn!(label = %name, "label not found, skipping"),
                Err(e) => warn!(label = %name, error = %e, "label lookup failed, skipping"),
            }
        }

        let data = self
            .execute(
                r"mutation($repo: ID!, $title: String!, $body: String!, $labels: [ID!]) {
                    createIssue(input: {
                        repositoryId: $repo,
                        title: $title,
                        body: $body,
                        labelIds: $labels
                    }) {
                        issue { number id }
                    }
                }",
                json!({
                    "repo": repository_id,
                    "title": title,
                    "body": body,
                    "labels": label_ids,
                }),
            )
            .await?;

        let issue = data
            .pointer("/createIssue/issue")
            .ok_or_else(|| GitHubError::MalformedResponse("missing createIssue.issue".into()))?;
        Ok(CreatedIssue {
            number: issue
                .get("number")
                .and_then(Value::as_u64)
                .ok_or_else(|| GitHubError::MalformedResponse("missing issue.number".into()))?,
            id: issue
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| GitHubError::MalformedResponse("missing issue.id".into()))?
                .to_string(),
        })
    }

    /// Move a board item to a different single-select status option.
    pub async fn update_issue_status(
        &self,
        project_id: &str,
        item_id: &str,
        field_id: &str,
        option_id: &str,
    ) -> Result<(), GitHubError> {
        self.execute(
            r"mutation($project: ID!, $item: ID!, $field: ID!, $option: String!) {
                updateProjectV2ItemFieldValue(input: {
                    projectId: $project,
                    itemId: $item,
                    fieldId: $field,
                    value: { singleSelectOptionId: $option }
                }) {
                    projectV2Item { id }
                }
            }",
            json!({
                "project": project_id,
                "item": item_id,
                "field": field_id,
                "option": option_id,
            }),
        )
        .await
        .map(|_| ())
    }

    /// Fetch board items for the queue adapter.
    pub async fn project_items(&self, project_id: &str) -> Result<Value, GitHubError> {
        self.execute(
            r"query($project: ID!) {
                node(id: $project) {
                    ... on ProjectV2 {
                        number
                        items(first: 50) {
                            nodes {
                                id
                                fieldValues(first: 20) {
                                    nodes {
                                        ... on ProjectV2ItemFieldTextValue {
                                            text
                                            field { ... on ProjectV2FieldCommon { name } }
                                        }
                                        ... on ProjectV2ItemFieldSingleSelectValue {
                                            name
                                            field { ... on ProjectV2FieldCommon { name } }
                                        }
                                    }
                                }
                                content {
                                    ... on Issue {
                                        number
                                        title
                                        body
                                        labels(first: 20) { nodes { name } }
                                    }
                                }
                            }
                        }
                    }
                }
            }",
            json!({ "project": project_id }),
        )
        .await
    }

    async fn repository_id(&self, owner: &str, repo: &str) -> Result<String, GitHubError> {
        self.repository_id
            .get_or_try_init(|| async {
                let data = self
                    .execute(
                        r"query($owner: String!, $repo: String!) {
                            repository(owner: $owner, name: $repo) { id }
                        }",
                        json!({ "owner": owner, "repo": repo }),
                    )
                    .await?;
                data.pointer("/repository/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| GitHubError::MalformedResponse("missing repository.id".into()))
            })
            .await
            .cloned()
    }

    async fn label_id(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
    ) -> Result<Option<String>, GitHubError> {
        let data = self
            .execute(
                r"query($owner: String!, $repo: String!, $name: String!) {
                    repository(owner: $owner, name: $repo) {
                        label(name: $name) { id }
                    }
                }",
                json!({ "owner": owner, "repo": repo, "name": name }),
            )
            .await?;
        Ok(data
            .pointer("/repository/label/id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
