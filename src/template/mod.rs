//! Category prompt templates for ideation.
//!
//! A template is a markdown file named `<category>.md` carrying
//! `{{placeholder}}` slots. Context is gathered concurrently: recent commit
//! subjects from the repository, dependency names from the manifest, and the
//! open issue count from the queue.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::queue::WorkQueue;

const RECENT_COMMIT_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no prompt template for category '{category}' at {path}")]
    MissingTemplate { category: String, path: PathBuf },
    #[error("failed to read template {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Interpolation context for one ideation run.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub owner: String,
    pub repo: String,
    pub recent_commits: Vec<String>,
    pub tech_stack: Vec<String>,
    pub existing_issue_count: u64,
}

/// Loads and interpolates category prompts.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    prompts_dir: PathBuf,
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid regex"))
}

impl TemplateEngine {
    pub fn new(prompts_dir: PathBuf) -> Self {
        Self { prompts_dir }
    }

    /// Read `<dir>/<category>.md` and substitute the context.
    pub async fn load_category_prompt(
        &self,
        category: &str,
        context: &TemplateContext,
    ) -> Result<String, TemplateError> {
        let path = self.prompts_dir.join(format!("{category}.md"));
        let template = tokio::fs::read_to_string(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TemplateError::MissingTemplate {
                    category: category.to_string(),
                    path: path.clone(),
                }
            } else {
                TemplateError::Unreadable {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        Ok(substitute(&template, context))
    }
}

/// Replace the known placeholders. Unknown `{{...}}` markers are left in
/// place with a warning so a template typo is visible in the rendered prompt.
pub fn substitute(template: &str, context: &TemplateContext) -> String {
    let rendered = template
        .replace("{{owner}}", &context.owner)
        .replace("{{repo}}", &context.repo)
        .replace("{{recentCommits}}", &context.recent_commits.join("\n"))
        .replace("{{techStack}}", &context.tech_stack.join(", "))
        .replace(
            "{{existingIssueCount}}",
            &context.existing_issue_count.to_string(),
        );

    for caps in placeholder_pattern().captures_iter(&rendered) {
        warn!(placeholder = &caps[1], "unknown template placeholder left in place");
    }
    rendered
}

/// Build the interpolation context. The three sources are independent and
/// fetched concurrently; each degrades to a default with a warning so a
/// broken manifest or an API hiccup never blocks ideation.
pub async fn build_context(
    repo_root: &Path,
    owner: &str,
    repo: &str,
    queue: &dyn WorkQueue,
) -> TemplateContext {
    let (recent_commits, tech_stack, existing_issue_count) = tokio::join!(
        recent_commit_subjects(repo_root.to_path_buf()),
        manifest_dependencies(repo_root.to_path_buf()),
        queue.get_open_issue_count(owner, repo),
    );

    TemplateContext {
        owner: owner.to_string(),
        repo: repo.to_string(),
        recent_commits: recent_commits.unwrap_or_else(|e| {
            warn!(error = %e, "could not read recent commits");
            Vec::new()
        }),
        tech_stack: tech_stack.unwrap_or_else(|e| {
            warn!(error = %e, "could not read manifest dependencies");
            Vec::new()
        }),
        existing_issue_count: existing_issue_count.unwrap_or_else(|e| {
            warn!(error = %e, "could not fetch open issue count");
            0
        }),
    }
}

/// Subjects of the last 20 commits on HEAD, newest first.
async fn recent_commit_subjects(repo_root: PathBuf) -> anyhow::Result<Vec<String>> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
        let repo = git2::Repository::open(&repo_root)?;
        let mut walk = repo.revwalk()?;
        walk.push_head()?;

        let mut subjects = Vec::with_capacity(RECENT_COMMIT_LIMIT);
        for oid in walk.take(RECENT_COMMIT_LIMIT) {
            let commit = repo.find_commit(oid?)?;
            subjects.push(commit.summary().unwrap_or("<non-utf8 subject>").to_string());
        }
        Ok(subjects)
    })
    .await?
}

/// Dependency names from the project manifest (`Cargo.toml`).
async fn manifest_dependencies(repo_root: PathBuf) -> anyhow::Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(repo_root.join("Cargo.toml")).await?;
    let manifest: toml::Value = toml::from_str(&raw)?;

    let mut names: Vec<String> = manifest
        .get("dependencies")
        .and_then(toml::Value::as_table)
        .map(|table| table.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();
    Ok(names)
}
