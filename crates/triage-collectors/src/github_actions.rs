//! Failed GitHub Actions runs, their failed jobs and log excerpts via the REST API.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};
use triage_core::{
    CollectedEvidence, EvidenceCollector, EvidenceItem, Result, SourceKind, SummaryScalar,
    TriageError,
};

const SOURCE: &str = "github";

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_RUN_LIMIT: u32 = 5;

/// Lowercase substrings that start an error block in a job log.
pub const ERROR_KEYWORDS: &[&str] = &[
    "error:",
    "error ",
    "failed",
    "failure",
    "fail:",
    "not found",
    "does not exist",
    "no such file",
    "exception",
    "traceback",
    "fatal:",
    "cannot",
    "unable to",
    "exit code",
    "returned non-zero",
    "command not found",
    "permission denied",
];

const CONTEXT_BEFORE: usize = 8;
const CONTEXT_AFTER: usize = 12;
const FALLBACK_TAIL: usize = 40;

#[derive(Debug, Clone, Deserialize)]
struct WorkflowRun {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    run_number: Option<u64>,
    #[serde(default)]
    head_branch: Option<String>,
    #[serde(default)]
    path: Option<String>,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct RunList {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Clone, Deserialize)]
struct Job {
    id: u64,
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    steps: Vec<JobStep>,
}

#[derive(Debug, Clone, Deserialize)]
struct JobStep {
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Pull the interesting part out of a job log.
///
/// Each line containing an [`ERROR_KEYWORDS`] entry opens a block of the
/// surrounding lines; lines already shown in an earlier block are not
/// repeated. Logs with no keyword fall back to their last lines.
pub fn extract_error_blocks(logs: &str) -> String {
    let lines: Vec<&str> = logs.lines().collect();
    let mut shown: HashSet<usize> = HashSet::new();
    let mut blocks: Vec<String> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if shown.contains(&idx) {
            continue;
        }
        let lower = line.to_lowercase();
        if !ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            continue;
        }
        let start = idx.saturating_sub(CONTEXT_BEFORE);
        let end = (idx + CONTEXT_AFTER).min(lines.len());
        let block: Vec<&str> = (start..end)
            .filter(|i| shown.insert(*i))
            .map(|i| lines[i])
            .collect();
        if !block.is_empty() {
            blocks.push(format!(
                "--- Error Block {} ---\n{}",
                blocks.len() + 1,
                block.join("\n")
            ));
        }
    }

    if blocks.is_empty() {
        let tail = lines.len().saturating_sub(FALLBACK_TAIL);
        return lines[tail..].join("\n");
    }
    blocks.join("\n\n")
}

fn is_failed(conclusion: Option<&str>) -> bool {
    matches!(conclusion, Some("failure") | Some("timed_out"))
}

fn job_item(run: &WorkflowRun, job: &Job, excerpt: &str) -> EvidenceItem {
    let workflow = run.name.as_deref().unwrap_or("workflow");
    let failed_steps: Vec<&str> = job
        .steps
        .iter()
        .filter(|s| is_failed(s.conclusion.as_deref()))
        .map(|s| s.name.as_str())
        .collect();

    let mut detail = format!(
        "run #{} on {} ({})",
        run.run_number.unwrap_or(run.id),
        run.head_branch.as_deref().unwrap_or("unknown branch"),
        run.html_url
    );
    if !failed_steps.is_empty() {
        detail.push_str(&format!("\nfailed steps: {}", failed_steps.join(", ")));
    }
    detail.push('\n');
    detail.push_str(excerpt);

    let item = EvidenceItem::new(
        SourceKind::WorkflowJob,
        format!("{workflow} / {}", job.name),
        detail,
    );
    match job.completed_at {
        Some(at) => item.with_timestamp(at),
        None => item,
    }
}

/// Collects failed runs for one `owner/repo`.
#[derive(Debug, Clone)]
pub struct GitHubActionsCollector {
    repo: String,
    token: Option<String>,
    limit: u32,
    run_id: Option<u64>,
    api_base: String,
    http_client: reqwest::Client,
}

impl GitHubActionsCollector {
    pub fn new(repo: &str, token: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("triage/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                TriageError::source_unavailable(SOURCE, format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            repo: repo.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            limit: DEFAULT_RUN_LIMIT,
            run_id: None,
            api_base: DEFAULT_API_BASE.to_string(),
            http_client,
        })
    }

    /// Number of recent failed runs to inspect.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Inspect this run only instead of listing recent failures.
    pub fn with_run_id(mut self, run_id: Option<u64>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn request(&self, path: &str, accept: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.token.as_deref().ok_or_else(|| {
            TriageError::source_auth(SOURCE, "GITHUB_TOKEN is not set; pass --token or export it")
        })?;
        Ok(self
            .http_client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    async fn send(&self, path: &str, accept: &str) -> Result<reqwest::Response> {
        debug!(path = %path, "GitHub API request");
        let response = self.request(path, accept)?.send().await.map_err(|e| {
            TriageError::source_unavailable(SOURCE, format!("GET {path} failed: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = format!("GET {path} returned HTTP {}: {}", status.as_u16(), body.trim());
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(TriageError::source_auth(SOURCE, detail))
        } else {
            Err(TriageError::source_unavailable(SOURCE, detail))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(path, "application/vnd.github+json")
            .await?
            .json::<T>()
            .await
            .map_err(|e| {
                TriageError::source_unavailable(SOURCE, format!("unexpected response from {path}: {e}"))
            })
    }

    async fn get_text(&self, path: &str, accept: &str) -> Result<String> {
        self.send(path, accept).await?.text().await.map_err(|e| {
            TriageError::source_unavailable(SOURCE, format!("reading {path} failed: {e}"))
        })
    }

    async fn failed_runs(&self) -> Result<Vec<WorkflowRun>> {
        match self.run_id {
            Some(id) => {
                let run: WorkflowRun = self
                    .get_json(&format!("/repos/{}/actions/runs/{}", self.repo, id))
                    .await?;
                Ok(vec![run])
            }
            None => {
                let list: RunList = self
                    .get_json(&format!(
                        "/repos/{}/actions/runs?status=failure&per_page={}",
                        self.repo, self.limit
                    ))
                    .await?;
                Ok(list.workflow_runs)
            }
        }
    }

    async fn job_logs(&self, job: &Job) -> String {
        let path = format!("/repos/{}/actions/jobs/{}/logs", self.repo, job.id);
        match self.get_text(&path, "application/vnd.github+json").await {
            Ok(logs) => extract_error_blocks(&logs),
            Err(e) => {
                warn!(job = %job.name, error = %e, "job logs unavailable");
                format!("<logs unavailable: {e}>")
            }
        }
    }

    async fn workflow_file(&self, path: &str) -> Option<String> {
        let url = format!("/repos/{}/contents/{}", self.repo, path);
        match self.get_text(&url, "application/vnd.github.raw+json").await {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(path = %path, error = %e, "workflow file unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl EvidenceCollector for GitHubActionsCollector {
    fn source(&self) -> &str {
        SOURCE
    }

    async fn collect(&self) -> Result<CollectedEvidence> {
        info!(repo = %self.repo, limit = self.limit, run_id = ?self.run_id, "fetching failed workflow runs");
        let runs = self.failed_runs().await?;

        let mut evidence = CollectedEvidence::new(self.repo.as_str());
        let mut failed_jobs = 0u64;
        let mut workflow_path: Option<String> = None;

        for run in &runs {
            let jobs: JobList = self
                .get_json(&format!("/repos/{}/actions/runs/{}/jobs", self.repo, run.id))
                .await?;
            for job in jobs.jobs.iter().filter(|j| is_failed(j.conclusion.as_deref())) {
                let excerpt = self.job_logs(job).await;
                evidence.items.push(job_item(run, job, &excerpt));
                failed_jobs += 1;
                if workflow_path.is_none() {
                    workflow_path = run.path.clone();
                }
            }
            evidence.follow_ups.push(run.html_url.clone());
        }

        if let Some(path) = workflow_path {
            if let Some(content) = self.workflow_file(&path).await {
                evidence.items.push(
                    EvidenceItem::new(SourceKind::Custom, format!("workflow file {path}"), content)
                        .with_weight(0.0),
                );
            }
        }

        evidence.summary = vec![
            SummaryScalar::text("repository", self.repo.as_str()),
            SummaryScalar::count("failed runs", runs.len() as u64),
            SummaryScalar::count("failed jobs", failed_jobs),
        ];
        Ok(evidence)
    }
}
