//! Repository/VCS capability.
//!
//! The review core only needs a narrow window into the host: resolve a PR
//! from its URL, list its changed files, fetch the combined diff, and read
//! files/directories at the head commit. The GitHub implementation talks
//! to the REST API; enterprise hosts work via `GITHUB_BASE_URL`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::GitHubConfig;
use crate::session::ChangeType;

/// A resolved pull request.
#[derive(Debug, Clone)]
pub struct PrRef {
    pub url: String,
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub base_sha: String,
    pub head_sha: String,
    pub head_ref: String,
}

#[derive(Debug, Clone)]
pub struct ChangedFileInfo {
    pub path: String,
    pub change_type: ChangeType,
    pub additions: u32,
    pub deletions: u32,
}

#[async_trait]
pub trait VcsProvider: Send + Sync {
    async fn resolve_pr(&self, url: &str) -> Result<PrRef>;
    async fn list_changed_files(&self, pr: &PrRef) -> Result<Vec<ChangedFileInfo>>;
    async fn fetch_diff(&self, pr: &PrRef) -> Result<String>;
    async fn fetch_file_at_commit(&self, pr: &PrRef, path: &str, commit: &str) -> Result<String>;
    async fn list_dir_at_commit(&self, pr: &PrRef, dir: &str, commit: &str) -> Result<Vec<String>>;

    /// Best-effort issue key (e.g. `PROJ-123`) from the PR title or branch.
    fn resolve_issue_key(&self, pr: &PrRef) -> Option<String> {
        static KEY: OnceLock<Regex> = OnceLock::new();
        let re = KEY.get_or_init(|| Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").expect("issue key regex"));
        re.find(&pr.title)
            .or_else(|| re.find(&pr.head_ref))
            .map(|m| m.as_str().to_string())
    }
}

/// Parse a GitHub PR URL: `https://github.{host}/{owner}/{repo}/pull/{n}`.
pub fn parse_pr_url(url: &str) -> Result<(String, String, u64)> {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .trim_end_matches('/');

    let parts: Vec<&str> = without_scheme.split('/').collect();
    // host / owner / repo / pull / number
    let pull_idx = parts
        .iter()
        .position(|p| p.eq_ignore_ascii_case("pull") || p.eq_ignore_ascii_case("pulls"))
        .context("Invalid PR URL: no /pull/ segment")?;

    if pull_idx < 3 || pull_idx + 1 >= parts.len() {
        anyhow::bail!("Invalid PR URL: expected {{host}}/{{owner}}/{{repo}}/pull/{{number}}");
    }

    let owner = parts[pull_idx - 2].to_string();
    let repo = parts[pull_idx - 1].to_string();
    let number: u64 = parts[pull_idx + 1].parse().context("Invalid PR number")?;

    Ok((owner, repo, number))
}

#[derive(Debug, Deserialize)]
struct GhPull {
    title: Option<String>,
    base: GhRef,
    head: GhHeadRef,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhHeadRef {
    sha: String,
    #[serde(rename = "ref")]
    branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhPullFile {
    filename: String,
    status: Option<String>,
    additions: Option<u32>,
    deletions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GhContentEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
}

pub struct GitHubProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitHubProvider {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn get_raw(&self, path: &str, accept: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "assay")
            .send()
            .await
            .context("Failed to reach GitHub")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("GitHub {}: {}", status, text.chars().take(400).collect::<String>());
        }
        Ok(text)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let text = self.get_raw(path, "application/vnd.github+json").await?;
        serde_json::from_str(&text)
            .with_context(|| format!("GitHub returned unexpected JSON for {path}"))
    }

    fn pulls_path(&self, pr: &PrRef, suffix: &str) -> String {
        format!(
            "/repos/{}/{}/pulls/{}{suffix}",
            pr.owner, pr.repo, pr.number
        )
    }
}

fn change_type_from_status(status: Option<&str>) -> ChangeType {
    match status.unwrap_or("modified") {
        "added" | "copied" => ChangeType::Added,
        "removed" => ChangeType::Removed,
        "renamed" => ChangeType::Renamed,
        _ => ChangeType::Modified,
    }
}

#[async_trait]
impl VcsProvider for GitHubProvider {
    async fn resolve_pr(&self, url: &str) -> Result<PrRef> {
        let (owner, repo, number) = parse_pr_url(url)?;
        let pull: GhPull = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{number}"))
            .await?;

        Ok(PrRef {
            url: url.to_string(),
            owner,
            repo,
            number,
            title: pull.title.unwrap_or_default(),
            base_sha: pull.base.sha,
            head_sha: pull.head.sha,
            head_ref: pull.head.branch.unwrap_or_default(),
        })
    }

    async fn list_changed_files(&self, pr: &PrRef) -> Result<Vec<ChangedFileInfo>> {
        let mut files = Vec::new();
        // the files endpoint pages at 100 entries
        for page in 1..=30 {
            let batch: Vec<GhPullFile> = self
                .get_json(&self.pulls_path(pr, &format!("/files?per_page=100&page={page}")))
                .await?;
            let done = batch.len() < 100;
            files.extend(batch.into_iter().map(|f| ChangedFileInfo {
                path: f.filename,
                change_type: change_type_from_status(f.status.as_deref()),
                additions: f.additions.unwrap_or(0),
                deletions: f.deletions.unwrap_or(0),
            }));
            if done {
                break;
            }
        }
        Ok(files)
    }

    async fn fetch_diff(&self, pr: &PrRef) -> Result<String> {
        self.get_raw(&self.pulls_path(pr, ""), "application/vnd.github.v3.diff")
            .await
    }

    async fn fetch_file_at_commit(&self, pr: &PrRef, path: &str, commit: &str) -> Result<String> {
        self.get_raw(
            &format!(
                "/repos/{}/{}/contents/{}?ref={commit}",
                pr.owner, pr.repo, path
            ),
            "application/vnd.github.raw",
        )
        .await
    }

    async fn list_dir_at_commit(&self, pr: &PrRef, dir: &str, commit: &str) -> Result<Vec<String>> {
        let entries: Vec<GhContentEntry> = self
            .get_json(&format!(
                "/repos/{}/{}/contents/{}?ref={commit}",
                pr.owner, pr.repo, dir
            ))
            .await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.entry_type == "file")
            .map(|e| e.path)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pr_urls() {
        let (owner, repo, number) =
            parse_pr_url("https://github.com/acme/widgets/pull/123").unwrap();
        assert_eq!((owner.as_str(), repo.as_str(), number), ("acme", "widgets", 123));

        // enterprise host, trailing slash
        let (owner, repo, number) =
            parse_pr_url("https://github.example.org/team/svc/pull/9/").unwrap();
        assert_eq!((owner.as_str(), repo.as_str(), number), ("team", "svc", 9));

        assert!(parse_pr_url("https://github.com/acme/widgets").is_err());
        assert!(parse_pr_url("https://github.com/acme/widgets/pull/abc").is_err());
    }

    #[test]
    fn issue_key_comes_from_title_then_branch() {
        struct Dummy;
        #[async_trait]
        impl VcsProvider for Dummy {
            async fn resolve_pr(&self, _url: &str) -> Result<PrRef> {
                unimplemented!()
            }
            async fn list_changed_files(&self, _pr: &PrRef) -> Result<Vec<ChangedFileInfo>> {
                unimplemented!()
            }
            async fn fetch_diff(&self, _pr: &PrRef) -> Result<String> {
                unimplemented!()
            }
            async fn fetch_file_at_commit(
                &self,
                _pr: &PrRef,
                _path: &str,
                _commit: &str,
            ) -> Result<String> {
                unimplemented!()
            }
            async fn list_dir_at_commit(
                &self,
                _pr: &PrRef,
                _dir: &str,
                _commit: &str,
            ) -> Result<Vec<String>> {
                unimplemented!()
            }
        }

        let mut pr = PrRef {
            url: String::new(),
            owner: String::new(),
            repo: String::new(),
            number: 1,
            title: "PROJ-42 fix the widget".into(),
            base_sha: String::new(),
            head_sha: String::new(),
            head_ref: "feature/OTHER-7-widget".into(),
        };
        assert_eq!(Dummy.resolve_issue_key(&pr), Some("PROJ-42".into()));

        pr.title = "fix the widget".into();
        assert_eq!(Dummy.resolve_issue_key(&pr), Some("OTHER-7".into()));

        pr.head_ref = "feature/widget".into();
        assert_eq!(Dummy.resolve_issue_key(&pr), None);
    }

    #[test]
    fn maps_change_types() {
        assert_eq!(change_type_from_status(Some("added")), ChangeType::Added);
        assert_eq!(change_type_from_status(Some("removed")), ChangeType::Removed);
        assert_eq!(change_type_from_status(Some("renamed")), ChangeType::Renamed);
        assert_eq!(change_type_from_status(Some("modified")), ChangeType::Modified);
        assert_eq!(change_type_from_status(None), ChangeType::Modified);
    }
}
