use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::core::error::{LauncherError, LauncherResult};

/// Source of the newest available server version identifier.
#[async_trait]
pub trait VersionLookup: Send + Sync {
    async fn latest_version(&self) -> LauncherResult<String>;
}

/// Latest commit SHA of a GitHub branch.
pub struct GitHubCommitLookup {
    client: Client,
    owner: String,
    repo: String,
    branch: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

impl GitHubCommitLookup {
    pub fn new(client: Client, owner: &str, repo: &str, branch: &str) -> Self {
        Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            api_base: "https://api.github.com".to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn commit_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, self.owner, self.repo, self.branch
        )
    }
}

#[async_trait]
impl VersionLookup for GitHubCommitLookup {
    async fn latest_version(&self) -> LauncherResult<String> {
        let url = self.commit_url();
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url,
                status: status.as_u16(),
            });
        }

        let commit: CommitResponse = response.json().await?;
        debug!("Latest commit of {}/{}: {}", self.owner, self.repo, commit.sha);
        Ok(commit.sha)
    }
}
