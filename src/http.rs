//! GitHub HTTP client
//!
//! Implements [`GithubApi`] against the GitHub REST API and
//! [`ContentFetcher`] against the raw content hosts. Requests are made once;
//! a failure or timeout is reported to the caller as is.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::GithubConfig;
use crate::error::{RegistryError, Result};
use crate::integrity::ContentFetcher;
use crate::source::{GistInfo, GithubApi};

const ACCEPT_V3: &str = "application/vnd.github.v3+json";

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

/// Authenticated GitHub client
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(
        api_base: impl Into<String>,
        token: Option<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &GithubConfig) -> Result<Self> {
        Self::new(
            config.api_base.clone(),
            config.resolved_token(),
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn api_get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        debug!("GET {}", url);
        let builder = self.client.get(url).header("Accept", ACCEPT_V3);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("token {}", token)),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .ok()
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
        Err(RegistryError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl GithubApi for GithubClient {
    async fn gist(&self, gist_id: &str) -> Result<GistInfo> {
        let response = Self::send(self.api_get(&format!("/gists/{}", gist_id))).await?;
        Ok(response.json::<GistInfo>().await?)
    }

    async fn commit_sha(&self, owner: &str, repo: &str, reference: &str) -> Result<String> {
        let path = format!("/repos/{}/{}/commits/{}", owner, repo, reference);
        let response = Self::send(self.api_get(&path)).await?;
        Ok(response.json::<CommitResponse>().await?.sha)
    }

    async fn file_exists(&self, owner: &str, repo: &str, path: &str, commit: &str) -> Result<bool> {
        let request = self
            .api_get(&format!("/repos/{}/{}/contents/{}", owner, repo, path))
            .query(&[("ref", commit)]);
        match Self::send(request).await {
            Ok(_) => Ok(true),
            Err(RegistryError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ContentFetcher for GithubClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = Self::send(self.client.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_from_config() {
        let config = GithubConfig {
            api_base: "https://github.example.com/api/v3/".to_string(),
            token: Some("abc".to_string()),
            ..GithubConfig::default()
        };
        let client = GithubClient::from_config(&config).unwrap();
        assert_eq!(client.api_base, "https://github.example.com/api/v3");
        assert_eq!(client.token.as_deref(), Some("abc"));
    }
}
