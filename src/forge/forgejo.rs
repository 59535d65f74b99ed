//! Forgejo / Gitea implementation of [`ExistenceOracle`].
//!
//! A repository opts in to Pages by carrying a `.pages` file at its root, so
//! existence is a contents-API lookup for that file.

use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

use super::{Existence, ExistenceOracle};
use crate::config::ForgejoConfig;

const USER_AGENT: &str = concat!("pages-reaper/", env!("CARGO_PKG_VERSION"));

pub struct ForgejoOracle {
    http_client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ForgejoOracle {
    pub fn new(config: &ForgejoConfig) -> Result<Self> {
        let base_url = Url::parse(config.host.trim_end_matches('/'))
            .with_context(|| format!("invalid Forgejo host URL: {}", config.host))?;
        anyhow::ensure!(
            !base_url.cannot_be_a_base(),
            "Forgejo host is not a usable base URL: {}",
            config.host
        );

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http_client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// `{host}/api/v1/repos/{owner}/{repository}/contents/.pages`, with the
    /// owner and repository percent-encoded as single path segments.
    fn pages_file_url(&self, owner: &str, repository: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("Forgejo host URL cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v1", "repos", owner, repository, "contents", ".pages"]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl ExistenceOracle for ForgejoOracle {
    async fn exists(&self, owner: &str, repository: &str) -> Result<Existence> {
        let url = self.pages_file_url(owner, repository)?;

        let mut request = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(ref token) = self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Forgejo request for {owner}/{repository} failed"))?;

        match resp.status() {
            StatusCode::OK => {
                debug!(%owner, %repository, "pages file present");
                Ok(Existence::Present)
            }
            StatusCode::NOT_FOUND => {
                debug!(%owner, %repository, "pages file not found");
                Ok(Existence::Absent)
            }
            status => {
                warn!(%owner, %repository, %status, "Forgejo API returned unexpected status");
                anyhow::bail!("Forgejo API returned {status} for {owner}/{repository}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn oracle(host: &str, token: Option<&str>, timeout: Duration) -> ForgejoOracle {
        ForgejoOracle::new(&ForgejoConfig {
            host: host.to_string(),
            token: token.map(str::to_string),
            timeout,
        })
        .unwrap()
    }

    #[test]
    fn pages_file_url_trims_trailing_slash() {
        let oracle = oracle("https://git.example.com/", None, Duration::from_secs(10));
        let url = oracle.pages_file_url("alice", "myrepo").unwrap();
        assert_eq!(
            url.as_str(),
            "https://git.example.com/api/v1/repos/alice/myrepo/contents/.pages"
        );
    }

    #[test]
    fn pages_file_url_keeps_subpath_and_encodes_segments() {
        let oracle = oracle("https://example.com/forge", None, Duration::from_secs(10));
        let url = oracle.pages_file_url("al ice", "my/repo").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/forge/api/v1/repos/al%20ice/my%2Frepo/contents/.pages"
        );
    }

    #[test]
    fn rejects_invalid_host() {
        let result = ForgejoOracle::new(&ForgejoConfig {
            host: "not a url".to_string(),
            token: None,
            timeout: Duration::from_secs(10),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ok_means_present() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/bob/siteA/contents/.pages"))
            .and(header("Accept", "application/json"))
            .and(header("Authorization", "token s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = oracle(&server.uri(), Some("s3cret"), Duration::from_secs(10));
        assert_eq!(
            oracle.exists("bob", "siteA").await.unwrap(),
            Existence::Present
        );
    }

    #[tokio::test]
    async fn not_found_means_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/carol/siteB/contents/.pages"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let oracle = oracle(&server.uri(), None, Duration::from_secs(10));
        assert_eq!(
            oracle.exists("carol", "siteB").await.unwrap(),
            Existence::Absent
        );
    }

    #[tokio::test]
    async fn no_token_sends_no_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let oracle = oracle(&server.uri(), None, Duration::from_secs(10));
        assert_eq!(
            oracle.exists("bob", "siteA").await.unwrap(),
            Existence::Present
        );
    }

    #[tokio::test]
    async fn server_error_is_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let oracle = oracle(&server.uri(), None, Duration::from_secs(10));
        assert!(oracle.exists("bob", "siteA").await.is_err());
    }

    #[tokio::test]
    async fn forbidden_is_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let oracle = oracle(&server.uri(), None, Duration::from_secs(10));
        assert!(oracle.exists("bob", "siteA").await.is_err());
    }

    #[tokio::test]
    async fn timeout_is_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let oracle = oracle(&server.uri(), None, Duration::from_millis(100));
        assert!(oracle.exists("bob", "siteA").await.is_err());
    }
}
