//! GitHub API client.
//!
//! Implements the remote content provider consumed by the sync engine:
//! repository metadata, one-call recursive tree listing, raw file content,
//! and the compressed branch snapshot (zipball).

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;

use crate::error::AppError;

/// Remote content provider boundary.
///
/// The sync engine depends on this trait rather than on the concrete
/// GitHub client, so tests can drive it with an in-memory source.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Resolve the repository's default branch name.
    async fn default_branch(&self) -> Result<String, AppError>;

    /// Fetch the full recursive file tree for a branch in one call.
    async fn list_tree(&self, branch: &str) -> Result<Vec<TreeEntry>, AppError>;

    /// Fetch raw text content of one file at (path, ref).
    async fn fetch_file(&self, path: &str, reference: &str) -> Result<String, AppError>;

    /// Fetch one compressed snapshot (zip archive) of a branch's tree.
    async fn fetch_snapshot(&self, branch: &str) -> Result<Vec<u8>, AppError>;
}

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    /// API base URL (`https://api.github.com` in production; tests may
    /// point elsewhere).
    pub base_url: String,

    /// Repository owner.
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Personal access token; anonymous requests work with a lower rate
    /// budget.
    pub token: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            owner: String::new(),
            name: String::new(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// GitHub API client for one repository.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    config: GithubClientConfig,
}

/// Repository metadata from `GET /repos/:owner/:repo`.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubRepoInfo {
    pub default_branch: String,
    pub html_url: Option<String>,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    /// Path within the repository.
    pub path: String,

    /// Entry kind: `blob` for files, `tree` for directories.
    #[serde(rename = "type")]
    pub kind: String,

    /// Content-version token (Git blob SHA).
    pub sha: String,

    /// Blob size in bytes; absent for trees.
    pub size: Option<i64>,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// Recursive tree response from `GET /repos/:owner/:repo/git/trees/:ref`.
#[derive(Debug, Clone, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    truncated: bool,
}

impl GithubClient {
    /// Create a new GitHub client.
    pub fn new(config: GithubClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        // GitHub rejects requests without a User-Agent
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("studydeck"),
        );

        if let Some(token) = &config.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| AppError::authentication("Invalid token format"))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build a full API URL for a repo-scoped endpoint.
    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.owner,
            self.config.name,
            path
        )
    }

    /// Read the rate limit reset timestamp from response headers.
    fn rate_limit_reset(response: &Response) -> Option<i64> {
        response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
    }

    /// Whether the response signals an exhausted request budget.
    fn is_rate_limited(response: &Response) -> bool {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return true;
        }
        // GitHub reports primary rate limiting as 403 with a zeroed
        // remaining-requests header
        status == StatusCode::FORBIDDEN
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .map(|s| s == "0")
                .unwrap_or(false)
    }

    /// Map a non-success response into the error taxonomy.
    fn error_for_status(response: &Response, endpoint: &str) -> AppError {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            AppError::authentication("GitHub token missing, expired or revoked")
        } else if Self::is_rate_limited(response) {
            AppError::rate_limited(
                "GitHub API rate limit exceeded",
                Self::rate_limit_reset(response),
            )
        } else if status == StatusCode::NOT_FOUND {
            AppError::not_found_with_id("Remote resource", endpoint)
        } else {
            AppError::remote_api_full("Request failed", status.as_u16(), endpoint)
        }
    }

    /// Send a GET and decode a JSON body, mapping error statuses.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        endpoint: &str,
        accept: Option<&'static str>,
    ) -> Result<T, AppError> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(&response, endpoint));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::decoding(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl RemoteSource for GithubClient {
    async fn default_branch(&self) -> Result<String, AppError> {
        let url = self.api_url("");
        let info: GithubRepoInfo = self.get_json(&url, "/repos", None).await?;
        Ok(info.default_branch)
    }

    async fn list_tree(&self, branch: &str) -> Result<Vec<TreeEntry>, AppError> {
        let endpoint = format!("/git/trees/{}", urlencoding::encode(branch));
        let url = format!("{}?recursive=1", self.api_url(&endpoint));

        let tree: TreeResponse = self.get_json(&url, &endpoint, None).await?;

        if tree.truncated {
            log::warn!(
                "Tree listing for {}/{} was truncated by the API",
                self.config.owner,
                self.config.name
            );
        }

        Ok(tree.tree)
    }

    async fn fetch_file(&self, path: &str, reference: &str) -> Result<String, AppError> {
        // Encode each segment, keeping the separators
        let encoded_path = path
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let endpoint = format!("/contents/{}", encoded_path);
        let url = self.api_url(&endpoint);

        let response = self
            .client
            .get(&url)
            // Raw media type returns the file body directly instead of a
            // base64 JSON wrapper
            .header(header::ACCEPT, "application/vnd.github.raw+json")
            .query(&[("ref", reference)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(&response, &endpoint));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::decoding(format!("Failed to read file content: {}", e)))
    }

    async fn fetch_snapshot(&self, branch: &str) -> Result<Vec<u8>, AppError> {
        let endpoint = format!("/zipball/{}", urlencoding::encode(branch));
        let url = self.api_url(&endpoint);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_for_status(&response, &endpoint));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::network(format!("Failed to download snapshot: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> GithubClient {
        GithubClient::new(GithubClientConfig {
            owner: "octocat".to_string(),
            name: "notes".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_api_url_construction() {
        let client = test_client();
        assert_eq!(
            client.api_url("/git/trees/main"),
            "https://api.github.com/repos/octocat/notes/git/trees/main"
        );
        assert_eq!(client.api_url(""), "https://api.github.com/repos/octocat/notes");
    }

    #[test]
    fn test_client_with_token_builds() {
        let client = GithubClient::new(GithubClientConfig {
            owner: "o".to_string(),
            name: "r".to_string(),
            token: Some("ghp_testtoken".to_string()),
            ..Default::default()
        });
        assert!(client.is_ok());
    }

    #[test]
    fn test_tree_entry_kind() {
        let blob = TreeEntry {
            path: "a.md".to_string(),
            kind: "blob".to_string(),
            sha: "abc".to_string(),
            size: Some(10),
        };
        let tree = TreeEntry {
            path: "docs".to_string(),
            kind: "tree".to_string(),
            sha: "def".to_string(),
            size: None,
        };
        assert!(blob.is_blob());
        assert!(!tree.is_blob());
    }

    #[test]
    fn test_tree_response_deserialization() {
        let json = r#"{
            "sha": "root",
            "tree": [
                {"path": "README.md", "type": "blob", "sha": "abc123", "size": 42},
                {"path": "docs", "type": "tree", "sha": "def456"}
            ],
            "truncated": false
        }"#;

        let parsed: TreeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.tree.len(), 2);
        assert!(!parsed.truncated);
        assert_eq!(parsed.tree[0].sha, "abc123");
        assert_eq!(parsed.tree[1].kind, "tree");
    }
}
