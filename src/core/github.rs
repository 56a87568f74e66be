//! Artifact host: where releases and their `.tar.gz` assets live.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::GithubConfig;
use crate::error::{Error, Result};

const API_BASE: &str = "https://api.github.com";
const UPLOADS_BASE: &str = "https://uploads.github.com";
const ARCHIVE_EXTENSION: &str = ".tar.gz";
const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    pub fn matches(&self, name: &str) -> bool {
        self.tag_name == name || self.name.as_deref() == Some(name)
    }

    /// The first `.tar.gz` asset, which is what deploys install.
    pub fn archive_asset(&self) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|asset| asset.name.ends_with(ARCHIVE_EXTENSION))
    }
}

pub fn asset_name(release: &str) -> String {
    format!("{}{}", release, ARCHIVE_EXTENSION)
}

pub trait ArtifactHost {
    fn releases(&self) -> Result<Vec<Release>>;

    fn fetch_asset(&self, asset_id: u64) -> Result<Vec<u8>>;

    /// Create release `name` at `commitish` and attach `content` as its archive.
    fn publish_release(&self, name: &str, commitish: &str, content: &[u8]) -> Result<()>;
}

/// Download the archive of release `name`.
pub fn fetch_release_archive(host: &dyn ArtifactHost, name: &str) -> Result<Vec<u8>> {
    let releases = host.releases()?;
    let asset = releases
        .iter()
        .find(|release| release.matches(name))
        .and_then(Release::archive_asset)
        .ok_or_else(|| Error::artifact_not_found(name))?;

    log_status!("artifact", "Downloading {} ({})", asset.name, name);
    host.fetch_asset(asset.id)
}

// ============================================================================
// GitHub
// ============================================================================

pub struct GithubClient {
    client: Client,
    token: String,
    repository: String,
}

#[derive(Deserialize)]
struct CreatedRelease {
    id: u64,
}

fn request_error(context: &str) -> impl Fn(reqwest::Error) -> Error + '_ {
    move |e| Error::artifact_host_failed(e.to_string(), Some(context.to_string()))
}

fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    Err(Error::artifact_host_failed(
        format!("HTTP {}: {}", status.as_u16(), body),
        Some(context.to_string()),
    ))
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("agnes/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                Error::internal_io(e.to_string(), Some("create HTTP client".to_string()))
            })?;

        Ok(Self {
            client,
            token: config.api_token.clone(),
            repository: config.repository.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("token {}", self.token))
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn repository_url(&self, base: &str, path: &str) -> String {
        format!("{}/repos/{}{}", base, self.repository, path)
    }
}

impl ArtifactHost for GithubClient {
    fn releases(&self) -> Result<Vec<Release>> {
        let context = "list releases";
        let response = self
            .authorized(self.client.get(self.repository_url(API_BASE, "/releases?per_page=100")))
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(request_error(context))?;

        check_status(response, context)?
            .json()
            .map_err(|e| Error::internal_json(e.to_string(), Some(context.to_string())))
    }

    fn fetch_asset(&self, asset_id: u64) -> Result<Vec<u8>> {
        let context = "download asset";
        let url = self.repository_url(API_BASE, &format!("/releases/assets/{}", asset_id));
        let response = self
            .authorized(self.client.get(url))
            .header("Accept", "application/octet-stream")
            .send()
            .map_err(request_error(context))?;

        let bytes = check_status(response, context)?
            .bytes()
            .map_err(request_error(context))?;
        Ok(bytes.to_vec())
    }

    fn publish_release(&self, name: &str, commitish: &str, content: &[u8]) -> Result<()> {
        let context = "create release";
        let response = self
            .authorized(self.client.post(self.repository_url(API_BASE, "/releases")))
            .json(&json!({
                "tag_name": name,
                "target_commitish": commitish,
                "name": name,
            }))
            .send()
            .map_err(request_error(context))?;

        let created: CreatedRelease = check_status(response, context)?
            .json()
            .map_err(|e| Error::internal_json(e.to_string(), Some(context.to_string())))?;

        let context = "upload asset";
        let url = self.repository_url(
            UPLOADS_BASE,
            &format!("/releases/{}/assets?name={}", created.id, asset_name(name)),
        );
        let response = self
            .authorized(self.client.post(url))
            .header("Content-Type", ARCHIVE_CONTENT_TYPE)
            .body(content.to_vec())
            .send()
            .map_err(request_error(context))?;
        check_status(response, context)?;

        Ok(())
    }
}

/// Stand-in when `agnes.github` is not configured. Only fails once a task
/// actually needs a release.
pub struct UnconfiguredHost;

impl UnconfiguredHost {
    fn error() -> Error {
        Error::config_missing_key("agnes.github", None)
            .with_hint("Configure agnes.github.api_token and agnes.github.repository")
    }
}

impl ArtifactHost for UnconfiguredHost {
    fn releases(&self) -> Result<Vec<Release>> {
        Err(Self::error())
    }

    fn fetch_asset(&self, _asset_id: u64) -> Result<Vec<u8>> {
        Err(Self::error())
    }

    fn publish_release(&self, _name: &str, _commitish: &str, _content: &[u8]) -> Result<()> {
        Err(Self::error())
    }
}

pub fn host_from_config(config: Option<&GithubConfig>) -> Result<Box<dyn ArtifactHost>> {
    match config {
        Some(github) => Ok(Box::new(GithubClient::new(github)?)),
        None => Ok(Box::new(UnconfiguredHost)),
    }
}
