use crate::models::AppConfig;
use reqwest::{Client, StatusCode};
use semver::Version;
use serde::Deserialize;
use std::fmt;

/// One downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub browser_download_url: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub size: u64,
}

/// The subset of the GitHub "latest release" document this application reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseDescriptor {
    pub tag_name: String,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub html_url: Option<String>,

    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A release newer than the running version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableUpdate {
    pub version: Version,
    pub notes: String,
    pub assets: Vec<ReleaseAsset>,
    pub release_page: Option<String>,
}

impl AvailableUpdate {
    /// Download URL of the first asset, which is the one that gets installed.
    pub fn download_url(&self) -> Option<&str> {
        self.assets.first().map(|a| a.browser_download_url.as_str())
    }

    pub fn notes_or_default(&self) -> &str {
        if self.notes.trim().is_empty() {
            "No release notes available."
        } else {
            &self.notes
        }
    }
}

/// Why an update check could not reach a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    HttpStatus(u16),
    InvalidVersion(String),
    Network(String),
    MalformedResponse(String),
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::HttpStatus(status) => write!(f, "release feed returned HTTP {status}"),
            CheckFailure::InvalidVersion(raw) => write!(f, "invalid version: {raw:?}"),
            CheckFailure::Network(reason) => write!(f, "network error: {reason}"),
            CheckFailure::MalformedResponse(reason) => {
                write!(f, "malformed release document: {reason}")
            }
        }
    }
}

/// Verdict of a single update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    UpdateFound(AvailableUpdate),
    UpToDate,
    CheckFailed(CheckFailure),
}

/// Update-check lifecycle as seen by the interactive side.
///
/// `Idle → Checking → {UpdateFound | UpToDate | CheckFailed} → Idle`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdateCheckState {
    #[default]
    Idle,
    Checking,
    UpdateFound(AvailableUpdate),
    UpToDate,
    CheckFailed(CheckFailure),
}

impl UpdateCheckState {
    /// Enter `Checking`. Returns false (and stays put) unless currently idle.
    pub fn begin(&mut self) -> bool {
        if *self == UpdateCheckState::Idle {
            *self = UpdateCheckState::Checking;
            true
        } else {
            false
        }
    }

    /// Record the verdict of the running check. Ignored unless `Checking`.
    pub fn finish(&mut self, result: UpdateResult) -> bool {
        if *self != UpdateCheckState::Checking {
            return false;
        }
        *self = match result {
            UpdateResult::UpdateFound(update) => UpdateCheckState::UpdateFound(update),
            UpdateResult::UpToDate => UpdateCheckState::UpToDate,
            UpdateResult::CheckFailed(failure) => UpdateCheckState::CheckFailed(failure),
        };
        true
    }

    /// Return to `Idle` once the verdict has been presented.
    pub fn acknowledge(&mut self) {
        if *self != UpdateCheckState::Checking {
            *self = UpdateCheckState::Idle;
        }
    }

    pub fn is_checking(&self) -> bool {
        matches!(self, UpdateCheckState::Checking)
    }

    pub fn label(&self) -> &'static str {
        match self {
            UpdateCheckState::Idle => "idle",
            UpdateCheckState::Checking => "checking",
            UpdateCheckState::UpdateFound(_) => "update found",
            UpdateCheckState::UpToDate => "up to date",
            UpdateCheckState::CheckFailed(_) => "check failed",
        }
    }
}

/// Parse a release tag such as `v2.1.0`, dropping one leading `v`.
pub fn parse_version(tag: &str) -> Result<Version, semver::Error> {
    let tag = tag.trim();
    let bare = tag
        .strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag);
    Version::parse(bare)
}

/// Polls the release feed for a newer version.
///
/// Precedence follows the `semver` crate: a pre-release sorts before its
/// release and build metadata does not affect ordering.
pub struct UpdateChecker {
    client: Client,
    feed_url: String,
    repository: String,
}

impl UpdateChecker {
    pub fn new(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(format!("{}/{}", crate::APP_NAME, config.current_version))
            .build()?;

        Ok(Self {
            client,
            feed_url: config.feed_url.trim_end_matches('/').to_string(),
            repository: config.repository.clone(),
        })
    }

    fn repository_url(&self) -> String {
        format!("{}/repos/{}", self.feed_url, self.repository)
    }

    /// Check whether a release newer than `current` exists.
    ///
    /// Never fails: a missing repository or release counts as up to date and
    /// every other problem is reported as [`UpdateResult::CheckFailed`].
    pub async fn check(&self, current: &str) -> UpdateResult {
        tracing::info!("Checking for updates (current version {})", current);

        match self.try_check(current).await {
            Ok(UpdateResult::UpdateFound(update)) => {
                tracing::info!("Update available: {}", update.version);
                UpdateResult::UpdateFound(update)
            }
            Ok(result) => {
                tracing::info!("No update available");
                result
            }
            Err(failure) => {
                tracing::warn!("Update check failed: {}", failure);
                UpdateResult::CheckFailed(failure)
            }
        }
    }

    async fn try_check(&self, current: &str) -> Result<UpdateResult, CheckFailure> {
        let current = parse_version(current)
            .map_err(|_| CheckFailure::InvalidVersion(current.to_string()))?;

        let repo_url = self.repository_url();
        let repo_response = self.get(&repo_url).await?;
        match repo_response.status() {
            StatusCode::NOT_FOUND => {
                tracing::info!("Repository not found, skipping update check");
                return Ok(UpdateResult::UpToDate);
            }
            status if !status.is_success() => {
                return Err(CheckFailure::HttpStatus(status.as_u16()));
            }
            _ => {}
        }

        let release_response = self.get(&format!("{repo_url}/releases/latest")).await?;
        match release_response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                tracing::info!("No releases found in repository");
                return Ok(UpdateResult::UpToDate);
            }
            status => return Err(CheckFailure::HttpStatus(status.as_u16())),
        }

        let release: ReleaseDescriptor = release_response
            .json()
            .await
            .map_err(|e| CheckFailure::MalformedResponse(e.to_string()))?;

        let latest = parse_version(&release.tag_name)
            .map_err(|_| CheckFailure::InvalidVersion(release.tag_name.clone()))?;

        tracing::debug!("Latest release {} vs current {}", latest, current);

        if latest > current {
            Ok(UpdateResult::UpdateFound(AvailableUpdate {
                version: latest,
                notes: release.body.unwrap_or_default(),
                assets: release.assets,
                release_page: release.html_url,
            }))
        } else {
            Ok(UpdateResult::UpToDate)
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, CheckFailure> {
        self.client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CheckFailure::Network(format!("request to {url} timed out"))
                } else {
                    CheckFailure::Network(e.to_string())
                }
            })
    }
}
