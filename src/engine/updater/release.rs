//! Release Checker
//!
//! Decides whether the configured channel carries a version different from
//! the installed one. Falls back to the raw version marker on the branch when
//! the release API cannot be used.

use super::manifest::VERSION_MARKER_FILE;
use super::source::ReleaseSource;
use super::transport::{HttpClient, RetryingTransport, TransportError, API_HEADERS, RAW_HEADERS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Release channel the device follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Prerelease,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Prerelease => write!(f, "prerelease"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "prerelease" => Ok(Self::Prerelease),
            other => Err(format!(
                "unknown channel '{}', expected 'stable' or 'prerelease'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(rename = "prerelease", default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// Where the answer of a check came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckSource {
    Releases,
    VersionMarker,
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub has_update: bool,
    pub new_version: Option<String>,
    pub metadata: Option<ReleaseMetadata>,
    pub source: CheckSource,
}

impl UpdateCheck {
    fn no_update(source: CheckSource) -> Self {
        Self {
            has_update: false,
            new_version: None,
            metadata: None,
            source,
        }
    }

    fn compare(
        current: &str,
        latest: String,
        metadata: Option<ReleaseMetadata>,
        source: CheckSource,
    ) -> Self {
        if latest == current {
            return Self {
                metadata,
                ..Self::no_update(source)
            };
        }
        Self {
            has_update: true,
            new_version: Some(latest),
            metadata,
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected release data: {0}")]
    Parse(String),

    #[error("version marker is empty")]
    EmptyMarker,
}

impl ReleaseError {
    /// Operator-facing explanation used when both lookups fail
    pub fn reason(&self) -> String {
        match self {
            Self::Transport(TransportError::Rejected { status: 404 }) => {
                "repository not found (HTTP 404)".to_string()
            }
            Self::Transport(TransportError::Rejected { status }) => {
                format!("repository not accessible (HTTP {})", status)
            }
            other => other.to_string(),
        }
    }
}

/// Prerelease naming convention: a literal tag prefix
pub fn is_prerelease_tag(tag: &str, prefix: &str) -> bool {
    !prefix.is_empty() && tag.starts_with(prefix)
}

/// Marker files often hold a bare number; compare tags in `v`-prefixed form
fn with_v_prefix(tag: &str) -> String {
    let tag = tag.trim();
    if tag.starts_with('v') {
        tag.to_string()
    } else {
        format!("v{}", tag)
    }
}

pub struct ReleaseChecker<C> {
    transport: RetryingTransport<C>,
    source: ReleaseSource,
    prerelease_prefix: String,
}

impl<C: HttpClient> ReleaseChecker<C> {
    pub fn new(
        transport: RetryingTransport<C>,
        source: ReleaseSource,
        prerelease_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            source,
            prerelease_prefix: prerelease_prefix.into(),
        }
    }

    /// Compare the installed version against the channel's newest release.
    ///
    /// Never fails: lookup problems end in `has_update == false` with the
    /// cause recorded in [`CheckSource::Unavailable`].
    pub async fn check_for_update(&self, current_version: &str, channel: Channel) -> UpdateCheck {
        info!(current = current_version, %channel, repo = %self.source.slug(), "Checking for updates");

        match self.fetch_candidate(channel).await {
            Ok(Some(release)) => {
                let tag = release.tag.clone();
                let check =
                    UpdateCheck::compare(current_version, tag, Some(release), CheckSource::Releases);
                if check.has_update {
                    info!(latest = ?check.new_version, "Update available");
                }
                check
            }
            Ok(None) => {
                info!(%channel, "No eligible release on channel");
                UpdateCheck::no_update(CheckSource::Releases)
            }
            Err(e) => {
                warn!(error = %e, "Release lookup failed, trying version marker");
                self.check_version_marker(current_version, &e).await
            }
        }
    }

    async fn fetch_candidate(&self, channel: Channel) -> Result<Option<ReleaseMetadata>, ReleaseError> {
        match channel {
            Channel::Stable => {
                let release: ReleaseMetadata = self.fetch_json(&self.source.latest_release_url()).await?;
                if release.is_prerelease {
                    return Ok(None);
                }
                Ok(Some(release))
            }
            Channel::Prerelease => {
                let releases: Vec<ReleaseMetadata> = self.fetch_json(&self.source.releases_url()).await?;
                let Some(newest) = releases.into_iter().next() else {
                    return Ok(None);
                };
                if newest.is_prerelease && is_prerelease_tag(&newest.tag, &self.prerelease_prefix) {
                    Ok(Some(newest))
                } else {
                    info!(tag = %newest.tag, "Newest release is not a prerelease build");
                    Ok(None)
                }
            }
        }
    }

    async fn fetch_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ReleaseError> {
        let body = self.transport.request(url, API_HEADERS).await?.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ReleaseError::Parse(e.to_string()))
    }

    async fn fetch_version_marker(&self) -> Result<String, ReleaseError> {
        let url = self.source.raw_url(&self.source.remote_path(VERSION_MARKER_FILE));
        let text = self.transport.request(&url, RAW_HEADERS).await?.text().await?;
        let tag = text.lines().next().unwrap_or_default().trim();
        if tag.is_empty() {
            return Err(ReleaseError::EmptyMarker);
        }
        if tag.starts_with('<') {
            return Err(ReleaseError::Parse("version marker is an HTML page".to_string()));
        }
        Ok(tag.to_string())
    }

    async fn check_version_marker(&self, current_version: &str, cause: &ReleaseError) -> UpdateCheck {
        match self.fetch_version_marker().await {
            Ok(latest) => UpdateCheck::compare(
                &with_v_prefix(current_version),
                with_v_prefix(&latest),
                None,
                CheckSource::VersionMarker,
            ),
            Err(e) => {
                warn!(error = %e, "Version marker fallback failed");
                UpdateCheck::no_update(CheckSource::Unavailable {
                    reason: cause.reason(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::testing::{FakeClient, Scripted};
    use crate::engine::updater::transport::RetryPolicy;
    use std::sync::Arc;

    const LATEST: &str = "https://api.test/repos/acme/sensor/releases/latest";
    const LIST: &str = "https://api.test/repos/acme/sensor/releases?per_page=1";
    const MARKER: &str = "https://raw.test/acme/sensor/main/firmware/version.txt";

    fn checker(client: FakeClient) -> ReleaseChecker<Arc<FakeClient>> {
        let source = ReleaseSource::new("https://api.test", "https://raw.test", "acme", "sensor", "main")
            .with_firmware_path("firmware");
        let transport = RetryingTransport::new(Arc::new(client), RetryPolicy::immediate(2));
        ReleaseChecker::new(transport, source, "dev-")
    }

    fn release_json(tag: &str, prerelease: bool) -> String {
        format!(
            r#"{{"tag_name":"{}","prerelease":{},"assets":[{{"name":"firmware.zip","browser_download_url":"https://dl.test/{}.zip"}}]}}"#,
            tag, prerelease, tag
        )
    }

    #[tokio::test]
    async fn test_same_stable_tag_no_update() {
        let checker = checker(FakeClient::new().with(LATEST, Scripted::ok(release_json("v1.2.0", false))));
        let check = checker.check_for_update("v1.2.0", Channel::Stable).await;
        assert!(!check.has_update);
        assert_eq!(check.new_version, None);
        assert_eq!(check.source, CheckSource::Releases);
    }

    #[tokio::test]
    async fn test_newer_stable_tag_is_update() {
        let checker = checker(FakeClient::new().with(LATEST, Scripted::ok(release_json("v1.3.0", false))));
        let check = checker.check_for_update("v1.2.0", Channel::Stable).await;
        assert!(check.has_update);
        assert_eq!(check.new_version.as_deref(), Some("v1.3.0"));
        let metadata = check.metadata.unwrap();
        assert_eq!(metadata.assets[0].name, "firmware.zip");
        assert!(!metadata.is_prerelease);
    }

    #[tokio::test]
    async fn test_prerelease_channel_accepts_dev_tag() {
        let list = format!("[{},{}]", release_json("dev-7", true), release_json("v1.2.0", false));
        let checker = checker(FakeClient::new().with(LIST, Scripted::ok(list)));
        let check = checker.check_for_update("v1.2.0", Channel::Prerelease).await;
        assert!(check.has_update);
        assert_eq!(check.new_version.as_deref(), Some("dev-7"));
    }

    #[tokio::test]
    async fn test_prerelease_channel_requires_flag_and_prefix() {
        let unflagged = format!("[{}]", release_json("dev-8", false));
        let checker_a = checker(FakeClient::new().with(LIST, Scripted::ok(unflagged)));
        assert!(!checker_a.check_for_update("v1.2.0", Channel::Prerelease).await.has_update);

        let wrong_prefix = format!("[{}]", release_json("v1.3.0-rc1", true));
        let checker_b = checker(FakeClient::new().with(LIST, Scripted::ok(wrong_prefix)));
        assert!(!checker_b.check_for_update("v1.2.0", Channel::Prerelease).await.has_update);
    }

    #[tokio::test]
    async fn test_no_releases_is_no_update() {
        let checker = checker(FakeClient::new().with(LIST, Scripted::ok("[]")));
        let check = checker.check_for_update("v1.2.0", Channel::Prerelease).await;
        assert!(!check.has_update);
        assert_eq!(check.source, CheckSource::Releases);
    }

    #[tokio::test]
    async fn test_falls_back_to_version_marker() {
        let client = FakeClient::new()
            .with(LATEST, Scripted::status(502))
            .with(MARKER, Scripted::ok("1.3.0\n"));
        let checker = checker(client);

        let check = checker.check_for_update("1.2.0", Channel::Stable).await;
        assert!(check.has_update);
        assert_eq!(check.new_version.as_deref(), Some("v1.3.0"));
        assert_eq!(check.source, CheckSource::VersionMarker);
        assert!(check.metadata.is_none());
    }

    #[tokio::test]
    async fn test_version_marker_matching_current() {
        let client = FakeClient::new()
            .with(LATEST, Scripted::ok("not json"))
            .with(MARKER, Scripted::ok("v1.2.0"));
        let check = checker(client).check_for_update("1.2.0", Channel::Stable).await;
        assert!(!check.has_update);
        assert_eq!(check.source, CheckSource::VersionMarker);
    }

    #[tokio::test]
    async fn test_both_lookups_failing_is_unavailable() {
        let check = checker(FakeClient::new())
            .check_for_update("v1.2.0", Channel::Stable)
            .await;
        assert!(!check.has_update);
        assert!(check.metadata.is_none());
        match check.source {
            CheckSource::Unavailable { reason } => assert!(reason.contains("repository not found")),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_prerelease_predicate() {
        assert!(is_prerelease_tag("dev-12", "dev-"));
        assert!(!is_prerelease_tag("v1.0.0", "dev-"));
        assert!(!is_prerelease_tag("dev-12", ""));
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("Stable".parse::<Channel>().unwrap(), Channel::Stable);
        assert_eq!("prerelease".parse::<Channel>().unwrap(), Channel::Prerelease);
        assert!("nightly".parse::<Channel>().is_err());
    }
}
